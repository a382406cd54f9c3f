pub mod login;

pub use login::{ArcLoginProvider, Credentials, LoginProvider};
