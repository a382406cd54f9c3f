pub mod demo;
pub mod mail;
pub mod unique_ident;
pub mod user;

pub use user::User;
