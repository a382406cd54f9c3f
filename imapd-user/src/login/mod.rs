pub mod demo_provider;
pub mod static_provider;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use static_provider::{hash_password, verify_password};

/// Identity established by a successful login. No storage or crypto material
/// rides along with it: the mailbox cache keys entirely on `username`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
}

#[async_trait]
pub trait LoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<Credentials>;
}

pub type ArcLoginProvider = Arc<dyn LoginProvider + Send + Sync>;
