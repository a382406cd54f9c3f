use anyhow::Result;
use async_trait::async_trait;

use crate::login::{static_provider::StaticLoginProvider, Credentials, LoginProvider};

/// Wraps a single hardcoded account, for running against the bundled demo
/// mailbox without requiring a user database.
pub struct DemoLoginProvider {
    inner: StaticLoginProvider,
}

impl DemoLoginProvider {
    pub fn new(username: impl Into<String>, password: &str) -> Result<Self> {
        Ok(Self {
            inner: StaticLoginProvider::single(username, password)?,
        })
    }
}

#[async_trait]
impl LoginProvider for DemoLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Result<Credentials> {
        tracing::debug!(user = %username, "demo login");
        self.inner.login(username, password).await
    }
}
