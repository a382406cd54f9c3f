//! Scoped fetching of message data: an index-only lookup, metadata, or the
//! full parsed content, depending on what a `FETCH` actually needs.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::mail::mailbox::StoredMessage;
use crate::mail::snapshot::FrozenMailbox;
use crate::mail::uidindex::IndexEntry;
use crate::unique_ident::UniqueIdent;

pub struct Query<'a, 'b> {
    pub frozen: &'a FrozenMailbox,
    pub emails: &'b [UniqueIdent],
    pub scope: QueryScope,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    Index,
    Partial,
    Full,
}

impl<'a, 'b> Query<'a, 'b> {
    pub async fn fetch(&self) -> Result<Vec<QueryResult>> {
        match self.scope {
            QueryScope::Index => self.index(),
            QueryScope::Partial | QueryScope::Full => self.full().await,
        }
    }

    fn index(&self) -> Result<Vec<QueryResult>> {
        self.emails
            .iter()
            .map(|uuid| {
                self.frozen
                    .snapshot
                    .table
                    .get(uuid)
                    .map(|index| QueryResult::IndexResult {
                        uuid: *uuid,
                        index: index.clone(),
                    })
                    .ok_or_else(|| anyhow!("missing email in index"))
            })
            .collect()
    }

    async fn full(&self) -> Result<Vec<QueryResult>> {
        let stored = self.frozen.mailbox.fetch_meta(self.emails).await?;
        self.index()?
            .into_iter()
            .zip(stored)
            .map(|(idx, stored)| {
                idx.into_full(stored)
                    .ok_or_else(|| anyhow!("index result was not IndexResult"))
            })
            .collect()
    }
}

pub enum QueryResult {
    IndexResult {
        uuid: UniqueIdent,
        index: IndexEntry,
    },
    FullResult {
        uuid: UniqueIdent,
        index: IndexEntry,
        message: Arc<StoredMessage>,
    },
}

impl QueryResult {
    pub fn uuid(&self) -> &UniqueIdent {
        match self {
            Self::IndexResult { uuid, .. } => uuid,
            Self::FullResult { uuid, .. } => uuid,
        }
    }

    pub fn index(&self) -> &IndexEntry {
        match self {
            Self::IndexResult { index, .. } => index,
            Self::FullResult { index, .. } => index,
        }
    }

    pub fn message(&self) -> Option<&Arc<StoredMessage>> {
        match self {
            Self::IndexResult { .. } => None,
            Self::FullResult { message, .. } => Some(message),
        }
    }

    fn into_full(self, message: Arc<StoredMessage>) -> Option<Self> {
        match self {
            Self::IndexResult { uuid, index } => Some(Self::FullResult {
                uuid,
                index,
                message,
            }),
            _ => None,
        }
    }
}
