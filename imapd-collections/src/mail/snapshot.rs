//! A per-session pinned view of a mailbox: the snapshot a `SELECT`ed session
//! diffs against to decide which untagged updates (`EXISTS`, `EXPUNGE`,
//! `FETCH` ...) it owes the client.

use std::sync::Arc;

use crate::mail::mailbox::Mailbox;
use crate::mail::query::{Query, QueryScope};
use crate::mail::uidindex::UidIndex;
use crate::unique_ident::UniqueIdent;

/// A `FrozenMailbox` holds a snapshot of a mailbox's state that is
/// deliberately desynchronized from the live state. It's up to the caller to
/// decide when to refresh it, which is exactly the point: a session can keep
/// serving `FETCH`/`SEARCH` against a stable view while deciding for itself
/// when to emit updates from a newer one.
pub struct FrozenMailbox {
    pub mailbox: Arc<Mailbox>,
    pub snapshot: UidIndex,
}

impl FrozenMailbox {
    pub async fn new(mailbox: Arc<Mailbox>) -> Self {
        let state = mailbox.current_uid_index().await;
        Self {
            mailbox,
            snapshot: state,
        }
    }

    /// Peek at the live state without updating the local snapshot. Useful
    /// for deciding *whether* an update is pending before committing to one.
    pub async fn peek(&self) -> UidIndex {
        self.mailbox.current_uid_index().await
    }

    /// Replace the local snapshot with the live state, returning the old
    /// one so the caller can diff the two.
    pub async fn update(&mut self) -> UidIndex {
        let old_snapshot = self.snapshot.clone();
        self.snapshot = self.mailbox.current_uid_index().await;
        old_snapshot
    }

    pub fn query<'a, 'b>(&'a self, uuids: &'b [UniqueIdent], scope: QueryScope) -> Query<'a, 'b> {
        Query {
            frozen: self,
            emails: uuids,
            scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unique_ident::gen_ident;
    use std::num::NonZeroU32;

    #[tokio::test]
    async fn update_returns_previous_snapshot() {
        let mbox = Arc::new(Mailbox::new(gen_ident(), NonZeroU32::new(1).unwrap()));
        let mut frozen = FrozenMailbox::new(mbox.clone()).await;
        let before = frozen.snapshot.clone();

        mbox.append(b"\r\n\r\nx\r\n".to_vec(), None, &[], 0)
            .await
            .unwrap();

        let old = frozen.update().await;
        assert_eq!(old.uidnext, before.uidnext);
        assert!(frozen.snapshot.uidnext > before.uidnext);
    }

    #[tokio::test]
    async fn peek_does_not_mutate_snapshot() {
        let mbox = Arc::new(Mailbox::new(gen_ident(), NonZeroU32::new(1).unwrap()));
        let frozen = FrozenMailbox::new(mbox.clone()).await;
        mbox.append(b"\r\n\r\nx\r\n".to_vec(), None, &[], 0)
            .await
            .unwrap();

        let peeked = frozen.peek().await;
        assert!(peeked.uidnext > frozen.snapshot.uidnext);
    }
}
