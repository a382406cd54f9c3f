//! In-memory storage for one mailbox: the UID index plus the message bodies
//! it indexes. No disk or network I/O — everything lives behind one
//! `RwLock` for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::sync::{Notify, RwLock};

use crate::mail::uidindex::*;
use crate::unique_ident::{gen_ident, UniqueIdent};

/// A message as stored in a mailbox: its parsed content tree plus the
/// bookkeeping fields IMAP needs outside of RFC 5322 headers.
pub struct StoredMessage {
    pub internaldate: u64,
    pub rfc822_size: usize,
    pub content: imapd_mime::MessageContent,
}

impl StoredMessage {
    pub fn raw(&self) -> &[u8] {
        self.content.raw()
    }
}

pub struct Mailbox {
    pub id: UniqueIdent,
    internal: RwLock<MailboxInternal>,
    change: Notify,
}

struct MailboxInternal {
    uid_index: UidIndex,
    messages: HashMap<UniqueIdent, Arc<StoredMessage>>,
}

impl Mailbox {
    pub fn new(id: UniqueIdent, min_uidvalidity: ImapUidvalidity) -> Self {
        let mut uid_index = UidIndex::default();
        if uid_index.uidvalidity < min_uidvalidity {
            let op = uid_index.op_bump_uidvalidity(min_uidvalidity.get() - uid_index.uidvalidity.get());
            uid_index = uid_index.apply(&op);
        }

        Self {
            id,
            internal: RwLock::new(MailboxInternal {
                uid_index,
                messages: HashMap::new(),
            }),
            change: Notify::new(),
        }
    }

    /// Resolves the next time this mailbox's UID index changes. Used by IDLE
    /// to wake up without polling; callers should re-check the index after
    /// waking, as this only signals "something changed", not what.
    pub async fn notified(&self) {
        self.change.notified().await
    }

    // ---- reading ----

    /// A clone of the current UID index. Cloning is cheap: the backing maps
    /// are persistent (`im`) structures.
    pub async fn current_uid_index(&self) -> UidIndex {
        self.internal.read().await.uid_index.clone()
    }

    pub async fn fetch_meta(&self, ids: &[UniqueIdent]) -> Result<Vec<Arc<StoredMessage>>> {
        let lock = self.internal.read().await;
        ids.iter()
            .map(|id| {
                lock.messages
                    .get(id)
                    .cloned()
                    .ok_or_else(|| anyhow!("no such message: {}", id))
            })
            .collect()
    }

    pub async fn fetch_full(&self, id: UniqueIdent) -> Result<Arc<StoredMessage>> {
        self.internal
            .read()
            .await
            .messages
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no such message: {}", id))
    }

    // ---- writing ----

    pub async fn add_flags(&self, id: UniqueIdent, flags: &[Flag]) -> Result<()> {
        let mut lock = self.internal.write().await;
        let op = lock.uid_index.op_flag_add(id, flags.to_vec());
        lock.uid_index = lock.uid_index.apply(&op);
        drop(lock);
        self.change.notify_waiters();
        Ok(())
    }

    pub async fn del_flags(&self, id: UniqueIdent, flags: &[Flag]) -> Result<()> {
        let mut lock = self.internal.write().await;
        let op = lock.uid_index.op_flag_del(id, flags.to_vec());
        lock.uid_index = lock.uid_index.apply(&op);
        drop(lock);
        self.change.notify_waiters();
        Ok(())
    }

    pub async fn set_flags(&self, id: UniqueIdent, flags: &[Flag]) -> Result<()> {
        let mut lock = self.internal.write().await;
        let op = lock.uid_index.op_flag_set(id, flags.to_vec());
        lock.uid_index = lock.uid_index.apply(&op);
        drop(lock);
        self.change.notify_waiters();
        Ok(())
    }

    /// Insert a parsed message, returning its assigned UIDVALIDITY/UID.
    pub async fn append(
        &self,
        raw: Vec<u8>,
        ident: Option<UniqueIdent>,
        flags: &[Flag],
        internaldate: u64,
    ) -> Result<(ImapUidvalidity, ImapUid)> {
        let ident = ident.unwrap_or_else(gen_ident);
        let rfc822_size = raw.len();
        let content = imapd_mime::parse(raw);

        let mut lock = self.internal.write().await;
        let op = lock.uid_index.op_mail_add(ident, flags.to_vec());
        let uidvalidity = lock.uid_index.uidvalidity;
        let uid = match &op {
            UidIndexOp::MailAdd(_, uid, _, _) => *uid,
            _ => unreachable!(),
        };
        lock.uid_index = lock.uid_index.apply(&op);
        lock.messages.insert(
            ident,
            Arc::new(StoredMessage {
                internaldate,
                rfc822_size,
                content,
            }),
        );
        drop(lock);
        self.change.notify_waiters();

        Ok((uidvalidity, uid))
    }

    pub async fn delete(&self, id: UniqueIdent) -> Result<()> {
        let mut lock = self.internal.write().await;
        if !lock.uid_index.table.contains_key(&id) {
            bail!("Cannot delete mail that doesn't exist");
        }
        let op = lock.uid_index.op_mail_del(id);
        lock.uid_index = lock.uid_index.apply(&op);
        lock.messages.remove(&id);
        drop(lock);
        self.change.notify_waiters();
        Ok(())
    }

    /// Copy a message from another mailbox into this one, preserving flags.
    pub async fn copy_from(&self, from: &Mailbox, source_id: UniqueIdent) -> Result<UniqueIdent> {
        if self.id == from.id {
            bail!("Cannot copy into same mailbox");
        }

        let (from_flags, stored) = {
            let from_lock = from.internal.read().await;
            let (_, _, flags) = from_lock
                .uid_index
                .table
                .get(&source_id)
                .ok_or_else(|| anyhow!("Source mail not found"))?
                .clone();
            let stored = from_lock
                .messages
                .get(&source_id)
                .cloned()
                .ok_or_else(|| anyhow!("Source mail content not found"))?;
            (flags, stored)
        };

        let new_id = gen_ident();
        let mut lock = self.internal.write().await;
        let op = lock.uid_index.op_mail_add(new_id, from_flags);
        lock.uid_index = lock.uid_index.apply(&op);
        lock.messages.insert(new_id, stored);
        drop(lock);
        self.change.notify_waiters();
        Ok(new_id)
    }

    /// Move a message from another mailbox into this one.
    pub async fn move_from(&self, from: &Mailbox, id: UniqueIdent) -> Result<()> {
        if self.id == from.id {
            bail!("Cannot move into same mailbox");
        }
        self.copy_from(from, id).await?;
        from.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u32) -> ImapUidvalidity {
        ImapUidvalidity::new(n).unwrap()
    }

    #[tokio::test]
    async fn append_then_fetch() {
        let mbox = Mailbox::new(gen_ident(), uid(1));
        let (_, first_uid) = mbox
            .append(
                b"Subject: hi\r\n\r\nbody\r\n".to_vec(),
                None,
                &["\\Recent".to_string()],
                0,
            )
            .await
            .unwrap();
        assert_eq!(first_uid, ImapUid::new(1).unwrap());

        let index = mbox.current_uid_index().await;
        let ident = *index.idx_by_uid.get(&first_uid).unwrap();
        let stored = mbox.fetch_full(ident).await.unwrap();
        assert!(stored.raw().starts_with(b"Subject: hi"));
    }

    #[tokio::test]
    async fn delete_removes_from_index_and_storage() {
        let mbox = Mailbox::new(gen_ident(), uid(1));
        mbox.append(b"\r\n\r\nx\r\n".to_vec(), None, &[], 0)
            .await
            .unwrap();
        let index = mbox.current_uid_index().await;
        let (ident, _) = index.table.iter().next().unwrap();
        mbox.delete(*ident).await.unwrap();
        assert!(mbox.fetch_full(*ident).await.is_err());
    }

    #[tokio::test]
    async fn copy_preserves_flags_and_content() {
        let a = Mailbox::new(gen_ident(), uid(1));
        let b = Mailbox::new(gen_ident(), uid(1));
        a.append(
            b"Subject: x\r\n\r\nbody\r\n".to_vec(),
            None,
            &["\\Flagged".to_string()],
            0,
        )
        .await
        .unwrap();
        let a_index = a.current_uid_index().await;
        let (source_id, _) = a_index.table.iter().next().unwrap();

        let new_id = b.copy_from(&a, *source_id).await.unwrap();
        let b_index = b.current_uid_index().await;
        let (_, _, flags) = b_index.table.get(&new_id).unwrap();
        assert_eq!(flags, &vec!["\\Flagged".to_string()]);
    }
}
