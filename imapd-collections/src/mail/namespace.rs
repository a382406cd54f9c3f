//! A user's mailbox namespace: name → id mapping, UIDVALIDITY bookkeeping,
//! and the subscription set. Lives entirely in memory; no replication, so no
//! merge logic is needed — just a plain map behind the caller's lock.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};

use crate::mail::uidindex::ImapUidvalidity;
use crate::unique_ident::{gen_ident, UniqueIdent};

pub const MAILBOX_HIERARCHY_DELIMITER: char = '.';

/// INBOX is the only mailbox that must always exist; it's created
/// automatically when the account is created. IMAP allows renaming INBOX
/// away, in which case a fresh empty INBOX is created in its place.
pub const INBOX: &str = "INBOX";

// RFC6154 SPECIAL-USE mailboxes, created alongside INBOX by the demo loader.
pub const DRAFTS: &str = "Drafts";
pub const ARCHIVE: &str = "Archive";
pub const SENT: &str = "Sent";
pub const TRASH: &str = "Trash";

#[derive(Clone, Copy, Debug)]
struct MailboxListEntry {
    id: UniqueIdent,
    uidvalidity: ImapUidvalidity,
}

/// The set of mailboxes belonging to one user: name → id/uidvalidity, plus
/// which names are subscribed.
#[derive(Default)]
pub struct MailboxSet {
    mailboxes: BTreeMap<String, MailboxListEntry>,
    subscriptions: BTreeSet<String>,
    read_only: BTreeSet<String>,
}

pub enum CreatedMailbox {
    Created(UniqueIdent, ImapUidvalidity),
    Existed(UniqueIdent, ImapUidvalidity),
}

impl MailboxSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn existing_mailbox_names(&self) -> Vec<String> {
        self.mailboxes.keys().cloned().collect()
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.mailboxes.contains_key(name)
    }

    pub fn get_mailbox(&self, name: &str) -> Option<(ImapUidvalidity, UniqueIdent)> {
        self.mailboxes.get(name).map(|e| (e.uidvalidity, e.id))
    }

    pub fn create_mailbox(&mut self, name: &str) -> CreatedMailbox {
        if let Some(e) = self.mailboxes.get(name) {
            return CreatedMailbox::Existed(e.id, e.uidvalidity);
        }

        let id = gen_ident();
        let uidvalidity = ImapUidvalidity::new(1).unwrap();
        self.mailboxes
            .insert(name.to_string(), MailboxListEntry { id, uidvalidity });
        CreatedMailbox::Created(id, uidvalidity)
    }

    pub fn delete_mailbox(&mut self, name: &str) -> Result<UniqueIdent> {
        match self.mailboxes.remove(name) {
            Some(e) => {
                self.subscriptions.remove(name);
                self.read_only.remove(name);
                Ok(e.id)
            }
            None => bail!("Mailbox {} does not exist", name),
        }
    }

    /// Renames `old_name` to `new_name`, bumping UIDVALIDITY on the new name
    /// so that clients that had the old name open reload.
    pub fn rename_mailbox(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if self.mailboxes.contains_key(new_name) {
            bail!(
                "Cannot rename {} into {}: {} already exists",
                old_name,
                new_name,
                new_name
            );
        }
        let entry = self
            .mailboxes
            .remove(old_name)
            .ok_or_else(|| anyhow::anyhow!("Cannot rename {}: does not exist", old_name))?;

        let bumped = MailboxListEntry {
            id: entry.id,
            uidvalidity: ImapUidvalidity::new(entry.uidvalidity.get() + 1).unwrap(),
        };
        self.mailboxes.insert(new_name.to_string(), bumped);

        if self.subscriptions.remove(old_name) {
            self.subscriptions.insert(new_name.to_string());
        }
        if self.read_only.remove(old_name) {
            self.read_only.insert(new_name.to_string());
        }
        Ok(())
    }

    pub fn subscribe(&mut self, name: &str) {
        self.subscriptions.insert(name.to_string());
    }

    pub fn unsubscribe(&mut self, name: &str) {
        self.subscriptions.remove(name);
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions.contains(name)
    }

    pub fn subscribed_names(&self) -> Vec<String> {
        self.subscriptions.iter().cloned().collect()
    }

    /// Marks a mailbox read-only. Sticky: once set, never cleared for the
    /// lifetime of the mailbox (set-on-sight, as for a `.readonly` sentinel
    /// found mid-load).
    pub fn mark_read_only(&mut self, name: &str) {
        self.read_only.insert(name.to_string());
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.read_only.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_lookup() {
        let mut set = MailboxSet::new();
        let CreatedMailbox::Created(id, uidvalidity) = set.create_mailbox(INBOX) else {
            panic!("expected a fresh mailbox");
        };
        assert_eq!(uidvalidity.get(), 1);
        assert_eq!(set.get_mailbox(INBOX), Some((uidvalidity, id)));
    }

    #[test]
    fn create_is_idempotent() {
        let mut set = MailboxSet::new();
        let CreatedMailbox::Created(id1, _) = set.create_mailbox(DRAFTS) else {
            panic!()
        };
        let CreatedMailbox::Existed(id2, _) = set.create_mailbox(DRAFTS) else {
            panic!("expected Existed on second create")
        };
        assert_eq!(id1, id2);
    }

    #[test]
    fn rename_bumps_uidvalidity_and_preserves_subscription() {
        let mut set = MailboxSet::new();
        set.create_mailbox(DRAFTS);
        set.subscribe(DRAFTS);
        let (old_uidvalidity, id) = set.get_mailbox(DRAFTS).unwrap();

        set.rename_mailbox(DRAFTS, "Brouillons").unwrap();

        assert!(!set.has_mailbox(DRAFTS));
        let (new_uidvalidity, new_id) = set.get_mailbox("Brouillons").unwrap();
        assert_eq!(id, new_id);
        assert!(new_uidvalidity > old_uidvalidity);
        assert!(!set.is_subscribed(DRAFTS));
        assert!(set.is_subscribed("Brouillons"));
    }

    #[test]
    fn rename_rejects_existing_target() {
        let mut set = MailboxSet::new();
        set.create_mailbox(DRAFTS);
        set.create_mailbox(SENT);
        assert!(set.rename_mailbox(DRAFTS, SENT).is_err());
    }

    #[test]
    fn delete_removes_subscription() {
        let mut set = MailboxSet::new();
        set.create_mailbox(TRASH);
        set.subscribe(TRASH);
        set.delete_mailbox(TRASH).unwrap();
        assert!(!set.has_mailbox(TRASH));
        assert!(!set.is_subscribed(TRASH));
    }
}
