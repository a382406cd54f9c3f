use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;

use crate::mail::mailbox::Mailbox;
use crate::mail::namespace::{
    CreatedMailbox, MailboxSet, ARCHIVE, DRAFTS, INBOX, MAILBOX_HIERARCHY_DELIMITER, SENT, TRASH,
};
use crate::mail::uidindex::ImapUidvalidity;
use crate::unique_ident::UniqueIdent;

/// One logged-in account: its mailbox namespace plus the process-wide cache
/// of currently-open [`Mailbox`] handles.
pub struct User {
    pub username: String,
    namespace: Mutex<MailboxSet>,
    mailboxes: Mutex<HashMap<UniqueIdent, Weak<Mailbox>>>,
}

impl User {
    /// Returns the cached `User` for `username` if one is live, building a
    /// fresh one (with INBOX and the special-use mailboxes pre-created)
    /// otherwise. Mirrors the mailbox cache below: the process keeps a user
    /// alive for as long as any session references it.
    pub fn new(username: String) -> Arc<Self> {
        {
            let cache = USER_CACHE.lock().unwrap();
            if let Some(u) = cache.get(&username).and_then(Weak::upgrade) {
                return u;
            }
        }

        let user = Self::open(username.clone());

        let mut cache = USER_CACHE.lock().unwrap();
        if let Some(concurrent_user) = cache.get(&username).and_then(Weak::upgrade) {
            concurrent_user
        } else {
            cache.insert(username, Arc::downgrade(&user));
            user
        }
    }

    fn open(username: String) -> Arc<Self> {
        let user = Arc::new(Self {
            username,
            namespace: Mutex::new(MailboxSet::new()),
            mailboxes: Mutex::new(HashMap::new()),
        });

        let mut ns = user.namespace.lock().unwrap();
        ns.create_mailbox(INBOX);
        for mbx in [DRAFTS, ARCHIVE, SENT, TRASH] {
            ns.create_mailbox(mbx);
        }
        drop(ns);

        user
    }

    /// Lists the user's available mailbox names.
    pub fn list_mailboxes(&self) -> Vec<String> {
        self.namespace.lock().unwrap().existing_mailbox_names()
    }

    /// Opens an existing mailbox given its IMAP name.
    pub async fn open_mailbox(&self, name: &str) -> Result<Option<Arc<Mailbox>>> {
        let found = self.namespace.lock().unwrap().get_mailbox(name);
        match found {
            Some((uidvalidity, id)) => Ok(Some(self.open_mailbox_by_id(id, uidvalidity).await)),
            None => Ok(None),
        }
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.namespace.lock().unwrap().has_mailbox(name)
    }

    pub fn mark_mailbox_read_only(&self, name: &str) {
        self.namespace.lock().unwrap().mark_read_only(name)
    }

    pub fn is_mailbox_read_only(&self, name: &str) -> bool {
        self.namespace.lock().unwrap().is_read_only(name)
    }

    /// Creates a new mailbox in the user's IMAP namespace.
    pub fn create_mailbox(&self, name: &str) -> Result<()> {
        if name.ends_with(MAILBOX_HIERARCHY_DELIMITER) {
            bail!("Invalid mailbox name: {}", name);
        }

        match self.namespace.lock().unwrap().create_mailbox(name) {
            CreatedMailbox::Created(..) => Ok(()),
            CreatedMailbox::Existed(..) => Err(anyhow!("Mailbox {} already exists", name)),
        }
    }

    /// Deletes a mailbox in the user's IMAP namespace.
    pub fn delete_mailbox(&self, name: &str) -> Result<()> {
        if name == INBOX {
            bail!("Cannot delete INBOX");
        }
        let id = self.namespace.lock().unwrap().delete_mailbox(name)?;
        self.mailboxes.lock().unwrap().remove(&id);
        Ok(())
    }

    /// Renames a mailbox in the user's IMAP namespace, cascading to every
    /// mailbox nested under it (`old_name.foo` → `new_name.foo`).
    pub fn rename_mailbox(&self, old_name: &str, new_name: &str) -> Result<()> {
        if old_name.ends_with(MAILBOX_HIERARCHY_DELIMITER) {
            bail!("Invalid mailbox name: {}", old_name);
        }
        if new_name.ends_with(MAILBOX_HIERARCHY_DELIMITER) {
            bail!("Invalid mailbox name: {}", new_name);
        }

        let mut ns = self.namespace.lock().unwrap();

        if old_name == INBOX {
            ns.rename_mailbox(old_name, new_name)?;
            ns.create_mailbox(INBOX);
            return Ok(());
        }

        let names = ns.existing_mailbox_names();
        let old_name_w_delim = format!("{}{}", old_name, MAILBOX_HIERARCHY_DELIMITER);
        let new_name_w_delim = format!("{}{}", new_name, MAILBOX_HIERARCHY_DELIMITER);

        if names
            .iter()
            .any(|x| x == new_name || x.starts_with(&new_name_w_delim))
        {
            bail!("Mailbox {} already exists", new_name);
        }

        for name in names.iter() {
            if name == old_name {
                ns.rename_mailbox(name, new_name)?;
            } else if let Some(tail) = name.strip_prefix(&old_name_w_delim) {
                let renamed = format!("{}{}", new_name_w_delim, tail);
                ns.rename_mailbox(name, &renamed)?;
            }
        }
        Ok(())
    }

    // ---- per-mailbox handle cache ----

    pub(crate) async fn open_mailbox_by_id(
        &self,
        id: UniqueIdent,
        min_uidvalidity: ImapUidvalidity,
    ) -> Arc<Mailbox> {
        {
            let cache = self.mailboxes.lock().unwrap();
            if let Some(mb) = cache.get(&id).and_then(Weak::upgrade) {
                return mb;
            }
        }

        let mb = Arc::new(Mailbox::new(id, min_uidvalidity));

        let mut cache = self.mailboxes.lock().unwrap();
        if let Some(concurrent_mb) = cache.get(&id).and_then(Weak::upgrade) {
            concurrent_mb
        } else {
            cache.insert(id, Arc::downgrade(&mb));
            mb
        }
    }
}

// Process-wide user cache: initialized at first login, never torn down —
// a session only ever holds a strong reference through `Arc<User>`.
lazy_static! {
    static ref USER_CACHE: Mutex<HashMap<String, Weak<User>>> = Mutex::new(HashMap::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_has_inbox_and_special_use_mailboxes() {
        let user = User::open("alice-test-1".to_string());
        let names = user.list_mailboxes();
        assert!(names.contains(&INBOX.to_string()));
        assert!(names.contains(&DRAFTS.to_string()));
        assert!(names.contains(&ARCHIVE.to_string()));
        assert!(names.contains(&SENT.to_string()));
        assert!(names.contains(&TRASH.to_string()));
    }

    #[test]
    fn cannot_delete_inbox() {
        let user = User::open("alice-test-2".to_string());
        assert!(user.delete_mailbox(INBOX).is_err());
    }

    #[test]
    fn rename_cascades_to_children() {
        let user = User::open("alice-test-3".to_string());
        user.create_mailbox("Work").unwrap();
        user.create_mailbox("Work.Projects").unwrap();

        user.rename_mailbox("Work", "Job").unwrap();

        let names = user.list_mailboxes();
        assert!(!names.contains(&"Work".to_string()));
        assert!(!names.contains(&"Work.Projects".to_string()));
        assert!(names.contains(&"Job".to_string()));
        assert!(names.contains(&"Job.Projects".to_string()));
    }

    #[tokio::test]
    async fn open_mailbox_by_id_is_cached() {
        let user = User::open("alice-test-4".to_string());
        let mb1 = user.open_mailbox(INBOX).await.unwrap().unwrap();
        let mb2 = user.open_mailbox(INBOX).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&mb1, &mb2));
    }
}
