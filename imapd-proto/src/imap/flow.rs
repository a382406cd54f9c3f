//! The session state machine: which commands are legal depends on whether
//! the connection is unauthenticated, authenticated, has a mailbox selected,
//! or is idling. `State::apply` is the only place transitions happen so
//! illegal ones (e.g. SELECT before LOGIN) are rejected in one spot.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use imap_codec::imap_types::core::Tag;
use tokio::sync::Notify;

use imapd_collections::User;

use crate::imap::mailbox_view::MailboxView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxPerm {
    ReadWrite,
    ReadOnly,
}

pub enum State {
    NotAuthenticated,
    Authenticated(Arc<User>),
    Selected(Arc<User>, MailboxView, MailboxPerm),
    Idle(Arc<User>, MailboxView, MailboxPerm, Tag<'static>, Arc<Notify>),
    Logout,
}

pub enum Transition {
    None,
    Authenticate(Arc<User>),
    Select(MailboxView, MailboxPerm),
    Unselect,
    Idle(Tag<'static>, Notify),
    UnIdle,
    Logout,
}

impl State {
    /// Applies `tr`, replacing `self` on success. On an illegal transition
    /// `self` is left untouched and an error is returned.
    pub fn apply(&mut self, tr: Transition) -> Result<()> {
        let cur = std::mem::replace(self, State::Logout);
        let (next, result) = match (cur, tr) {
            (cur, Transition::None) => (cur, Ok(())),
            (cur, Transition::Logout) => (State::Logout, Ok(())),

            (State::NotAuthenticated, Transition::Authenticate(user)) => {
                (State::Authenticated(user), Ok(()))
            }

            (State::Authenticated(user), Transition::Select(mbx, perm)) => {
                (State::Selected(user, mbx, perm), Ok(()))
            }
            (State::Selected(user, _, _), Transition::Select(mbx, perm)) => {
                (State::Selected(user, mbx, perm), Ok(()))
            }
            (State::Selected(user, _, _), Transition::Unselect) => {
                (State::Authenticated(user), Ok(()))
            }
            (State::Selected(user, mbx, perm), Transition::Idle(tag, notify)) => (
                State::Idle(user, mbx, perm, tag, Arc::new(notify)),
                Ok(()),
            ),
            (State::Idle(user, mbx, perm, _, _), Transition::UnIdle) => {
                (State::Selected(user, mbx, perm), Ok(()))
            }

            (cur, _) => (cur, Err(anyhow!("illegal state transition"))),
        };
        *self = next;
        result
    }

    /// The stop-signal to wait on while idling, if any.
    pub fn notify(&self) -> Option<Arc<Notify>> {
        match self {
            State::Idle(_, _, _, _, n) => Some(n.clone()),
            _ => None,
        }
    }
}
