//! Commands legal before a user is authenticated: CAPABILITY, LOGIN, and
//! AUTHENTICATE PLAIN. The server does not advertise SASL-IR continuation
//! support beyond the initial response, so AUTHENTICATE PLAIN only succeeds
//! when the client sends its credentials inline (`AUTHENTICATE PLAIN
//! <base64>`); without an initial response we ask the client to fall back to
//! LOGIN instead of implementing a second continuation round-trip.

use anyhow::Result;
use imap_codec::imap_types::auth::AuthMechanism;
use imap_codec::imap_types::command::{Command, CommandBody};
use imap_codec::imap_types::core::AString;

use imapd_user::login::ArcLoginProvider;

use crate::imap::capability::ServerCapability;
use crate::imap::command::anystate;
use crate::imap::flow;
use crate::imap::response::Response;

pub struct AnonymousContext<'a> {
    pub req: &'a Command<'static>,
    pub login_provider: &'a ArcLoginProvider,
    pub server_capabilities: &'a ServerCapability,
}

pub async fn dispatch<'a>(
    ctx: AnonymousContext<'a>,
) -> Result<(Response<'static>, flow::Transition)> {
    match &ctx.req.body {
        CommandBody::Noop => anystate::noop_nothing(ctx.req.tag.clone()),
        CommandBody::Capability => {
            anystate::capability(ctx.req.tag.clone(), ctx.server_capabilities)
        }
        CommandBody::Logout => anystate::logout(),
        CommandBody::Login { username, password } => ctx.login(username, password).await,
        CommandBody::Authenticate {
            mechanism,
            initial_response,
        } => ctx.authenticate(mechanism, initial_response).await,
        _ => anystate::wrong_state(ctx.req.tag.clone()),
    }
}

impl<'a> AnonymousContext<'a> {
    async fn login(
        self,
        username: &AString<'a>,
        password: &AString<'a>,
    ) -> Result<(Response<'static>, flow::Transition)> {
        let tag = self.req.tag.clone();
        let user = String::try_from(username.clone())?;
        let pass = String::try_from(password.clone())?;
        self.do_login(tag, &user, &pass).await
    }

    async fn authenticate(
        self,
        mechanism: &AuthMechanism<'a>,
        initial_response: &Option<imap_codec::imap_types::secret::Secret<std::borrow::Cow<'a, [u8]>>>,
    ) -> Result<(Response<'static>, flow::Transition)> {
        let tag = self.req.tag.clone();

        if !matches!(mechanism, AuthMechanism::Plain) {
            return Ok((
                Response::build()
                    .tag(tag)
                    .message("Unsupported SASL mechanism")
                    .no()?,
                flow::Transition::None,
            ));
        }

        let ir = match initial_response {
            Some(ir) => ir,
            None => {
                return Ok((
                    Response::build()
                        .tag(tag)
                        .message(
                            "AUTHENTICATE PLAIN requires an initial response; use LOGIN otherwise",
                        )
                        .bad()?,
                    flow::Transition::None,
                ))
            }
        };

        let (user, pass) = match parse_plain(ir.as_ref()) {
            Some(v) => v,
            None => {
                return Ok((
                    Response::build()
                        .tag(tag)
                        .message("Malformed PLAIN response")
                        .bad()?,
                    flow::Transition::None,
                ))
            }
        };

        self.do_login(tag, &user, &pass).await
    }

    async fn do_login(
        self,
        tag: imap_codec::imap_types::core::Tag<'static>,
        user: &str,
        pass: &str,
    ) -> Result<(Response<'static>, flow::Transition)> {
        tracing::info!(user = %user, "command.login");

        let creds = match self.login_provider.login(user, pass).await {
            Err(e) => {
                tracing::debug!(error=%e, "authentication failed");
                return Ok((
                    Response::build()
                        .tag(tag)
                        .message("Authentication failed")
                        .no()?,
                    flow::Transition::None,
                ));
            }
            Ok(c) => c,
        };

        let open_user = imapd_collections::user::User::new(creds.username);

        tracing::info!(username=%open_user.username, "connected");
        Ok((
            Response::build().tag(tag).message("LOGIN completed").ok()?,
            flow::Transition::Authenticate(open_user),
        ))
    }
}

/// Decodes a `PLAIN` initial response: `authzid\0authcid\0passwd`. The
/// authorization identity is accepted but unused — only `authcid` names the
/// account being logged into.
fn parse_plain(raw: &[u8]) -> Option<(String, String)> {
    let mut parts = raw.splitn(3, |&b| b == 0);
    let _authzid = parts.next()?;
    let authcid = parts.next()?;
    let passwd = parts.next()?;
    Some((
        String::from_utf8(authcid.to_vec()).ok()?,
        String::from_utf8(passwd.to_vec()).ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_response() {
        let raw = b"\0alice\0hunter2";
        let (user, pass) = parse_plain(raw).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "hunter2");
    }

    #[test]
    fn rejects_malformed_plain_response() {
        assert!(parse_plain(b"notenoughzeroes").is_none());
    }
}
