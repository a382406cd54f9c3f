//! Builds an RFC 3501 ENVELOPE out of a parsed header block. `imapd-mime`
//! only indexes raw header field values, so address-list parsing (normally
//! the job of a full RFC 5322 grammar) happens right here, deliberately
//! simplified: it handles `Display Name <local@domain>` and bare
//! `local@domain` entries split on top-level commas, not nested groups,
//! routed addresses, or RFC 2047 encoded-words in the display name.

use imap_codec::imap_types::core::{IString, NString};
use imap_codec::imap_types::envelope::{Address, Envelope};

use imapd_mime::MessageHeader;

pub struct ImfView<'a>(pub &'a MessageHeader);

impl<'a> ImfView<'a> {
    fn text(&self, name: &str) -> Option<String> {
        self.0
            .get_trimmed(name)
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .filter(|s| !s.is_empty())
    }

    fn nstring(&self, name: &str) -> NString<'static> {
        NString(self.text(name).and_then(|s| IString::try_from(s).ok()))
    }

    fn addresses(&self, name: &str) -> Vec<Address<'static>> {
        self.text(name)
            .map(|raw| parse_addresses(&raw))
            .unwrap_or_default()
    }

    /// Envelope rules are defined in RFC 3501, section 7.4.2.
    ///
    /// If Sender/Reply-To are absent or empty, the corresponding envelope
    /// member defaults to From. Date/Subject/In-Reply-To/Message-ID are NIL
    /// when the header line is absent.
    pub fn message_envelope(&self) -> Envelope<'static> {
        let from = self.addresses("from");
        let sender = {
            let s = self.addresses("sender");
            if s.is_empty() {
                from.clone()
            } else {
                s
            }
        };
        let reply_to = {
            let r = self.addresses("reply-to");
            if r.is_empty() {
                from.clone()
            } else {
                r
            }
        };

        Envelope {
            date: self.nstring("date"),
            subject: self.nstring("subject"),
            from,
            sender,
            reply_to,
            to: self.addresses("to"),
            cc: self.addresses("cc"),
            bcc: self.addresses("bcc"),
            in_reply_to: self.nstring("in-reply-to"),
            message_id: self.nstring("message-id"),
        }
    }
}

/// Splits on commas outside of a quoted display name, then parses each
/// `Name <local@domain>` or bare `local@domain` entry.
fn parse_addresses(raw: &str) -> Vec<Address<'static>> {
    split_top_level(raw)
        .into_iter()
        .filter_map(|entry| parse_one(entry.trim()))
        .collect()
}

fn split_top_level(raw: &str) -> Vec<&str> {
    let bytes = raw.as_bytes();
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn parse_one(entry: &str) -> Option<Address<'static>> {
    if entry.is_empty() {
        return None;
    }

    let (name, addr_spec) = match (entry.find('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = entry[..open].trim().trim_matches('"').to_string();
            (
                (!name.is_empty()).then_some(name),
                entry[open + 1..close].trim(),
            )
        }
        _ => (None, entry),
    };

    if addr_spec.is_empty() {
        return None;
    }
    let (local, host) = addr_spec.rsplit_once('@').unwrap_or((addr_spec, ""));

    Some(Address {
        name: NString(name.and_then(|n| IString::try_from(n).ok())),
        // SMTP at-domain-list source routes have been obsolete since long
        // before this was written.
        adl: NString(None),
        mailbox: NString(IString::try_from(local.to_string()).ok()),
        host: NString((!host.is_empty()).then(|| IString::try_from(host.to_string()).ok()).flatten()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imapd_mime::MessageHeader;

    fn header_of(raw: &'static [u8]) -> MessageHeader {
        imapd_mime::parse(raw.to_vec()).header
    }

    #[test]
    fn envelope_defaults_sender_and_reply_to_from_from() {
        let h = header_of(b"From: Alice <alice@example.com>\r\nTo: bob@example.com\r\nSubject: hi\r\n\r\n");
        let env = ImfView(&h).message_envelope();
        assert_eq!(env.from.len(), 1);
        assert_eq!(env.sender.len(), 1);
        assert_eq!(env.reply_to.len(), 1);
        assert_eq!(env.to.len(), 1);
    }

    #[test]
    fn splits_multiple_recipients() {
        let h = header_of(b"From: a@a.a\r\nTo: b@b.b, c@c.c\r\n\r\n");
        let env = ImfView(&h).message_envelope();
        assert_eq!(env.to.len(), 2);
    }
}
