//! Projects one fetched message (index metadata plus, when requested, its
//! parsed content) onto the `MessageDataItem`s a `FETCH` attribute list
//! asked for.

use std::num::NonZeroU32;

use anyhow::{anyhow, bail, Result};
use chrono::{Offset, TimeZone, Utc};

use imap_codec::imap_types::core::{IString, NString};
use imap_codec::imap_types::datetime::DateTime;
use imap_codec::imap_types::fetch::{MessageDataItem, MessageDataItemName, Section as FetchSection};
use imap_codec::imap_types::flag::Flag;
use imap_codec::imap_types::response::Data;

use imapd_collections::mail::mailbox::StoredMessage;
use imapd_collections::mail::query::QueryResult;
use imapd_mime::MessageContent;

use crate::imap::attributes::AttributesProxy;
use crate::imap::flags;
use crate::imap::imf_view::ImfView;
use crate::imap::index::MailIndex;
use crate::imap::mime_view;
use crate::imap::response::Body;

fn nstring(raw: &[u8]) -> Result<NString<'static>> {
    Ok(NString(Some(
        IString::try_from(raw.to_vec()).map_err(|e| anyhow!("invalid IMAP string: {e}"))?,
    )))
}

pub struct MailView<'a> {
    pub in_idx: &'a MailIndex<'a>,
    pub query_result: &'a QueryResult,
    pub content: FetchedMail<'a>,
}

impl<'a> MailView<'a> {
    pub fn new(query_result: &'a QueryResult, in_idx: &'a MailIndex<'a>) -> Result<MailView<'a>> {
        let content = match query_result.message() {
            Some(message) => FetchedMail::Full(message.as_ref()),
            None => FetchedMail::IndexOnly,
        };
        Ok(Self {
            in_idx,
            query_result,
            content,
        })
    }

    pub fn filter(&self, ap: &AttributesProxy) -> Result<(Body<'static>, SeenFlag)> {
        let mut seen = SeenFlag::DoNothing;
        let res_attrs = ap
            .attrs
            .iter()
            .map(|attr| match attr {
                MessageDataItemName::Uid => Ok(self.uid()),
                MessageDataItemName::Flags => Ok(self.flags()),
                MessageDataItemName::Rfc822Size => self.rfc822_size(),
                MessageDataItemName::Rfc822Header => self.rfc822_header(),
                MessageDataItemName::Rfc822Text => self.rfc822_text(),
                MessageDataItemName::Rfc822 => self.rfc822(),
                MessageDataItemName::Envelope => self.envelope(),
                MessageDataItemName::Body => self.body(),
                MessageDataItemName::BodyStructure => self.body_structure(),
                MessageDataItemName::BodyExt {
                    section,
                    partial,
                    peek,
                } => {
                    let (body, has_seen) = self.body_ext(section, partial, peek)?;
                    seen = has_seen;
                    Ok(body)
                }
                MessageDataItemName::InternalDate => self.internal_date(),
                MessageDataItemName::ModSeq => Ok(self.modseq()),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((
            Body::Data(Data::Fetch {
                seq: self.in_idx.i,
                items: res_attrs.try_into()?,
            }),
            seen,
        ))
    }

    fn stored(&self) -> Result<&'a StoredMessage> {
        match &self.content {
            FetchedMail::Full(m) => Ok(*m),
            FetchedMail::IndexOnly => bail!("the message body must be fetched, not only its index entry"),
        }
    }

    pub(crate) fn message(&self) -> Result<&'a MessageContent> {
        Ok(&self.stored()?.content)
    }

    /// Exposed for criteria that need metadata (size, date) without caring
    /// about the rest of the FETCH machinery.
    pub(crate) fn raw_size(&self) -> Result<usize> {
        Ok(self.stored()?.rfc822_size)
    }

    pub(crate) fn raw_internaldate_secs(&self) -> Result<i64> {
        Ok(i64::try_from(self.stored()?.internaldate / 1000)?)
    }

    fn uid(&self) -> MessageDataItem<'static> {
        MessageDataItem::Uid(self.in_idx.uid)
    }

    fn modseq(&self) -> MessageDataItem<'static> {
        MessageDataItem::ModSeq(self.in_idx.modseq)
    }

    fn flags(&self) -> MessageDataItem<'static> {
        MessageDataItem::Flags(
            self.in_idx
                .flags
                .iter()
                .filter_map(|f| flags::from_str(f))
                .collect(),
        )
    }

    fn rfc822_size(&self) -> Result<MessageDataItem<'static>> {
        Ok(MessageDataItem::Rfc822Size(self.stored()?.rfc822_size as u32))
    }

    fn rfc822_header(&self) -> Result<MessageDataItem<'static>> {
        let hdrs = nstring(self.message()?.header.raw())?;
        Ok(MessageDataItem::Rfc822Header(hdrs))
    }

    fn rfc822_text(&self) -> Result<MessageDataItem<'static>> {
        let txt = nstring(self.message()?.body_raw())?;
        Ok(MessageDataItem::Rfc822Text(txt))
    }

    fn rfc822(&self) -> Result<MessageDataItem<'static>> {
        let full = nstring(self.message()?.raw())?;
        Ok(MessageDataItem::Rfc822(full))
    }

    fn envelope(&self) -> Result<MessageDataItem<'static>> {
        Ok(MessageDataItem::Envelope(
            ImfView(&self.message()?.header).message_envelope(),
        ))
    }

    fn body(&self) -> Result<MessageDataItem<'static>> {
        Ok(MessageDataItem::Body(mime_view::bodystructure(
            self.message()?,
            false,
        )?))
    }

    fn body_structure(&self) -> Result<MessageDataItem<'static>> {
        Ok(MessageDataItem::BodyStructure(mime_view::bodystructure(
            self.message()?,
            true,
        )?))
    }

    /// Maps to `BODY[<section>]<<partial>>` and `BODY.PEEK[<section>]<<partial>>`.
    /// Peek does not implicitly set `\Seen`.
    fn body_ext(
        &self,
        section: &Option<FetchSection<'static>>,
        partial: &Option<(u32, NonZeroU32)>,
        peek: &bool,
    ) -> Result<(MessageDataItem<'static>, SeenFlag)> {
        let seen_flag = Flag::Seen.to_string();
        let seen = if !peek && !self.in_idx.flags.iter().any(|x| *x == seen_flag) {
            SeenFlag::MustAdd
        } else {
            SeenFlag::DoNothing
        };

        let (text, origin) = match mime_view::body_ext(self.message()?, section, partial)? {
            mime_view::BodySection::Full(body) => (body, None),
            mime_view::BodySection::Slice { body, origin_octet } => (body, Some(origin_octet)),
        };

        let data = nstring(&text)?;

        Ok((
            MessageDataItem::BodyExt {
                section: section.clone(),
                origin,
                data,
            },
            seen,
        ))
    }

    fn internal_date(&self) -> Result<MessageDataItem<'static>> {
        let dt = Utc
            .fix()
            .timestamp_opt(i64::try_from(self.stored()?.internaldate / 1000)?, 0)
            .earliest()
            .ok_or_else(|| anyhow!("unable to interpret internal date"))?;
        Ok(MessageDataItem::InternalDate(DateTime::unvalidated(dt)))
    }
}

pub enum SeenFlag {
    DoNothing,
    MustAdd,
}

/// How much of a message was fetched from storage: just its index entry
/// (flags/UID/MODSEQ, no I/O), or the parsed content tree.
pub enum FetchedMail<'a> {
    IndexOnly,
    Full(&'a StoredMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap_codec::imap_types::fetch::{MacroOrMessageDataItemNames, MessageDataItemName};
    use imapd_collections::mail::uidindex::ImapUid;
    use imapd_collections::unique_ident::gen_ident;
    use std::num::NonZeroU32;

    fn sample_index<'a>() -> MailIndex<'a> {
        MailIndex {
            i: NonZeroU32::new(1).unwrap(),
            uid: ImapUid::new(1).unwrap(),
            uuid: gen_ident(),
            modseq: NonZeroU32::new(1).unwrap().into(),
            flags: Box::leak(Box::new(vec![])),
        }
    }

    #[test]
    fn index_only_rejects_body_attributes() {
        let midx = sample_index();
        let qr = QueryResult::IndexResult {
            uuid: midx.uuid,
            index: (midx.uid, midx.modseq, vec![]),
        };
        let view = MailView::new(&qr, &midx).unwrap();
        let ap = AttributesProxy::new(
            &MacroOrMessageDataItemNames::MessageDataItemNames(vec![MessageDataItemName::Rfc822]),
            &[],
            false,
        );
        assert!(view.filter(&ap).is_err());
    }
}
