//! Evaluates a `SEARCH` key against the mailbox. Splits the work in two
//! passes: anything decidable from index data alone (flags, sequence/UID
//! membership) is resolved without touching storage; criteria that need a
//! header, date, size or body fall back to fetching the message and are
//! evaluated against its full content.

use std::num::NonZeroU32;

use anyhow::Result;
use chrono::{Offset, TimeZone, Utc};

use imap_codec::imap_types::core::{AString, NonEmptyVec};
use imap_codec::imap_types::search::SearchKey;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};

use imapd_collections::mail::query::QueryScope;

use crate::imap::index::MailIndex;
use crate::imap::mail_view::MailView;
use crate::imap::mime_view::astring_lossy;

pub enum SeqType {
    Undefined,
    NonUid,
    Uid,
}
impl SeqType {
    pub fn is_uid(&self) -> bool {
        matches!(self, Self::Uid)
    }
}

pub struct Criteria<'a>(pub &'a SearchKey<'a>);
impl<'a> Criteria<'a> {
    /// Returns a set of sequence identifiers that is greater or equal to
    /// the set of messages that will actually match.
    pub fn to_sequence_set(&self) -> (SequenceSet, SeqType) {
        match self.0 {
            SearchKey::All => (sequence_set_all(), SeqType::Undefined),
            SearchKey::SequenceSet(seq_set) => (seq_set.clone(), SeqType::NonUid),
            SearchKey::Uid(seq_set) => (seq_set.clone(), SeqType::Uid),
            SearchKey::Not(_inner) => {
                tracing::debug!("using NOT in a search request is slow: it selects all identifiers");
                (sequence_set_all(), SeqType::Undefined)
            }
            SearchKey::Or(left, right) => {
                tracing::debug!("using OR in a search request is slow: no deduplication is done");
                let (base, base_seqtype) = Self(left).to_sequence_set();
                let (ext, ext_seqtype) = Self(right).to_sequence_set();

                match (base_seqtype, ext_seqtype) {
                    (SeqType::Uid, SeqType::NonUid) | (SeqType::NonUid, SeqType::Uid) => {
                        (sequence_set_all(), SeqType::Undefined)
                    }
                    (SeqType::Undefined, x) | (x, _) => {
                        let mut new_vec = base.0.into_inner();
                        new_vec.extend_from_slice(ext.0.as_ref());
                        let seq = SequenceSet(
                            NonEmptyVec::try_from(new_vec).expect("merging non empty vecs stays non empty"),
                        );
                        (seq, x)
                    }
                }
            }
            SearchKey::And(search_list) => {
                tracing::debug!("using AND in a search request is slow: no intersection is performed");
                search_list
                    .as_ref()
                    .iter()
                    .map(|crit| Self(crit).to_sequence_set())
                    .min_by(|(x, _), (y, _)| approx_sequence_set_size(x).cmp(&approx_sequence_set_size(y)))
                    .unwrap_or((sequence_set_all(), SeqType::Undefined))
            }
            _ => (sequence_set_all(), SeqType::Undefined),
        }
    }

    /// Whether evaluating this key needs anything beyond index data: a
    /// header field, a date, or a size.
    pub fn need_meta(&self) -> bool {
        use SearchKey::*;
        match self.0 {
            Bcc(_) | Cc(_) | From(_) | Header(..) | SentBefore(_) | SentOn(_) | SentSince(_) | Subject(_)
            | To(_) => true,
            Before(_) | On(_) | Since(_) => true,
            Larger(_) | Smaller(_) => true,
            And(and_list) => and_list.as_ref().iter().any(|sk| Criteria(sk).need_meta()),
            Not(inner) => Criteria(inner).need_meta(),
            Or(left, right) => Criteria(left).need_meta() || Criteria(right).need_meta(),
            _ => false,
        }
    }

    /// Whether evaluating this key needs the message body.
    pub fn need_body(&self) -> bool {
        use SearchKey::*;
        match self.0 {
            Text(_) | Body(_) => true,
            And(and_list) => and_list.as_ref().iter().any(|sk| Criteria(sk).need_body()),
            Not(inner) => Criteria(inner).need_body(),
            Or(left, right) => Criteria(left).need_body() || Criteria(right).need_body(),
            _ => false,
        }
    }

    /// Decides which scope a `Query` needs in order to evaluate this
    /// criteria: a body fetch, just metadata, or nothing past the index.
    pub fn query_scope(&self) -> QueryScope {
        if self.need_body() {
            QueryScope::Full
        } else if self.need_meta() {
            QueryScope::Partial
        } else {
            QueryScope::Index
        }
    }

    /// Whether this search is a plain CONDSTORE-aware query whose response
    /// should carry a MODSEQ. `MODSEQ` as a search term itself is not part
    /// of the grammar this server accepts, so this is conservatively always
    /// `false`: CONDSTORE search results never tag a highest MODSEQ.
    pub fn is_modseq(&self) -> bool {
        false
    }

    /// Splits a selection into messages this key can already decide on
    /// (kept) and ones that need a fetch to be resolved (to_fetch).
    pub fn filter_on_idx<'b>(
        &self,
        selection: &[&'b MailIndex<'b>],
    ) -> (Vec<&'b MailIndex<'b>>, Vec<&'b MailIndex<'b>>) {
        if self.need_meta() || self.need_body() {
            (vec![], selection.to_vec())
        } else {
            selection
                .iter()
                .copied()
                .partition(|midx| eval_idx(self.0, midx))
        }
    }

    /// Full evaluation against a fetched message: used for the messages
    /// `filter_on_idx` couldn't decide from the index alone.
    pub fn is_keep_on_query(&self, mv: &MailView) -> bool {
        eval_full(self.0, mv).unwrap_or(false)
    }
}

fn sequence_set_all() -> SequenceSet {
    SequenceSet::from(Sequence::Range(SeqOrUid::Value(NonZeroU32::MIN), SeqOrUid::Asterisk))
}

// Overestimates set size: sequences can overlap.
fn approx_sequence_set_size(seq_set: &SequenceSet) -> u64 {
    seq_set
        .0
        .as_ref()
        .iter()
        .fold(0u64, |acc, seq| acc.saturating_add(approx_sequence_size(seq)))
}

// Underestimates on `*`-bounded ranges if the mailbox is huge, and UID
// ranges can have holes the size doesn't account for.
fn approx_sequence_size(seq: &Sequence) -> u64 {
    match seq {
        Sequence::Single(_) => 1,
        Sequence::Range(SeqOrUid::Asterisk, _) | Sequence::Range(_, SeqOrUid::Asterisk) => u64::MAX,
        Sequence::Range(SeqOrUid::Value(x1), SeqOrUid::Value(x2)) => {
            let x2 = x2.get() as i64;
            let x1 = x1.get() as i64;
            (x2 - x1).abs().try_into().unwrap_or(1)
        }
    }
}

fn eval_idx(key: &SearchKey, midx: &MailIndex) -> bool {
    use SearchKey::*;
    match key {
        All => true,
        SequenceSet(seq) => seq.0.as_ref().iter().any(|s| midx.is_in_sequence_i(s)),
        Uid(seq) => seq.0.as_ref().iter().any(|s| midx.is_in_sequence_uid(s)),
        Answered => midx.is_flag_set("\\Answered"),
        Unanswered => !midx.is_flag_set("\\Answered"),
        Deleted => midx.is_flag_set("\\Deleted"),
        Undeleted => !midx.is_flag_set("\\Deleted"),
        Draft => midx.is_flag_set("\\Draft"),
        Undraft => !midx.is_flag_set("\\Draft"),
        Flagged => midx.is_flag_set("\\Flagged"),
        Unflagged => !midx.is_flag_set("\\Flagged"),
        Seen => midx.is_flag_set("\\Seen"),
        Unseen => !midx.is_flag_set("\\Seen"),
        Recent => midx.is_flag_set("\\Recent"),
        Old => !midx.is_flag_set("\\Recent"),
        New => midx.is_flag_set("\\Recent") && !midx.is_flag_set("\\Seen"),
        Keyword(atom) => midx.is_flag_set(atom.inner()),
        Unkeyword(atom) => !midx.is_flag_set(atom.inner()),
        And(list) => list.as_ref().iter().all(|sk| eval_idx(sk, midx)),
        Or(left, right) => eval_idx(left, midx) || eval_idx(right, midx),
        Not(inner) => !eval_idx(inner, midx),
        // Everything else needs metadata or body and is filtered out
        // upstream in `filter_on_idx` before this function is reached.
        _ => false,
    }
}

fn eval_full(key: &SearchKey, mv: &MailView) -> Result<bool> {
    use SearchKey::*;
    Ok(match key {
        And(list) => list.as_ref().iter().try_fold(true, |acc, sk| -> Result<bool> {
            Ok(acc && eval_full(sk, mv)?)
        })?,
        Or(left, right) => eval_full(left, mv)? || eval_full(right, mv)?,
        Not(inner) => !eval_full(inner, mv)?,

        Bcc(needle) => header_contains(mv, "bcc", needle)?,
        Cc(needle) => header_contains(mv, "cc", needle)?,
        From(needle) => header_contains(mv, "from", needle)?,
        To(needle) => header_contains(mv, "to", needle)?,
        Subject(needle) => header_contains(mv, "subject", needle)?,
        Header(name, needle) => header_contains(mv, &astring_lossy(name), needle)?,

        Larger(n) => mv.raw_size()? > *n as usize,
        Smaller(n) => mv.raw_size()? < *n as usize,

        Before(date) => internal_date(mv)? < *date.as_ref(),
        On(date) => internal_date(mv)? == *date.as_ref(),
        Since(date) => internal_date(mv)? >= *date.as_ref(),

        SentBefore(date) => sent_date(mv)?.is_some_and(|d| d < *date.as_ref()),
        SentOn(date) => sent_date(mv)?.is_some_and(|d| d == *date.as_ref()),
        SentSince(date) => sent_date(mv)?.is_some_and(|d| d >= *date.as_ref()),

        Text(needle) => {
            let msg = mv.message()?;
            let hay = String::from_utf8_lossy(msg.raw());
            hay.to_lowercase().contains(&astring_lossy(needle).to_lowercase())
        }
        Body(needle) => {
            let msg = mv.message()?;
            let hay = String::from_utf8_lossy(msg.body_raw());
            hay.to_lowercase().contains(&astring_lossy(needle).to_lowercase())
        }

        // Everything index-decidable falls back to the same logic,
        // `in_idx` is always available on a `MailView`.
        _ => eval_idx(key, mv.in_idx),
    })
}

fn header_contains(mv: &MailView, field: &str, needle: &AString) -> Result<bool> {
    let msg = mv.message()?;
    let needle = astring_lossy(needle).to_lowercase();
    if needle.is_empty() {
        return Ok(msg.header.has(field));
    }
    Ok(msg
        .header
        .get_all(field)
        .iter()
        .any(|v| String::from_utf8_lossy(v).to_lowercase().contains(&needle)))
}

fn internal_date(mv: &MailView) -> Result<chrono::NaiveDate> {
    let secs = mv.raw_internaldate_secs()?;
    let dt = Utc
        .fix()
        .timestamp_opt(secs, 0)
        .earliest()
        .ok_or_else(|| anyhow::anyhow!("unable to interpret internal date"))?;
    Ok(dt.date_naive())
}

fn sent_date(mv: &MailView) -> Result<Option<chrono::NaiveDate>> {
    let msg = mv.message()?;
    let Some(raw) = msg.header.get_trimmed("date") else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&raw);
    Ok(chrono::DateTime::parse_from_rfc2822(text.trim())
        .ok()
        .map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap_codec::imap_types::core::Atom;
    use imapd_collections::mail::uidindex::ImapUid;
    use imapd_collections::unique_ident::gen_ident;

    fn idx_with_flags(flags: &'static [&'static str]) -> MailIndex<'static> {
        MailIndex {
            i: NonZeroU32::new(1).unwrap(),
            uid: ImapUid::new(1).unwrap(),
            uuid: gen_ident(),
            modseq: std::num::NonZeroU64::new(1).unwrap(),
            flags: Box::leak(Box::new(flags.iter().map(|f| f.to_string()).collect())),
        }
    }

    #[test]
    fn seen_flag_matches_index_only() {
        let midx = idx_with_flags(&["\\Seen"]);
        assert!(eval_idx(&SearchKey::Seen, &midx));
        assert!(!eval_idx(&SearchKey::Unseen, &midx));
    }

    #[test]
    fn keyword_checks_raw_flag_string() {
        let midx = idx_with_flags(&["Important"]);
        let atom = Atom::try_from("Important").unwrap();
        assert!(eval_idx(&SearchKey::Keyword(atom.clone()), &midx));
        assert!(!eval_idx(&SearchKey::Unkeyword(atom), &midx));
    }

    #[test]
    fn query_scope_escalates_to_body() {
        let needle = AString::try_from("hello").unwrap();
        let crit = Criteria(&SearchKey::Body(needle));
        assert!(matches!(crit.query_scope(), QueryScope::Full));
    }

    #[test]
    fn query_scope_stays_on_index_for_flags() {
        let crit = Criteria(&SearchKey::Seen);
        assert!(matches!(crit.query_scope(), QueryScope::Index));
    }
}
