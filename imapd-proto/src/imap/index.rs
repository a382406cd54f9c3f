//! Resolves sequence-sets (`2:4`, `1:*`, UID variants) against a mailbox
//! snapshot into concrete message handles, carrying just enough index data
//! (position, UID, MODSEQ, flags) for FETCH/STORE/SEARCH to filter on
//! without touching message content.

use std::num::{NonZeroU32, NonZeroU64};

use anyhow::{anyhow, Context, Result};
use imap_codec::imap_types::sequence::{self, SeqOrUid, Sequence, SequenceSet};

use imapd_collections::mail::uidindex::{ImapUid, ModSeq, UidIndex};
use imapd_collections::unique_ident::UniqueIdent;

pub struct Index<'a> {
    pub imap_index: Vec<MailIndex<'a>>,
    pub internal: &'a UidIndex,
}

impl<'a> Index<'a> {
    pub fn new(internal: &'a UidIndex) -> Result<Self> {
        let imap_index = internal
            .idx_by_uid
            .iter()
            .enumerate()
            .map(|(i_enum, (&uid, &uuid))| {
                let (_, modseq, flags) = internal
                    .table
                    .get(&uuid)
                    .ok_or_else(|| anyhow!("mail is missing from index"))?;
                let i_int: u32 = (i_enum + 1).try_into()?;
                let i: NonZeroU32 = i_int.try_into()?;

                Ok(MailIndex {
                    i,
                    uid,
                    uuid,
                    modseq: *modseq,
                    flags,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            imap_index,
            internal,
        })
    }

    pub fn last(&'a self) -> Option<&'a MailIndex<'a>> {
        self.imap_index.last()
    }

    /// Fetch mail descriptors based on a sequence of UID.
    ///
    /// Complexity: sorting the unrolled sequence is O(n log n); locating the
    /// starting point in the index is O(log m). Assumes n << m, which holds
    /// for the small sequence sets clients typically send — not for a
    /// whole-mailbox search.
    pub fn fetch_on_uid(&'a self, sequence_set: &SequenceSet) -> Vec<&'a MailIndex<'a>> {
        if self.imap_index.is_empty() {
            return vec![];
        }
        let iter_strat = sequence::Strategy::Naive {
            largest: self.last().expect("imap index is not empty").uid,
        };
        let mut unroll_seq = sequence_set.iter(iter_strat).collect::<Vec<_>>();
        unroll_seq.sort();

        let start_seq = match unroll_seq.iter().next() {
            Some(elem) => elem,
            None => return vec![],
        };

        let mut imap_idx = {
            let start_idx = self
                .imap_index
                .partition_point(|mail_idx| &mail_idx.uid < start_seq);
            &self.imap_index[start_idx..]
        };

        let mut acc = vec![];
        for wanted_uid in unroll_seq.iter() {
            let start_idx = match imap_idx.iter().position(|midx| &midx.uid >= wanted_uid) {
                Some(v) => v,
                None => break,
            };
            imap_idx = &imap_idx[start_idx..];

            if &imap_idx[0].uid == wanted_uid {
                acc.push(&imap_idx[0]);
            }
        }

        acc
    }

    pub fn fetch_on_id(&'a self, sequence_set: &SequenceSet) -> Result<Vec<&'a MailIndex<'a>>> {
        let iter_strat = sequence::Strategy::Naive {
            largest: self.last().context("The mailbox is empty")?.uid,
        };
        sequence_set
            .iter(iter_strat)
            .map(|wanted_id| {
                self.imap_index
                    .get((wanted_id.get() as usize) - 1)
                    .ok_or_else(|| anyhow!("Mail not found"))
            })
            .collect::<Result<Vec<_>>>()
    }

    pub fn fetch(&'a self, sequence_set: &SequenceSet, by_uid: bool) -> Result<Vec<&'a MailIndex<'a>>> {
        match by_uid {
            true => Ok(self.fetch_on_uid(sequence_set)),
            _ => self.fetch_on_id(sequence_set),
        }
    }

    /// `fetch` restricted to messages whose MODSEQ is strictly greater than
    /// `changed_since` (the `CHANGEDSINCE` FETCH modifier). No modifier
    /// means no filtering.
    pub fn fetch_changed_since(
        &'a self,
        sequence_set: &SequenceSet,
        changed_since: Option<NonZeroU64>,
        by_uid: bool,
    ) -> Result<Vec<&'a MailIndex<'a>>> {
        let selection = self.fetch(sequence_set, by_uid)?;
        Ok(match changed_since {
            None => selection,
            Some(since) => selection
                .into_iter()
                .filter(|midx| midx.modseq.get() > since.get())
                .collect(),
        })
    }

    /// Splits a STORE selection into messages that may be edited
    /// (`UNCHANGEDSINCE` is satisfied, or absent) and ones that are in
    /// conflict (modified more recently than the client's view).
    pub fn fetch_unchanged_since(
        &'a self,
        sequence_set: &SequenceSet,
        unchanged_since: Option<NonZeroU64>,
        by_uid: bool,
    ) -> Result<(Vec<&'a MailIndex<'a>>, Vec<&'a MailIndex<'a>>)> {
        let selection = self.fetch(sequence_set, by_uid)?;
        Ok(match unchanged_since {
            None => (selection, vec![]),
            Some(since) => selection
                .into_iter()
                .partition(|midx| midx.modseq.get() <= since.get()),
        })
    }
}

#[derive(Clone, Debug)]
pub struct MailIndex<'a> {
    pub i: NonZeroU32,
    pub uid: ImapUid,
    pub uuid: UniqueIdent,
    pub modseq: ModSeq,
    pub flags: &'a Vec<String>,
}

impl<'a> MailIndex<'a> {
    // The following functions are used to implement the SEARCH command.
    pub fn is_in_sequence_i(&self, seq: &Sequence) -> bool {
        match seq {
            Sequence::Single(SeqOrUid::Asterisk) => true,
            Sequence::Single(SeqOrUid::Value(target)) => target == &self.i,
            Sequence::Range(SeqOrUid::Asterisk, SeqOrUid::Value(x))
            | Sequence::Range(SeqOrUid::Value(x), SeqOrUid::Asterisk) => x <= &self.i,
            Sequence::Range(SeqOrUid::Value(x1), SeqOrUid::Value(x2)) => {
                if x1 < x2 {
                    x1 <= &self.i && &self.i <= x2
                } else {
                    x1 >= &self.i && &self.i >= x2
                }
            }
            Sequence::Range(SeqOrUid::Asterisk, SeqOrUid::Asterisk) => true,
        }
    }

    pub fn is_in_sequence_uid(&self, seq: &Sequence) -> bool {
        match seq {
            Sequence::Single(SeqOrUid::Asterisk) => true,
            Sequence::Single(SeqOrUid::Value(target)) => target == &self.uid,
            Sequence::Range(SeqOrUid::Asterisk, SeqOrUid::Value(x))
            | Sequence::Range(SeqOrUid::Value(x), SeqOrUid::Asterisk) => x <= &self.uid,
            Sequence::Range(SeqOrUid::Value(x1), SeqOrUid::Value(x2)) => {
                if x1 < x2 {
                    x1 <= &self.uid && &self.uid <= x2
                } else {
                    x1 >= &self.uid && &self.uid >= x2
                }
            }
            Sequence::Range(SeqOrUid::Asterisk, SeqOrUid::Asterisk) => true,
        }
    }

    pub fn is_flag_set(&self, flag: &str) -> bool {
        self.flags
            .iter()
            .any(|candidate| candidate.as_str() == flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imapd_collections::mail::uidindex::{ImapUidvalidity, UidIndexOp};
    use imapd_collections::unique_ident::gen_ident;

    fn sample_index(n: usize) -> UidIndex {
        let mut idx = UidIndex::default();
        let op = idx.op_bump_uidvalidity(1);
        idx = idx.apply(&op);
        for _ in 0..n {
            let op = idx.op_mail_add(gen_ident(), vec![]);
            idx = idx.apply(&op);
        }
        idx
    }

    #[test]
    fn fetch_unchanged_since_splits_on_modseq() {
        let idx = sample_index(1);
        let uuid = *idx.idx_by_uid.values().next().unwrap();
        let (_, modseq, _) = idx.table.get(&uuid).unwrap();
        let before = NonZeroU64::new(modseq.get() - 1).unwrap();

        let index = Index::new(&idx).unwrap();
        let full_seq = SequenceSet(
            vec![Sequence::Range(SeqOrUid::Value(NonZeroU32::MIN), SeqOrUid::Asterisk)]
                .try_into()
                .unwrap(),
        );
        let (editable, conflict) = index.fetch_unchanged_since(&full_seq, Some(before), false).unwrap();
        assert!(editable.is_empty());
        assert_eq!(conflict.len(), 1);
    }
}
