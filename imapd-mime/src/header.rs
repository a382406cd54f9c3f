//! Header folding and the lowercased-name → value index.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use crate::lines::{scan, Line};

/// One logical (possibly folded) header line: `(lowercased name, raw value)`.
///
/// `raw_value` keeps embedded fold whitespace verbatim; callers that want an
/// unfolded single-line value should collapse `CRLF` + leading whitespace
/// themselves, the way a FETCH ENVELOPE builder does.
#[derive(Debug, Clone)]
pub struct HeaderField {
    pub name: String,
    pub raw_value: Range<usize>,
}

/// The folded header block of a [`crate::MessageContent`], plus an index
/// from lowercased field name to the sequence of raw values under that name
/// (source order, duplicates preserved).
#[derive(Debug, Clone)]
pub struct MessageHeader {
    buf: Arc<[u8]>,
    /// byte range of the header block, including trailing CRLFs between
    /// folded lines but excluding the blank separator line
    pub raw: Range<usize>,
    fields: Vec<HeaderField>,
    index: HashMap<String, Vec<usize>>,
}

impl MessageHeader {
    /// Parse the header block `buf[range]` (no body, no separator line).
    pub(crate) fn parse(buf: Arc<[u8]>, range: Range<usize>) -> Self {
        let slice = &buf[range.clone()];
        let lines = scan(slice);

        let mut fields = Vec::new();
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();

        let mut i = 0;
        while i < lines.len() {
            let start_line = lines[i];
            let group_start = start_line.start;
            let mut group_end = start_line.end;
            let mut j = i + 1;
            while j < lines.len() && starts_with_fold_whitespace(slice, &lines[j]) {
                group_end = lines[j].end;
                j += 1;
            }

            if let Some(colon) = memchr::memchr(b':', &slice[group_start..group_end]) {
                let colon = group_start + colon;
                let name = String::from_utf8_lossy(&slice[group_start..colon])
                    .trim()
                    .to_ascii_lowercase();
                let value_start = colon + 1;
                let abs_value_start = range.start + value_start;
                let abs_value_end = range.start + group_end;
                let field_idx = fields.len();
                fields.push(HeaderField {
                    name: name.clone(),
                    raw_value: abs_value_start..abs_value_end,
                });
                index.entry(name).or_default().push(field_idx);
            }
            // A header line with no colon is discarded entirely.

            i = j;
        }

        MessageHeader {
            buf,
            raw: range,
            fields,
            index,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.buf[self.raw.clone()]
    }

    /// All folded fields, in source order, including duplicates.
    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn field_value(&self, f: &HeaderField) -> &[u8] {
        &self.buf[f.raw_value.clone()]
    }

    /// Every raw value stored under `name` (case-insensitive), source order.
    pub fn get_all(&self, name: &str) -> Vec<&[u8]> {
        let key = name.to_ascii_lowercase();
        self.index
            .get(&key)
            .into_iter()
            .flatten()
            .map(|&i| self.field_value(&self.fields[i]))
            .collect()
    }

    /// The first value stored under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.get_all(name).into_iter().next()
    }

    /// `get`, trimmed of leading/trailing whitespace (fold markers included).
    pub fn get_trimmed(&self, name: &str) -> Option<Vec<u8>> {
        self.get(name).map(|v| trim_folded(v))
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }
}

fn starts_with_fold_whitespace(slice: &[u8], line: &Line) -> bool {
    matches!(slice.get(line.start), Some(b) if b.is_ascii_whitespace())
}

/// Strip leading/trailing ASCII whitespace, collapsing internal
/// fold-continuation CRLFs to a single space.
pub fn trim_folded(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut last_was_ws = true; // trims leading whitespace
    for &b in raw {
        if b == b'\r' || b == b'\n' {
            continue;
        }
        if b.is_ascii_whitespace() {
            if !last_was_ws {
                out.push(b' ');
            }
            last_was_ws = true;
        } else {
            out.push(b);
            last_was_ws = false;
        }
    }
    while out.last() == Some(&b' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(raw: &'static [u8]) -> MessageHeader {
        let buf: Arc<[u8]> = Arc::from(raw);
        MessageHeader::parse(buf, 0..raw.len())
    }

    #[test]
    fn parses_simple_headers() {
        let h = header_of(b"From: a@b.com\r\nTo: c@d.com\r\nSubject: hi\r\n");
        assert_eq!(h.get("from").unwrap(), b" a@b.com");
        assert_eq!(h.get("TO").unwrap(), b" c@d.com");
        assert_eq!(h.get("subject").unwrap(), b" hi");
    }

    #[test]
    fn folds_continuation_lines() {
        let h = header_of(b"Subject: line one\r\n  line two\r\nFrom: a@b.com\r\n");
        let v = h.get("subject").unwrap();
        assert!(v.ends_with(b"line two"));
        assert_eq!(h.get("from").unwrap(), b" a@b.com");
    }

    #[test]
    fn discards_headers_without_colon() {
        let h = header_of(b"NotAHeader\r\nFrom: a@b.com\r\n");
        assert!(!h.has("notaheader"));
        assert!(h.has("from"));
    }

    #[test]
    fn preserves_duplicates_in_order() {
        let h = header_of(b"Received: one\r\nReceived: two\r\n");
        let all = h.get_all("received");
        assert_eq!(all, vec![b" one".as_slice(), b" two".as_slice()]);
    }
}
