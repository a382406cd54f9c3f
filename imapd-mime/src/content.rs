//! The recursive content tree: [`MessageContent`] / [`MessageBody`].

use std::ops::Range;
use std::sync::Arc;

use crate::contenttype::ContentType;
use crate::header::MessageHeader;
use crate::lines::scan;

/// A parsed MIME entity. Shares ownership of the underlying buffer with
/// every other node in the tree; `raw`/body ranges are non-owning views into
/// it. Immutable after construction.
#[derive(Debug, Clone)]
pub struct MessageContent {
    buf: Arc<[u8]>,
    pub raw: Range<usize>,
    pub line_count: usize,
    pub header: MessageHeader,
    pub body: MessageBody,
}

/// The three shapes a body can take. A tagged sum, not an inheritance
/// hierarchy: match on this instead of asking "is it a container?".
#[derive(Debug, Clone)]
pub enum MessageBody {
    Singlepart {
        raw: Range<usize>,
    },
    Multipart {
        raw: Range<usize>,
        subtype: String,
        children: Vec<MessageContent>,
    },
    Message {
        raw: Range<usize>,
        child: Box<MessageContent>,
    },
}

impl MessageContent {
    pub fn raw(&self) -> &[u8] {
        &self.buf[self.raw.clone()]
    }

    pub fn body_raw(&self) -> &[u8] {
        &self.buf[self.body.raw().clone()]
    }

    /// Parsed, defaulted `Content-Type`; `text/plain` if absent/unparseable.
    pub fn content_type(&self) -> ContentType {
        self.header
            .get_trimmed("content-type")
            .and_then(|raw| String::from_utf8(raw).ok())
            .map(|s| ContentType::parse(&s))
            .unwrap_or_else(ContentType::text_plain)
    }

    pub fn has_nested(&self) -> bool {
        !matches!(self.body, MessageBody::Singlepart { .. })
    }

    /// Direct children, in order, for multipart/message bodies; empty
    /// otherwise (a message/rfc822 body has exactly one "child").
    pub fn nested(&self) -> Vec<&MessageContent> {
        match &self.body {
            MessageBody::Singlepart { .. } => Vec::new(),
            MessageBody::Multipart { children, .. } => children.iter().collect(),
            MessageBody::Message { child, .. } => vec![child.as_ref()],
        }
    }

    /// Lazy pre-order traversal: self, then every descendant.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

impl MessageBody {
    pub fn raw(&self) -> &Range<usize> {
        match self {
            MessageBody::Singlepart { raw } => raw,
            MessageBody::Multipart { raw, .. } => raw,
            MessageBody::Message { raw, .. } => raw,
        }
    }
}

/// Iterator returned by [`MessageContent::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a MessageContent>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a MessageContent;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        match &node.body {
            MessageBody::Singlepart { .. } => {}
            MessageBody::Multipart { children, .. } => {
                for child in children.iter().rev() {
                    self.stack.push(child);
                }
            }
            MessageBody::Message { child, .. } => self.stack.push(child),
        }
        Some(node)
    }
}

/// Parse `data` into a [`MessageContent`] tree per the algorithm in the
/// component design: line scan, header/body split, folded-header parse,
/// Content-Type-driven body dispatch.
pub fn parse(data: impl Into<Vec<u8>>) -> MessageContent {
    let buf: Arc<[u8]> = Arc::from(data.into().into_boxed_slice());
    let len = buf.len();
    parse_range(buf, 0..len)
}

fn parse_range(buf: Arc<[u8]>, range: Range<usize>) -> MessageContent {
    let slice = &buf[range.clone()];
    let all_lines = scan(slice);
    let line_count = all_lines.len();

    let blank_idx = all_lines.iter().position(|l| l.is_blank(slice));
    let (header_local, body_local) = match blank_idx {
        Some(i) => (
            0..all_lines[i].start,
            all_lines[i].next_start..slice.len(),
        ),
        // No blank separator line: the whole entity is header, body is empty.
        None => (0..slice.len(), slice.len()..slice.len()),
    };

    let header = MessageHeader::parse(
        buf.clone(),
        (range.start + header_local.start)..(range.start + header_local.end),
    );

    let content_type = header
        .get_trimmed("content-type")
        .and_then(|raw| String::from_utf8(raw).ok())
        .map(|s| ContentType::parse(&s))
        .unwrap_or_else(ContentType::text_plain);

    let body_abs = (range.start + body_local.start)..(range.start + body_local.end);

    let body = if content_type.is_multipart() {
        match content_type.boundary() {
            Some(boundary) => parse_multipart(buf.clone(), body_abs, boundary, content_type.subtype),
            None => MessageBody::Singlepart { raw: body_abs },
        }
    } else if content_type.is_message_rfc822() {
        let child = parse_range(buf.clone(), body_abs.clone());
        MessageBody::Message {
            raw: body_abs,
            child: Box::new(child),
        }
    } else {
        MessageBody::Singlepart { raw: body_abs }
    };

    MessageContent {
        buf,
        raw: range,
        line_count,
        header,
        body,
    }
}

fn parse_multipart(
    buf: Arc<[u8]>,
    range: Range<usize>,
    boundary: &str,
    subtype: String,
) -> MessageBody {
    let slice = &buf[range.clone()];
    let lines = scan(slice);
    let open_marker = format!("--{}", boundary);
    let close_marker = format!("--{}--", boundary);

    let mut children = Vec::new();
    let mut part_start: Option<usize> = None;

    for line in &lines {
        let text = line.as_slice(slice);
        if text == close_marker.as_bytes() {
            if let Some(ps) = part_start {
                children.push(parse_range(
                    buf.clone(),
                    (range.start + ps)..(range.start + line.start),
                ));
            }
            part_start = None;
            break;
        } else if text == open_marker.as_bytes() {
            if let Some(ps) = part_start {
                children.push(parse_range(
                    buf.clone(),
                    (range.start + ps)..(range.start + line.start),
                ));
            }
            part_start = Some(line.next_start);
        }
        // any other line, before the first boundary (preamble) or inside a
        // part's own body, is handled when that part is recursively parsed
    }

    MessageBody::Multipart {
        raw: range,
        subtype,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singlepart_no_content_type() {
        let msg = parse(&b"From: a@b.com\r\nTo: c@d.com\r\n\r\nhello\r\nworld\r\n"[..]);
        assert!(!msg.has_nested());
        assert_eq!(msg.body_raw(), b"hello\r\nworld\r\n");
        assert_eq!(msg.content_type().maintype, "text");
    }

    #[test]
    fn no_blank_line_is_all_header() {
        let msg = parse(&b"From: a@b.com\r\nTo: c@d.com\r\n"[..]);
        assert!(msg.body_raw().is_empty());
        assert!(msg.header.has("from"));
        assert!(msg.header.has("to"));
    }

    #[test]
    fn empty_body_is_valid_singlepart() {
        let msg = parse(&b"Subject: x\r\n\r\n"[..]);
        assert!(msg.body_raw().is_empty());
        assert!(!msg.has_nested());
    }

    #[test]
    fn multipart_splits_on_boundary() {
        let raw = b"Content-Type: multipart/mixed; boundary=X\r\n\r\npreamble\r\n--X\r\nA: 1\r\n\r\npart one\r\n--X\r\nA: 2\r\n\r\npart two\r\n--X--\r\nepilogue\r\n";
        let msg = parse(&raw[..]);
        assert_eq!(msg.nested().len(), 2);
        let parts = msg.nested();
        assert_eq!(parts[0].header.get("a").unwrap(), b" 1");
        assert!(parts[0].body_raw().starts_with(b"part one"));
        assert_eq!(parts[1].header.get("a").unwrap(), b" 2");
    }

    #[test]
    fn multipart_boundary_absent_from_body_is_empty() {
        let raw = b"Content-Type: multipart/mixed; boundary=Z\r\n\r\nno boundary markers here\r\n";
        let msg = parse(&raw[..]);
        assert!(msg.has_nested());
        assert_eq!(msg.nested().len(), 0);
    }

    #[test]
    fn multipart_without_boundary_param_is_singlepart() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\nstuff\r\n";
        let msg = parse(&raw[..]);
        assert!(!msg.has_nested());
    }

    #[test]
    fn message_rfc822_nests_one_child() {
        let inner = b"From: inner@x.com\r\n\r\ninner body\r\n";
        let mut raw = Vec::new();
        raw.extend_from_slice(b"Content-Type: message/rfc822\r\n\r\n");
        raw.extend_from_slice(inner);
        let msg = parse(raw);
        assert!(msg.has_nested());
        let nested = msg.nested();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].header.get("from").unwrap(), b" inner@x.com");
    }

    #[test]
    fn walk_visits_every_node_preorder() {
        let raw = b"Content-Type: multipart/mixed; boundary=X\r\n\r\n--X\r\n\r\npart one\r\n--X\r\n\r\npart two\r\n--X--\r\n";
        let msg = parse(&raw[..]);
        let seen: Vec<&MessageContent> = msg.walk().collect();
        assert_eq!(seen.len(), 3);
        assert!(std::ptr::eq(seen[0], &msg));
        assert_eq!(seen[1].body_raw(), b"part one\r\n");
        assert_eq!(seen[2].body_raw(), b"part two\r\n");
    }

    #[test]
    fn round_trip_header_body_concatenation() {
        let raw: &[u8] = b"From: a@b.com\r\nSubject: hi\r\n\r\nbody text\r\n";
        let msg = parse(raw);
        let mut reconstructed = Vec::new();
        reconstructed.extend_from_slice(msg.header.raw());
        reconstructed.extend_from_slice(b"\r\n");
        reconstructed.extend_from_slice(msg.body_raw());
        assert_eq!(reconstructed, raw);
    }
}
