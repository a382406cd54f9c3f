//! Renders a parsed message tree into the two RFC 3501 views clients ask
//! for: `BODY`/`BODYSTRUCTURE` (the MIME skeleton) and `BODY[section]`
//! (a byte range cut out of one node of that skeleton).

use std::borrow::Cow;
use std::collections::HashSet;
use std::num::NonZeroU32;

use anyhow::{anyhow, bail, Result};

use imap_codec::imap_types::body::{
    BasicFields, Body as FetchBody, BodyStructure, MultiPartExtensionData, SinglePartExtensionData,
    SpecificFields,
};
use imap_codec::imap_types::core::{AString, IString, NString, NonEmptyVec};
use imap_codec::imap_types::fetch::{Part as FetchPart, Section as FetchSection};

use imapd_mime::{ContentType, MessageBody, MessageContent};

use crate::imap::imf_view::ImfView;

pub enum BodySection<'a> {
    Full(Cow<'a, [u8]>),
    Slice {
        body: Cow<'a, [u8]>,
        origin_octet: u32,
    },
}

/// Extracts the bytes a `FETCH BODY[section]<partial>` attribute asks for.
pub fn body_ext<'a>(
    part: &'a MessageContent,
    section: &'a Option<FetchSection<'a>>,
    partial: &'a Option<(u32, NonZeroU32)>,
) -> Result<BodySection<'a>> {
    let (extractor, path) = SubsettedSection::from(section);
    let selected = subset(part, path)?;
    let extracted = extract(selected, &extractor)?;
    Ok(extracted.to_body_section(partial))
}

/// Builds `BODYSTRUCTURE` (`is_ext = true`) or plain `BODY` (`is_ext = false`).
pub fn bodystructure(part: &MessageContent, is_ext: bool) -> Result<BodyStructure<'static>> {
    structure(part, is_ext)
}

// ---- part navigation ----

fn subset<'a>(part: &'a MessageContent, path: Option<&'a FetchPart>) -> Result<&'a MessageContent> {
    match path {
        None => Ok(part),
        Some(p) => rec_subset(part, p.0.as_ref()),
    }
}

fn rec_subset<'a>(part: &'a MessageContent, path: &'a [NonZeroU32]) -> Result<&'a MessageContent> {
    if path.is_empty() {
        return Ok(part);
    }
    match &part.body {
        MessageBody::Multipart { children, .. } => {
            let next = children.get(path[0].get() as usize - 1).ok_or_else(|| {
                anyhow!(
                    "Unable to resolve subpath {:?}, current multipart has only {} elements",
                    path,
                    children.len()
                )
            })?;
            rec_subset(next, &path[1..])
        }
        MessageBody::Message { child, .. } => rec_subset(child, path),
        MessageBody::Singlepart { .. } => {
            bail!("Tried to index into an atomic part, unresolved subpath {:?}", path)
        }
    }
}

enum SubsettedSection<'a> {
    Part,
    Header,
    HeaderFields(&'a NonEmptyVec<AString<'a>>),
    HeaderFieldsNot(&'a NonEmptyVec<AString<'a>>),
    Text,
    Mime,
}

impl<'a> SubsettedSection<'a> {
    fn from(section: &'a Option<FetchSection<'a>>) -> (Self, Option<&'a FetchPart>) {
        match section {
            Some(FetchSection::Text(p)) => (Self::Text, p.as_ref()),
            Some(FetchSection::Header(p)) => (Self::Header, p.as_ref()),
            Some(FetchSection::HeaderFields(p, fields)) => (Self::HeaderFields(fields), p.as_ref()),
            Some(FetchSection::HeaderFieldsNot(p, fields)) => {
                (Self::HeaderFieldsNot(fields), p.as_ref())
            }
            Some(FetchSection::Mime(p)) => (Self::Mime, Some(p)),
            Some(FetchSection::Part(p)) => (Self::Part, Some(p)),
            None => (Self::Part, None),
        }
    }
}

struct ExtractedFull<'a>(Cow<'a, [u8]>);

impl<'a> ExtractedFull<'a> {
    fn to_body_section(self, partial: &Option<(u32, NonZeroU32)>) -> BodySection<'a> {
        match partial {
            None => BodySection::Full(self.0),
            Some((origin, len)) => {
                let origin = *origin as usize;
                let len = len.get() as usize;
                let buf = self.0;
                if origin >= buf.len() {
                    return BodySection::Slice {
                        body: Cow::Owned(vec![]),
                        origin_octet: origin as u32,
                    };
                }
                let end = (origin + len).min(buf.len());
                let slice = match buf {
                    Cow::Borrowed(b) => Cow::Borrowed(&b[origin..end]),
                    Cow::Owned(b) => Cow::Owned(b[origin..end].to_vec()),
                };
                BodySection::Slice {
                    body: slice,
                    origin_octet: origin as u32,
                }
            }
        }
    }
}

fn extract<'a>(part: &'a MessageContent, extractor: &SubsettedSection<'a>) -> Result<ExtractedFull<'a>> {
    match extractor {
        SubsettedSection::Text => Ok(ExtractedFull(Cow::Borrowed(part.body_raw()))),
        SubsettedSection::Header => Ok(ExtractedFull(Cow::Borrowed(part.header.raw()))),
        SubsettedSection::HeaderFields(fields) => header_fields(part, fields, false),
        SubsettedSection::HeaderFieldsNot(fields) => header_fields(part, fields, true),
        SubsettedSection::Part => body_part(part),
        SubsettedSection::Mime => mime_header(part),
    }
}

// The MIME section of a message/rfc822 part is that message's own header;
// for any other kind of part it's the part's own (already-selected) header.
fn mime_header(part: &MessageContent) -> Result<ExtractedFull<'_>> {
    let target = match &part.body {
        MessageBody::Message { child, .. } => child.as_ref(),
        _ => part,
    };
    Ok(ExtractedFull(Cow::Borrowed(target.header.raw())))
}

fn body_part(part: &MessageContent) -> Result<ExtractedFull<'_>> {
    match &part.body {
        MessageBody::Multipart { .. } => bail!("Multipart part has no BODY section of its own"),
        _ => Ok(ExtractedFull(Cow::Borrowed(part.body_raw()))),
    }
}

fn header_fields<'a>(
    part: &'a MessageContent,
    fields: &'a NonEmptyVec<AString<'a>>,
    invert: bool,
) -> Result<ExtractedFull<'a>> {
    let wanted: HashSet<Vec<u8>> = fields
        .as_ref()
        .iter()
        .map(|x| astring_bytes(x).to_ascii_lowercase())
        .collect();

    let buffer = part.header.fields().iter().filter(|f| wanted.contains(f.name.as_bytes()) ^ invert).fold(
        Vec::new(),
        |mut acc, f| {
            acc.extend_from_slice(f.name.as_bytes());
            acc.extend_from_slice(b": ");
            acc.extend_from_slice(part.header.field_value(f));
            acc.extend_from_slice(b"\r\n");
            acc
        },
    );

    Ok(ExtractedFull(Cow::Owned(buffer)))
}

fn astring_bytes<'a>(a: &'a AString<'a>) -> Vec<u8> {
    match a {
        AString::Atom(atom) => atom.inner().as_bytes().to_vec(),
        AString::String(IString::Literal(l)) => l.as_ref().to_vec(),
        AString::String(IString::Quoted(q)) => q.inner().as_bytes().to_vec(),
    }
}

/// Lossy text view of an `AString`, for search needles where literal byte
/// fidelity does not matter.
pub fn astring_lossy(a: &AString) -> String {
    String::from_utf8_lossy(&astring_bytes(a)).into_owned()
}

// ---- structure ----

fn structure(part: &MessageContent, is_ext: bool) -> Result<BodyStructure<'static>> {
    let ct = part.content_type();
    if ct.is_message_rfc822() {
        if let MessageBody::Message { .. } = &part.body {
            return message_structure(part, is_ext);
        }
    }
    if ct.is_multipart() && part.has_nested() {
        return multipart_structure(part, &ct, is_ext);
    }
    if ct.maintype.eq_ignore_ascii_case("text") {
        return text_structure(part, &ct, is_ext);
    }
    binary_structure(part, &ct, is_ext)
}

fn message_structure(part: &MessageContent, is_ext: bool) -> Result<BodyStructure<'static>> {
    let basic = basic_fields(part)?;
    let child = match &part.body {
        MessageBody::Message { child, .. } => child.as_ref(),
        _ => bail!("message/rfc822 content-type without a parsed child part"),
    };

    Ok(BodyStructure::Single {
        body: FetchBody {
            basic,
            specific: SpecificFields::Message {
                envelope: Box::new(ImfView(&child.header).message_envelope()),
                body_structure: Box::new(structure(child, is_ext)?),
                number_of_lines: child.line_count as u32,
            },
        },
        extension_data: ext_data(is_ext),
    })
}

fn multipart_structure(part: &MessageContent, ct: &ContentType, is_ext: bool) -> Result<BodyStructure<'static>> {
    let subtype = IString::try_from(ct.subtype.clone()).unwrap_or_else(|_| unchecked_istring("mixed"));

    let inner = part.nested().into_iter().map(|c| structure(c, is_ext)).collect::<Result<Vec<_>>>()?;
    if inner.is_empty() {
        bail!("Multipart part unexpectedly has no children");
    }
    let bodies = NonEmptyVec::try_from(inner).map_err(|_| anyhow!("failed to build multipart body list"))?;

    Ok(BodyStructure::Multi {
        bodies,
        subtype,
        extension_data: match is_ext {
            true => Some(MultiPartExtensionData {
                parameter_list: ct
                    .boundary()
                    .and_then(|b| IString::try_from(b.to_string()).ok())
                    .map(|b| vec![(unchecked_istring("boundary"), b)])
                    .unwrap_or_default(),
                tail: None,
            }),
            false => None,
        },
    })
}

fn text_structure(part: &MessageContent, ct: &ContentType, is_ext: bool) -> Result<BodyStructure<'static>> {
    let mut basic = basic_fields(part)?;
    let subtype = IString::try_from(ct.subtype.clone()).unwrap_or_else(|_| unchecked_istring("plain"));

    if ct.param("charset").is_none() {
        basic.parameter_list.push((unchecked_istring("charset"), unchecked_istring("us-ascii")));
    }

    Ok(BodyStructure::Single {
        body: FetchBody {
            basic,
            specific: SpecificFields::Text {
                subtype,
                number_of_lines: part.line_count as u32,
            },
        },
        extension_data: ext_data(is_ext),
    })
}

fn binary_structure(part: &MessageContent, ct: &ContentType, is_ext: bool) -> Result<BodyStructure<'static>> {
    let basic = basic_fields(part)?;
    let r#type = IString::try_from(ct.maintype.clone()).unwrap_or_else(|_| unchecked_istring("application"));
    let subtype = IString::try_from(ct.subtype.clone()).unwrap_or_else(|_| unchecked_istring("octet-stream"));

    Ok(BodyStructure::Single {
        body: FetchBody {
            basic,
            specific: SpecificFields::Basic { r#type, subtype },
        },
        extension_data: ext_data(is_ext),
    })
}

fn basic_fields(part: &MessageContent) -> Result<BasicFields<'static>> {
    let ct = part.content_type();
    let parameter_list = ct
        .params
        .iter()
        .filter_map(|(k, v)| {
            let k = IString::try_from(k.clone()).ok()?;
            let v = IString::try_from(v.clone()).ok()?;
            Some((k, v))
        })
        .collect();

    let cte = part
        .header
        .get_trimmed("content-transfer-encoding")
        .map(|v| String::from_utf8_lossy(&v).to_ascii_lowercase())
        .unwrap_or_else(|| "7bit".to_string());
    let content_transfer_encoding = match cte.as_str() {
        "8bit" => unchecked_istring("8bit"),
        "binary" => unchecked_istring("binary"),
        "quoted-printable" => unchecked_istring("quoted-printable"),
        "base64" => unchecked_istring("base64"),
        _ => unchecked_istring("7bit"),
    };

    Ok(BasicFields {
        parameter_list,
        id: NString(
            part.header
                .get_trimmed("content-id")
                .and_then(|v| IString::try_from(String::from_utf8_lossy(&v).into_owned()).ok()),
        ),
        description: NString(
            part.header
                .get_trimmed("content-description")
                .and_then(|v| IString::try_from(String::from_utf8_lossy(&v).into_owned()).ok()),
        ),
        content_transfer_encoding,
        size: u32::try_from(part.body_raw().len())?,
    })
}

fn ext_data(is_ext: bool) -> Option<SinglePartExtensionData<'static>> {
    match is_ext {
        true => Some(SinglePartExtensionData {
            md5: NString(None),
            tail: None,
        }),
        false => None,
    }
}

fn unchecked_istring(s: &'static str) -> IString<'static> {
    IString::try_from(s).expect("this literal is always a valid IString")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &'static [u8]) -> MessageContent {
        imapd_mime::parse(raw.to_vec())
    }

    #[test]
    fn plain_text_structure_has_line_count() {
        let msg = parse(b"Content-Type: text/plain\r\n\r\nline one\r\nline two\r\n");
        let structure = bodystructure(&msg, false).unwrap();
        match structure {
            BodyStructure::Single {
                body:
                    FetchBody {
                        specific: SpecificFields::Text { number_of_lines, .. },
                        ..
                    },
                ..
            } => assert_eq!(number_of_lines, 2),
            _ => panic!("expected a single text part"),
        }
    }

    #[test]
    fn multipart_structure_lists_all_children() {
        let raw = b"Content-Type: multipart/mixed; boundary=XYZ\r\n\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\nhi\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\nbye\r\n--XYZ--\r\n";
        let msg = parse(raw);
        let structure = bodystructure(&msg, false).unwrap();
        match structure {
            BodyStructure::Multi { bodies, .. } => assert_eq!(bodies.as_ref().len(), 2),
            _ => panic!("expected a multipart structure"),
        }
    }

    #[test]
    fn header_fields_not_excludes_requested_names() {
        let msg = parse(b"Subject: hi\r\nX-Custom: v\r\n\r\nbody\r\n");
        let fields = NonEmptyVec::try_from(vec![AString::try_from("subject").unwrap()]).unwrap();
        let section = Some(FetchSection::HeaderFieldsNot(None, fields));
        match body_ext(&msg, &section, &None).unwrap() {
            BodySection::Full(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                assert!(text.contains("X-Custom"));
                assert!(!text.contains("Subject"));
            }
            _ => panic!("expected full section"),
        }
    }
}
