//! `Content-Type` header parsing: maintype/subtype plus parameters.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    multi::many0,
    sequence::separated_pair,
    IResult,
};

/// A parsed `Content-Type` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub maintype: String,
    pub subtype: String,
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// `text/plain`, the default when the header is absent or unparseable.
    pub fn text_plain() -> Self {
        ContentType {
            maintype: "text".into(),
            subtype: "plain".into(),
            params: Vec::new(),
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.maintype.eq_ignore_ascii_case("multipart")
    }

    pub fn is_message_rfc822(&self) -> bool {
        self.maintype.eq_ignore_ascii_case("message") && self.subtype.eq_ignore_ascii_case("rfc822")
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    /// Parse a raw (already-unfolded) `Content-Type` value; falls back to
    /// `text/plain` on any malformed input rather than failing the caller.
    pub fn parse(raw: &str) -> ContentType {
        parse_content_type(raw)
            .map(|(_, ct)| ct)
            .unwrap_or_else(|_| ContentType::text_plain())
    }
}

fn is_token_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '=')
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let mut out = String::new();
    let mut rest = input;
    loop {
        if let Some(stripped) = rest.strip_prefix('"') {
            return Ok((stripped, out));
        }
        if rest.is_empty() {
            return Err(nom::Err::Error(nom::error::Error::new(
                rest,
                nom::error::ErrorKind::Eof,
            )));
        }
        if let Some(stripped) = rest.strip_prefix('\\') {
            let mut chars = stripped.chars();
            if let Some(c) = chars.next() {
                out.push(c);
                rest = chars.as_str();
                continue;
            }
        }
        let mut chars = rest.chars();
        let c = chars.next().unwrap();
        out.push(c);
        rest = chars.as_str();
    }
}

fn param_value(input: &str) -> IResult<&str, String> {
    let (input, _) = multispace0(input)?;
    if input.starts_with('"') {
        quoted_string(input)
    } else {
        let (input, v) = token(input)?;
        Ok((input, v.to_string()))
    }
}

fn parameter(input: &str) -> IResult<&str, (String, String)> {
    let (input, _) = multispace0(input)?;
    let (input, _) = char(';')(input)?;
    let (input, _) = multispace0(input)?;
    separated_pair(
        nom::combinator::map(token, |s: &str| s.to_ascii_lowercase()),
        char('='),
        param_value,
    )(input)
}

fn parse_content_type(input: &str) -> IResult<&str, ContentType> {
    let (input, _) = multispace0(input)?;
    let (input, (maintype, subtype)) = separated_pair(token, char('/'), token)(input)?;
    let (input, params) = many0(parameter)(input)?;
    let (input, _) = multispace0(input)?;
    Ok((
        input,
        ContentType {
            maintype: maintype.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_type() {
        let ct = ContentType::parse("text/html");
        assert_eq!(ct.maintype, "text");
        assert_eq!(ct.subtype, "html");
    }

    #[test]
    fn parses_boundary_param() {
        let ct = ContentType::parse(r#"multipart/mixed; boundary="abc123""#);
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("abc123"));
    }

    #[test]
    fn parses_unquoted_boundary() {
        let ct = ContentType::parse("multipart/mixed; boundary=abc123; charset=utf-8");
        assert_eq!(ct.boundary(), Some("abc123"));
        assert_eq!(ct.param("charset"), Some("utf-8"));
    }

    #[test]
    fn falls_back_on_garbage() {
        let ct = ContentType::parse("");
        assert_eq!(ct, ContentType::text_plain());
    }

    #[test]
    fn detects_message_rfc822() {
        let ct = ContentType::parse("message/rfc822");
        assert!(ct.is_message_rfc822());
    }
}
