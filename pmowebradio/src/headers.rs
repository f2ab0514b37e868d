//! HTTP / ICY header line parsing.
//!
//! Webradio servers describe the station either with regular HTTP headers or,
//! for old SHOUTcast servers, with a pseudo header block inside the body:
//!
//! ```text
//! ICY 200 OK
//! icy-notice1:<BR>This stream requires <a href="http://www.winamp.com/">Winamp</a><BR>
//! icy-name:WackenRadio.com - Official Wacken Radio by RauteMusik.FM
//! icy-genre:Metal Rock Alternative
//! icy-url:http://www.WackenRadio.com
//! content-type:audio/mpeg
//! icy-metaint:16000
//! ```
//!
//! Both go through [`parse_header_line`].

use tracing::warn;

use crate::handler::StationInfo;

/// Audio container announced by the `content-type` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Mp3,
    OggVorbis,
    /// Anything else, with the raw header value
    Unsupported(String),
}

impl ContentType {
    /// Maps a `content-type` value, ignoring case and trailing parameters.
    pub fn from_mime(value: &str) -> Self {
        let mime = value.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case("audio/mpeg") {
            ContentType::Mp3
        } else if mime.eq_ignore_ascii_case("audio/ogg")
            || mime.eq_ignore_ascii_case("application/ogg")
        {
            ContentType::OggVorbis
        } else {
            ContentType::Unsupported(value.to_string())
        }
    }
}

/// A recognized header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField {
    ContentType(ContentType),
    Name(String),
    Genre(String),
    Url(String),
    Description(String),
    /// Audio bytes between two metadata chunks, 0 when there are none
    MetaInt(usize),
}

const CONTENT_TYPE: &str = "content-type:";
const ICY_NAME: &str = "icy-name:";
const ICY_GENRE: &str = "icy-genre:";
const ICY_URL: &str = "icy-url:";
const ICY_DESCRIPTION: &str = "icy-description:";
const ICY_METAINT: &str = "icy-metaint:";

/// Parses one header line. Returns `None` for lines that carry nothing we use.
///
/// Trailing `\r`, `\n` and `\0` are ignored, as are blanks after the colon.
pub fn parse_header_line(line: &[u8]) -> Option<HeaderField> {
    let line = trim_line_end(line);

    if let Some(value) = strip_field(line, CONTENT_TYPE) {
        let value = decode_header_value(value);
        return Some(HeaderField::ContentType(ContentType::from_mime(&value)));
    }
    if let Some(value) = strip_field(line, ICY_NAME) {
        return Some(HeaderField::Name(decode_header_value(value)));
    }
    if let Some(value) = strip_field(line, ICY_GENRE) {
        return Some(HeaderField::Genre(decode_header_value(value)));
    }
    if let Some(value) = strip_field(line, ICY_URL) {
        return Some(HeaderField::Url(decode_header_value(value)));
    }
    if let Some(value) = strip_field(line, ICY_DESCRIPTION) {
        return Some(HeaderField::Description(decode_header_value(value)));
    }
    if let Some(value) = strip_field(line, ICY_METAINT) {
        return Some(HeaderField::MetaInt(parse_leading_int(value)));
    }
    None
}

/// Everything the header parser learned about a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub content_type: Option<ContentType>,
    pub metaint: usize,
    pub station: StationInfo,
}

impl ResponseHeaders {
    /// Parses `line` and records the field it carries, if any.
    ///
    /// Returns the recorded field so the caller can react to it.
    pub fn apply_line(&mut self, line: &[u8]) -> Option<HeaderField> {
        let field = parse_header_line(line)?;
        match &field {
            HeaderField::ContentType(ct) => self.content_type = Some(ct.clone()),
            HeaderField::Name(v) => self.station.name = Some(v.clone()),
            HeaderField::Genre(v) => self.station.genre = Some(v.clone()),
            HeaderField::Url(v) => self.station.url = Some(v.clone()),
            HeaderField::Description(v) => self.station.description = Some(v.clone()),
            HeaderField::MetaInt(n) => self.metaint = *n,
        }
        Some(field)
    }
}

/// Splits a header block into lines on `\r\n`, `\r` or `\n`.
pub fn header_block_lines(block: &[u8]) -> impl Iterator<Item = &[u8]> {
    block
        .split(|&b| b == b'\n' || b == b'\r')
        .filter(|line| !line.is_empty())
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n' | b'\0'] = line {
        line = rest;
    }
    line
}

/// If `line` starts with `name` (ASCII case-insensitive), returns the rest
/// with leading blanks removed.
fn strip_field<'a>(line: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let prefix = line.get(..name.len())?;
    if !prefix.eq_ignore_ascii_case(name.as_bytes()) {
        return None;
    }
    let mut value = &line[name.len()..];
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    Some(value)
}

/// `atoi`-like: leading decimal digits, anything unparsable gives 0.
fn parse_leading_int(value: &[u8]) -> usize {
    let digits = value.iter().take_while(|b| b.is_ascii_digit()).count();
    std::str::from_utf8(&value[..digits])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Turns a raw header value into text, resolving HTML entities
/// (`&amp;`, `&auml;`, `&#228;`...) that many stations put in their names.
pub fn decode_header_value(value: &[u8]) -> String {
    let text = String::from_utf8_lossy(trim_line_end(value));
    match htmlescape::decode_html(&text) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(value = %text, "Could not decode HTML entities in header: {:?}", err);
            text.into_owned()
        }
    }
}
