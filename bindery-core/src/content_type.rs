//! Content-Type resolution.
//!
//! Maps a raw `Content-Type` header value onto the closed set of body kinds
//! the decoder registry understands. Parameters such as `; charset=utf-8` or
//! `; boundary=...` are stripped before matching.
//!
//! # Examples
//!
//! ```
//! use bindery_core::ContentTypeKind;
//!
//! assert_eq!(ContentTypeKind::resolve("application/json; charset=utf-8"), ContentTypeKind::Json);
//! assert_eq!(ContentTypeKind::resolve("application/problem+json"), ContentTypeKind::Json);
//! assert_eq!(ContentTypeKind::resolve("*/*"), ContentTypeKind::Unknown);
//! ```

use std::fmt;

/// The kind of body a request declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentTypeKind {
    /// Unrecognized or missing media type.
    #[default]
    Unknown,
    /// `text/plain`
    PlainText,
    /// `text/html`, `application/xhtml+xml`
    Html,
    /// `application/json` and its aliases
    Json,
    /// `application/xml`, `text/xml`
    Xml,
    /// `application/x-www-form-urlencoded`
    Form,
    /// `multipart/form-data`
    Multipart,
    /// `text/event-stream`
    EventStream,
}

// ============================================================================
// Media Type Table
// ============================================================================

/// Recognized media types, matched case-sensitively after parameter stripping.
const MEDIA_TYPES: &[(&str, ContentTypeKind)] = &[
    ("text/plain", ContentTypeKind::PlainText),
    ("text/html", ContentTypeKind::Html),
    ("application/xhtml+xml", ContentTypeKind::Html),
    ("application/json", ContentTypeKind::Json),
    ("text/javascript", ContentTypeKind::Json),
    ("application/problem+json", ContentTypeKind::Json),
    ("application/vnd.api+json", ContentTypeKind::Json),
    ("text/xml", ContentTypeKind::Xml),
    ("application/xml", ContentTypeKind::Xml),
    ("application/x-www-form-urlencoded", ContentTypeKind::Form),
    ("multipart/form-data", ContentTypeKind::Multipart),
    ("text/event-stream", ContentTypeKind::EventStream),
];

impl ContentTypeKind {
    /// Every kind, `Unknown` first.
    pub const ALL: [ContentTypeKind; 8] = [
        ContentTypeKind::Unknown,
        ContentTypeKind::PlainText,
        ContentTypeKind::Html,
        ContentTypeKind::Json,
        ContentTypeKind::Xml,
        ContentTypeKind::Form,
        ContentTypeKind::Multipart,
        ContentTypeKind::EventStream,
    ];

    /// Resolve a raw header value.
    ///
    /// Everything from the first `;` is dropped and surrounding whitespace is
    /// trimmed. There is no prefix or wildcard matching; anything not in the
    /// table is [`ContentTypeKind::Unknown`].
    pub fn resolve(raw: &str) -> Self {
        let essence = match raw.find(';') {
            Some(idx) => &raw[..idx],
            None => raw,
        }
        .trim();

        MEDIA_TYPES
            .iter()
            .find(|(media_type, _)| *media_type == essence)
            .map(|(_, kind)| *kind)
            .unwrap_or(ContentTypeKind::Unknown)
    }

    /// Canonical media type for this kind, `None` for `Unknown`.
    pub fn media_type(&self) -> Option<&'static str> {
        match self {
            ContentTypeKind::Unknown => None,
            ContentTypeKind::PlainText => Some("text/plain"),
            ContentTypeKind::Html => Some("text/html"),
            ContentTypeKind::Json => Some("application/json"),
            ContentTypeKind::Xml => Some("application/xml"),
            ContentTypeKind::Form => Some("application/x-www-form-urlencoded"),
            ContentTypeKind::Multipart => Some("multipart/form-data"),
            ContentTypeKind::EventStream => Some("text/event-stream"),
        }
    }

    /// Short lowercase name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTypeKind::Unknown => "unknown",
            ContentTypeKind::PlainText => "plain_text",
            ContentTypeKind::Html => "html",
            ContentTypeKind::Json => "json",
            ContentTypeKind::Xml => "xml",
            ContentTypeKind::Form => "form",
            ContentTypeKind::Multipart => "multipart",
            ContentTypeKind::EventStream => "event_stream",
        }
    }
}

impl From<&str> for ContentTypeKind {
    fn from(raw: &str) -> Self {
        Self::resolve(raw)
    }
}

impl fmt::Display for ContentTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
