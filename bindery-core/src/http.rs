// HTTP request and body types

use crate::{ContentTypeKind, MultipartForm};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};

/// Request body stream.
///
/// Decoders read from it and must [`drain`](Body::drain) whatever they leave
/// unread so the underlying connection can be reused.
pub struct Body {
    reader: Box<dyn Read + Send>,
    drained: bool,
}

impl Body {
    /// Empty body.
    pub fn empty() -> Self {
        Self::from_reader(io::empty())
    }

    /// Wrap an arbitrary byte stream.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            drained: false,
        }
    }

    /// Discard all unread bytes, returning how many were thrown away.
    pub fn drain(&mut self) -> io::Result<u64> {
        let discarded = io::copy(&mut self.reader, &mut io::sink())?;
        self.drained = true;
        Ok(discarded)
    }

    /// Whether the stream has been drained to the end.
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Read the remaining body, failing once more than `limit` bytes are seen.
    pub fn read_limited(&mut self, limit: u64) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        (&mut self.reader)
            .take(limit.saturating_add(1))
            .read_to_end(&mut buf)?;
        if buf.len() as u64 > limit {
            return Ok(None);
        }
        Ok(Some(buf))
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").field("drained", &self.drained).finish()
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self::from_reader(Cursor::new(data))
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self::from_reader(Cursor::new(data))
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Self::from_reader(Cursor::new(data.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Self::from(data.into_bytes())
    }
}

/// HTTP request wrapper
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Body,
    multipart: Option<MultipartForm>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            body: Body::empty(),
            multipart: None,
        }
    }

    /// Shorthand for a `POST` request with a body and `Content-Type`.
    pub fn post(path: impl Into<String>, content_type: &str, body: impl Into<Body>) -> Self {
        Self::new("POST", path)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header by name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Raw `Content-Type` header, empty when absent
    pub fn content_type(&self) -> &str {
        self.header("Content-Type").unwrap_or("")
    }

    /// Resolved kind of the declared `Content-Type`
    pub fn content_type_kind(&self) -> ContentTypeKind {
        ContentTypeKind::resolve(self.content_type())
    }

    /// Multipart form parsed by the multipart decoder, if it ran
    pub fn multipart_form(&self) -> Option<&MultipartForm> {
        self.multipart.as_ref()
    }

    pub fn set_multipart_form(&mut self, form: MultipartForm) {
        self.multipart = Some(form);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let req = HttpRequest::new("POST", "/").with_header("content-type", "application/json");
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.content_type_kind(), ContentTypeKind::Json);
    }

    #[test]
    fn test_missing_content_type_is_unknown() {
        let req = HttpRequest::new("GET", "/");
        assert_eq!(req.content_type(), "");
        assert_eq!(req.content_type_kind(), ContentTypeKind::Unknown);
    }

    #[test]
    fn test_body_drain_discards_rest() {
        let mut body = Body::from("hello world");
        let mut head = [0u8; 5];
        body.read_exact(&mut head).unwrap();
        assert!(!body.is_drained());

        assert_eq!(body.drain().unwrap(), 6);
        assert!(body.is_drained());
        assert_eq!(body.drain().unwrap(), 0);
    }

    #[test]
    fn test_body_read_limited() {
        let mut body = Body::from("0123456789");
        assert_eq!(body.read_limited(10).unwrap(), Some(b"0123456789".to_vec()));

        let mut body = Body::from("0123456789");
        assert_eq!(body.read_limited(9).unwrap(), None);
    }
}
