// Body decoders keyed by content type

use crate::files::populate_files;
use crate::{BoxError, Error, HttpRequest, MultipartParser, Registry, Target};
use std::sync::Arc;

/// Decode function stored in the registry.
///
/// Receives the registry it was invoked through so it can read the current
/// limits, the request whose body it consumes, and the destination.
pub type Decoder =
    Arc<dyn Fn(&Registry, &mut HttpRequest, &mut dyn Target) -> Result<(), BoxError> + Send + Sync>;

/// Wrap a function or closure as a [`Decoder`].
pub fn decoder_fn<F>(f: F) -> Decoder
where
    F: Fn(&Registry, &mut HttpRequest, &mut dyn Target) -> Result<(), BoxError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Resolve the request's content type and delegate to the registered decoder.
pub fn default_decode(
    registry: &Registry,
    req: &mut HttpRequest,
    target: &mut dyn Target,
) -> Result<(), BoxError> {
    let kind = req.content_type_kind();
    match registry.decoder(kind) {
        Some(decoder) => decoder(registry, req, target),
        None => {
            tracing::debug!(
                content_type = %req.content_type(),
                kind = %kind,
                type_name = target.type_name(),
                "no decoder registered for content type"
            );
            Err(Error::UnsupportedContentType(kind).into())
        }
    }
}

/// `application/json` and aliases. Reads one JSON value.
pub fn decode_json(
    _registry: &Registry,
    req: &mut HttpRequest,
    target: &mut dyn Target,
) -> Result<(), BoxError> {
    let result = target.decode_json(&mut req.body);
    drain_body(req);
    result
}

/// `application/xml`, `text/xml`.
pub fn decode_xml(
    _registry: &Registry,
    req: &mut HttpRequest,
    target: &mut dyn Target,
) -> Result<(), BoxError> {
    let result = target.decode_xml(&mut req.body);
    drain_body(req);
    result
}

/// `application/x-www-form-urlencoded`, bounded by the registry's form body limit.
pub fn decode_form(
    registry: &Registry,
    req: &mut HttpRequest,
    target: &mut dyn Target,
) -> Result<(), BoxError> {
    let result = match req.body.read_limited(registry.max_form_body()) {
        Ok(Some(body)) => target.decode_form(&body),
        Ok(None) => Err(Error::FormTooLarge.into()),
        Err(e) => Err(Error::from(e).into()),
    };
    drain_body(req);
    result
}

/// `multipart/form-data`.
///
/// Text values go through the form decoder, then uploaded files are copied
/// into the members declared with `Shape::file`/`Shape::files`. The parsed
/// form stays on the request.
pub fn decode_multipart(
    registry: &Registry,
    req: &mut HttpRequest,
    target: &mut dyn Target,
) -> Result<(), BoxError> {
    let result = decode_multipart_body(registry, req, target);
    drain_body(req);
    result
}

fn decode_multipart_body(
    registry: &Registry,
    req: &mut HttpRequest,
    target: &mut dyn Target,
) -> Result<(), BoxError> {
    let parser = MultipartParser::from_content_type(req.content_type())?;
    let form = parser.parse(&mut req.body, registry.max_multipart_memory())?;

    // Deserializing replaces the whole value, so files are attached afterwards.
    target.decode_form_values(form.values.clone())?;
    req.set_multipart_form(form);
    populate_files(registry, req, target)?;
    Ok(())
}

fn drain_body(req: &mut HttpRequest) {
    if let Err(e) = req.body.drain() {
        tracing::warn!(error = %e, path = %req.path, "failed to drain request body");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bind, Body, ContentTypeKind};
    use serde::Deserialize;
    use std::io::{self, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, Deserialize)]
    struct Payload {
        name: String,
        value: i32,
    }

    impl Bind for Payload {
        fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[derive(Debug, Default, Deserialize)]
    struct Tagged {
        name: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    impl Bind for Tagged {
        fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
            Ok(())
        }
    }

    /// Reader that counts how many bytes were pulled from it.
    struct Counting {
        inner: io::Cursor<Vec<u8>>,
        read: Arc<AtomicUsize>,
    }

    impl Read for Counting {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    fn counting_body(data: &str) -> (Body, Arc<AtomicUsize>) {
        let read = Arc::new(AtomicUsize::new(0));
        let body = Body::from_reader(Counting {
            inner: io::Cursor::new(data.as_bytes().to_vec()),
            read: Arc::clone(&read),
        });
        (body, read)
    }

    #[test]
    fn test_json_decoder_drains_trailing_bytes() {
        let registry = Registry::new();
        let data = r#"{"name":"test","value":42}   trailing garbage"#;
        let (body, read) = counting_body(data);
        let mut req = HttpRequest::post("/", "application/json", body);

        let mut payload = Payload::default();
        decode_json(&registry, &mut req, &mut payload).unwrap();

        assert_eq!(payload.name, "test");
        assert_eq!(payload.value, 42);
        assert!(req.body.is_drained());
        assert_eq!(read.load(Ordering::SeqCst), data.len());
    }

    #[test]
    fn test_json_decoder_drains_on_failure() {
        let registry = Registry::new();
        let data = r#"{"name": oops, "padding": "xxxxxxxxxxxxxxxx"}"#;
        let (body, read) = counting_body(data);
        let mut req = HttpRequest::post("/", "application/json", body);

        let mut payload = Payload::default();
        assert!(decode_json(&registry, &mut req, &mut payload).is_err());
        assert!(req.body.is_drained());
        assert_eq!(read.load(Ordering::SeqCst), data.len());
    }

    #[test]
    fn test_form_decoder() {
        let registry = Registry::new();
        let mut req = HttpRequest::post(
            "/",
            "application/x-www-form-urlencoded",
            "name=test&value=42",
        );

        let mut payload = Payload::default();
        decode_form(&registry, &mut req, &mut payload).unwrap();
        assert_eq!(payload.name, "test");
        assert_eq!(payload.value, 42);
        assert!(req.body.is_drained());
    }

    #[test]
    fn test_form_decoder_rejects_oversized_body() {
        let registry = Registry::from_config(&crate::BindConfig {
            max_form_body: 8,
            ..Default::default()
        });
        let mut req = HttpRequest::post(
            "/",
            "application/x-www-form-urlencoded",
            "name=test&value=42",
        );

        let mut payload = Payload::default();
        let err = decode_form(&registry, &mut req, &mut payload).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::FormTooLarge)));
        assert!(req.body.is_drained());
    }

    #[test]
    fn test_form_decoder_repeated_keys() {
        let registry = Registry::new();
        let mut req = HttpRequest::post(
            "/",
            "application/x-www-form-urlencoded",
            "name=a&tags=x&name=b&tags=y",
        );

        let mut tagged = Tagged::default();
        decode_form(&registry, &mut req, &mut tagged).unwrap();
        assert_eq!(tagged.name, "a");
        assert_eq!(tagged.tags, vec!["x", "y"]);
    }

    #[test]
    fn test_xml_decoder() {
        let registry = Registry::new();
        let data = "<Payload><name>test</name><value>42</value></Payload>";
        let (body, read) = counting_body(data);
        let mut req = HttpRequest::post("/", "application/xml", body);

        let mut payload = Payload::default();
        decode_xml(&registry, &mut req, &mut payload).unwrap();
        assert_eq!(payload.name, "test");
        assert_eq!(payload.value, 42);
        assert!(req.body.is_drained());
        assert_eq!(read.load(Ordering::SeqCst), data.len());
    }

    #[test]
    fn test_xml_decoder_drains_on_failure() {
        let registry = Registry::new();
        let data = "<Payload><name>test</nam><value>42</value></Payload>";
        let (body, read) = counting_body(data);
        let mut req = HttpRequest::post("/", "application/xml", body);

        let mut payload = Payload::default();
        let err = decode_xml(&registry, &mut req, &mut payload).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Xml(_))));
        assert!(req.body.is_drained());
        assert_eq!(read.load(Ordering::SeqCst), data.len());
    }

    #[test]
    fn test_default_decode_unsupported() {
        let registry = Registry::new();
        let mut req = HttpRequest::post("/", "text/plain", "hello");

        let mut payload = Payload::default();
        let err = default_decode(&registry, &mut req, &mut payload).unwrap_err();
        assert_eq!(err.to_string(), "bind: unsupported content type");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnsupportedContentType(ContentTypeKind::PlainText))
        ));
    }

    #[test]
    fn test_multipart_decoder_requires_boundary() {
        let registry = Registry::new();
        let mut req = HttpRequest::post("/", "multipart/form-data", "irrelevant");

        let mut payload = Payload::default();
        let err = decode_multipart(&registry, &mut req, &mut payload).unwrap_err();
        assert!(err.to_string().contains("boundary"));
        assert!(req.body.is_drained());
        assert!(req.multipart_form().is_none());
    }
}
