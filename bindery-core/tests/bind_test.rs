//! End-to-end tests for decoding and the bind pass.

use bindery_core::*;
use serde::Deserialize;
use std::sync::Arc;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct TestPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: i32,
}

impl Bind for TestPayload {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct NestedPayload {
    outer_field: String,
    inner: Option<TestPayload>,
}

impl Bind for NestedPayload {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.optional("Inner", |p| p.inner.as_mut());
    }
}

#[derive(Debug, Default, Deserialize)]
struct ParentBinder {
    child: Option<TestPayload>,
}

impl Bind for ParentBinder {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.optional("Child", |p| p.child.as_mut());
    }
}

#[derive(Debug, Default, Deserialize)]
struct InnerBinder {}

#[derive(Debug, thiserror::Error)]
#[error("inner error")]
struct InnerError;

impl Bind for InnerBinder {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Err(InnerError.into())
    }
}

#[derive(Debug, Default, Deserialize)]
struct MiddleBinder {
    inner: Option<InnerBinder>,
}

impl Bind for MiddleBinder {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.optional("Inner", |m| m.inner.as_mut());
    }
}

#[derive(Debug, Default, Deserialize)]
struct OuterBinder {
    middle: Option<MiddleBinder>,
}

impl Bind for OuterBinder {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.optional("Middle", |o| o.middle.as_mut());
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeepBinder {
    child: Option<Box<DeepBinder>>,
}

impl Bind for DeepBinder {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.optional("Child", |d| d.child.as_deref_mut());
    }
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddedPayload {
    #[serde(flatten)]
    base: TestPayload,
    extra: String,
}

impl Bind for EmbeddedPayload {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.embed(|p| &mut p.base);
    }
}

/// Requires a non-empty name; normalizes it to lowercase.
#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

impl Bind for Named {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        if self.name.is_empty() {
            return Err("name is required".into());
        }
        self.name = self.name.to_lowercase();
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(flatten)]
    named: Named,
    #[serde(default)]
    seen_lowercase: bool,
}

impl Bind for Account {
    fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
        // The embedded hook has already run.
        self.seen_lowercase = self.named.name.chars().all(|c| !c.is_uppercase());
        Ok(())
    }

    fn describe(shape: &mut Shape<Self>) {
        shape.embed(|a| &mut a.named);
    }
}

fn json_request(body: &'static str) -> HttpRequest {
    HttpRequest::post("/", "application/json", body)
}

fn noop_registry() -> Registry {
    let registry = Registry::new();
    registry.set_decode(decoder_fn(|_, _, _| Ok(())));
    registry
}

// =============================================================================
// Decoding by content type
// =============================================================================

#[test]
fn test_action_json_binding() {
    let mut req = json_request(r#"{"name":"test", "value":42}"#);
    let mut payload = TestPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "test");
    assert_eq!(payload.value, 42);
}

#[test]
fn test_action_xml_binding() {
    let mut req = HttpRequest::post(
        "/",
        "application/xml",
        "<TestPayload><name>test</name><value>42</value></TestPayload>",
    );
    let mut payload = TestPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "test");
    assert_eq!(payload.value, 42);
}

#[test]
fn test_action_form_binding() {
    let mut req = HttpRequest::post("/", "application/x-www-form-urlencoded", "name=test&value=42");
    let mut payload = TestPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "test");
    assert_eq!(payload.value, 42);
}

#[test]
fn test_action_form_repeated_scalar_takes_first() {
    let mut req = HttpRequest::post(
        "/",
        "application/x-www-form-urlencoded",
        "name=a&value=1&name=b&value=2",
    );
    let mut payload = TestPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "a");
    assert_eq!(payload.value, 1);
}

#[test]
fn test_action_json_with_charset_parameter() {
    let mut req = HttpRequest::post(
        "/",
        "application/json; charset=utf-8",
        r#"{"name":"utf8","value":1}"#,
    );
    let mut payload = TestPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "utf8");
}

#[test]
fn test_action_unsupported_content_type() {
    let mut req = HttpRequest::post("/", "application/octet-stream", "data");
    let err = action(&mut req, &mut TestPayload::default()).unwrap_err();

    assert!(err.is_unsupported_content_type());
    assert_eq!(err.field, "");
    assert_eq!(err.to_string(), "bind failed: bind: unsupported content type");
}

#[test]
fn test_action_missing_content_type() {
    let mut req = HttpRequest::new("POST", "/").with_body("data");
    let err = action(&mut req, &mut TestPayload::default()).unwrap_err();
    assert!(err.is_unsupported_content_type());
}

#[test]
fn test_action_invalid_json() {
    let mut req = json_request(r#"{"name": "abc", "value":}"#);
    let err = action(&mut req, &mut TestPayload::default()).unwrap_err();

    assert_eq!(err.field, "");
    assert!(matches!(err.kind(), Some(Error::Json(_))));
    assert!(req.body.is_drained());
}

// =============================================================================
// Nesting
// =============================================================================

#[test]
fn test_action_nested_binding() {
    let mut req = json_request(r#"{"outer_field":"outer", "inner":{"name":"inner_test", "value":123}}"#);
    let mut payload = NestedPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.outer_field, "outer");
    let inner = payload.inner.unwrap();
    assert_eq!(inner.name, "inner_test");
    assert_eq!(inner.value, 123);
}

#[test]
fn test_action_nil_binder_field() {
    let mut req = json_request(r#"{"child":null}"#);
    let mut payload = ParentBinder::default();

    action(&mut req, &mut payload).unwrap();
    assert!(payload.child.is_none());
}

#[test]
fn test_action_nested_error_propagation() {
    let mut req = json_request(r#"{"middle":{"inner":{}}}"#);
    let mut payload = OuterBinder::default();

    let err = action(&mut req, &mut payload).unwrap_err();
    assert_eq!(err.to_string(), "bind failed on field 'Middle.Inner': inner error");
    assert_eq!(err.field, "Middle.Inner");
    assert!(err.cause_as::<InnerError>().is_some());
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_action_absent_middle_skips_inner() {
    let mut req = json_request(r#"{"middle":null}"#);
    action(&mut req, &mut OuterBinder::default()).unwrap();
}

#[test]
fn test_action_embedded_struct() {
    let mut req = json_request(r#"{"name":"embedded", "value":99, "extra":"field"}"#);
    let mut payload = EmbeddedPayload::default();

    action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.base.name, "embedded");
    assert_eq!(payload.base.value, 99);
    assert_eq!(payload.extra, "field");
}

#[test]
fn test_action_embedded_hook_runs_first_and_reports_promoted_name() {
    let registry = Registry::new();

    let mut req = json_request(r#"{"name":"MiXeD"}"#);
    let mut account = Account::default();
    registry.action(&mut req, &mut account).unwrap();
    assert_eq!(account.named.name, "mixed");
    assert!(account.seen_lowercase);

    let mut req = json_request(r#"{"name":""}"#);
    let err = registry.action(&mut req, &mut Account::default()).unwrap_err();
    assert_eq!(err.to_string(), "bind failed on field 'Named': name is required");
}

#[test]
fn test_action_recursion_depth_limit() {
    // Self-nesting built in memory; the JSON decoder caps nesting well before.
    let mut root = DeepBinder::default();
    for _ in 0..1001 {
        root = DeepBinder {
            child: Some(Box::new(root)),
        };
    }

    let registry = noop_registry();
    let mut req = HttpRequest::new("POST", "/");
    let err = registry.action(&mut req, &mut root).unwrap_err();
    assert!(err.is_recursion_limit());
    assert!(err.to_string().contains("max recursion depth (1000) exceeded"));
}

#[test]
fn test_action_deeply_nested_json_is_rejected() {
    let body = format!("{}null{}", r#"{"child":"#.repeat(1001), "}".repeat(1001));
    let mut req = HttpRequest::post("/", "application/json", body);

    let err = action(&mut req, &mut DeepBinder::default()).unwrap_err();
    assert_eq!(err.field, "");
    assert!(matches!(err.kind(), Some(Error::Json(_))));
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_error_to_json_nil() {
    assert_eq!(error_to_json(None), br#"{"error":""}"#.to_vec());
}

#[test]
fn test_error_to_map_nil() {
    let map = error_to_map(None);
    assert_eq!(map.get("error").map(String::as_str), Some(""));
}

#[test]
fn test_error_to_json_from_action() {
    let mut req = json_request(r#"{"middle":{"inner":{}}}"#);
    let err = action(&mut req, &mut OuterBinder::default()).unwrap_err();

    let body: serde_json::Value = serde_json::from_slice(&error_to_json(Some(&err))).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"error": "bind failed on field 'Middle.Inner': inner error"})
    );
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, thiserror::Error)]
#[error("custom decoder error")]
struct CustomDecoderError;

#[test]
fn test_custom_decoder_registration() {
    let registry = Registry::new();
    let original = registry.decoder(ContentTypeKind::Json).unwrap();

    registry.register_decoder(
        ContentTypeKind::Json,
        decoder_fn(|_, _, _| Err(CustomDecoderError.into())),
    );

    let mut req = json_request("{ }");
    let err = registry.action(&mut req, &mut TestPayload::default()).unwrap_err();
    assert!(err.cause_as::<CustomDecoderError>().is_some());
    assert_eq!(err.to_string(), "bind failed: custom decoder error");

    // Restoring the original leaves nothing of the custom one behind.
    registry.register_decoder(ContentTypeKind::Json, original);
    let mut req = json_request(r#"{"name":"restored","value":7}"#);
    let mut payload = TestPayload::default();
    registry.action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "restored");
}

#[test]
fn test_register_decoder_for_new_kind() {
    let registry = Registry::new();
    registry.register_decoder(
        ContentTypeKind::PlainText,
        decoder_fn(|_, req, target| {
            let text = std::io::read_to_string(&mut req.body)?;
            target.decode_value(serde_json::json!({ "name": text.trim(), "value": 0 }))
        }),
    );

    let mut req = HttpRequest::post("/", "text/plain; charset=utf-8", "  hello  ");
    let mut payload = TestPayload::default();
    registry.action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "hello");
}

#[test]
fn test_set_decode_replaces_entrypoint() {
    let registry = Registry::new();
    registry.set_decode(decoder_fn(|registry, req, target| {
        if req.content_type().is_empty() {
            return target.decode_value(serde_json::json!({"name": "fallback", "value": 1}));
        }
        default_decode(registry, req, target)
    }));

    let mut req = HttpRequest::new("POST", "/");
    let mut payload = TestPayload::default();
    registry.action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "fallback");

    let mut req = json_request(r#"{"name":"json","value":2}"#);
    registry.action(&mut req, &mut payload).unwrap();
    assert_eq!(payload.name, "json");

    registry.reset_decode();
    let mut req = HttpRequest::new("POST", "/");
    assert!(registry.action(&mut req, &mut payload).is_err());
}

#[test]
fn test_descriptors_converge_under_concurrency() {
    let registry = Arc::new(Registry::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let body = format!(r#"{{"middle":{{"inner":null}}, "n":{}}}"#, i);
                    let mut req = HttpRequest::post("/", "application/json", body);
                    registry.action(&mut req, &mut OuterBinder::default()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // OuterBinder, MiddleBinder; InnerBinder is never reached.
    assert_eq!(registry.descriptor_count(), 2);
    let outer = registry.descriptor::<OuterBinder>();
    assert_eq!(outer.member_names().collect::<Vec<_>>(), vec!["Middle"]);
    let middle = registry.descriptor::<MiddleBinder>();
    assert_eq!(middle.member_names().collect::<Vec<_>>(), vec!["Inner"]);
}
