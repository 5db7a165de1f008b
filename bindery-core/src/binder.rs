//! Decoder registry and the recursive bind pass.
//!
//! [`Registry::action`] decodes a request body into a value and then runs
//! [`Bind::bind`] over every declared member, innermost first, before the
//! value's own hook. The first failure stops the pass and is reported with
//! the dot-joined member path where it happened.
//!
//! A process-wide instance is available through [`Registry::global`]; the
//! free functions in this module operate on it.
//!
//! # Examples
//!
//! ```
//! use bindery_core::{Bind, BoxError, HttpRequest, Registry};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Ping {
//!     name: String,
//!     value: i32,
//! }
//!
//! impl Bind for Ping {
//!     fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
//!         if self.value < 0 {
//!             return Err("value must not be negative".into());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let registry = Registry::new();
//! let mut req = HttpRequest::post("/ping", "application/json", r#"{"name":"test","value":42}"#);
//! let mut ping = Ping { name: String::new(), value: 0 };
//! registry.action(&mut req, &mut ping).unwrap();
//! assert_eq!(ping.name, "test");
//! assert_eq!(ping.value, 42);
//! ```

use crate::config::BindConfig;
use crate::decoder::{self, Decoder, decoder_fn};
use crate::shape::{Descriptor, DescriptorCache, Node};
use crate::{Bind, BindError, BoxError, ContentTypeKind, Error, HttpRequest, Target};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Deepest member nesting the bind pass will descend into.
pub const MAX_RECURSION_DEPTH: usize = 1000;

static GLOBAL: Lazy<Registry> = Lazy::new(|| match BindConfig::from_env() {
    Ok(config) => Registry::from_config(&config),
    Err(e) => {
        tracing::warn!(error = %e, "invalid bind configuration in environment, using defaults");
        Registry::new()
    }
});

/// Failure inside the recursive pass: either a bare cause that still needs a
/// path, or an error that already carries its full path.
pub(crate) enum Fault {
    Plain(BoxError),
    Bound(BindError),
}

impl From<Fault> for BindError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Plain(cause) => BindError::new(cause),
            Fault::Bound(err) => err,
        }
    }
}

pub(crate) fn visit_node(
    node: Option<&mut dyn Node>,
    registry: &Registry,
    req: &HttpRequest,
    path: &str,
    depth: usize,
) -> Result<(), Fault> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Fault::Plain(
            Error::RecursionLimit(MAX_RECURSION_DEPTH).into(),
        ));
    }
    match node {
        Some(node) => node.visit(registry, req, path, depth),
        None => Ok(()),
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Decoders per content type, the active decode entrypoint, body limits and
/// the descriptor cache.
pub struct Registry {
    decoders: RwLock<HashMap<ContentTypeKind, Decoder>>,
    decode: RwLock<Decoder>,
    max_multipart_memory: AtomicU64,
    max_form_body: AtomicU64,
    descriptors: DescriptorCache,
}

impl Registry {
    /// Registry with the built-in decoders and default limits.
    pub fn new() -> Self {
        Self::from_config(&BindConfig::default())
    }

    pub fn from_config(config: &BindConfig) -> Self {
        let decoders: HashMap<ContentTypeKind, Decoder> = HashMap::from([
            (ContentTypeKind::Json, decoder_fn(decoder::decode_json)),
            (ContentTypeKind::Xml, decoder_fn(decoder::decode_xml)),
            (ContentTypeKind::Form, decoder_fn(decoder::decode_form)),
            (ContentTypeKind::Multipart, decoder_fn(decoder::decode_multipart)),
        ]);

        Self {
            decoders: RwLock::new(decoders),
            decode: RwLock::new(decoder_fn(decoder::default_decode)),
            max_multipart_memory: AtomicU64::new(config.max_multipart_memory),
            max_form_body: AtomicU64::new(config.max_form_body),
            descriptors: DescriptorCache::new(),
        }
    }

    /// The process-wide registry, configured from `BINDERY_*` variables on
    /// first use.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Decode the request body into `value`, then run the bind pass.
    ///
    /// A decode failure is returned as a root-level [`BindError`]. Bind
    /// failures carry the path of the member that failed.
    pub fn action<T: Bind>(&self, req: &mut HttpRequest, value: &mut T) -> Result<(), BindError> {
        self.decode(req, &mut *value).map_err(BindError::new)?;
        visit_node(Some(value as &mut dyn Node), self, req, "", 0).map_err(BindError::from)
    }

    /// Run the active decode entrypoint.
    pub fn decode(&self, req: &mut HttpRequest, target: &mut dyn Target) -> Result<(), BoxError> {
        let decode = Arc::clone(&*self.decode.read());
        decode(self, req, target)
    }

    /// Decode by content type using the registered decoders.
    pub fn default_decode(
        &self,
        req: &mut HttpRequest,
        target: &mut dyn Target,
    ) -> Result<(), BoxError> {
        decoder::default_decode(self, req, target)
    }

    /// Decoder registered for `kind`.
    pub fn decoder(&self, kind: ContentTypeKind) -> Option<Decoder> {
        self.decoders.read().get(&kind).cloned()
    }

    /// Register or replace the decoder for `kind`, returning the one it
    /// replaced.
    pub fn register_decoder(&self, kind: ContentTypeKind, decoder: Decoder) -> Option<Decoder> {
        let previous = self.decoders.write().insert(kind, decoder);
        tracing::debug!(kind = %kind, replaced = previous.is_some(), "registered decoder");
        previous
    }

    /// Remove the decoder for `kind`; requests of that kind become unsupported.
    pub fn remove_decoder(&self, kind: ContentTypeKind) -> Option<Decoder> {
        let removed = self.decoders.write().remove(&kind);
        tracing::debug!(kind = %kind, removed = removed.is_some(), "removed decoder");
        removed
    }

    /// Replace the decode entrypoint used by [`action`](Self::action).
    pub fn set_decode(&self, decode: Decoder) {
        *self.decode.write() = decode;
        tracing::debug!("replaced decode entrypoint");
    }

    /// Restore [`decoder::default_decode`] as the entrypoint.
    pub fn reset_decode(&self) {
        self.set_decode(decoder_fn(decoder::default_decode));
    }

    pub fn max_multipart_memory(&self) -> u64 {
        self.max_multipart_memory.load(Ordering::Relaxed)
    }

    /// In-memory budget for multipart file parts. Takes effect for the next
    /// request decoded.
    pub fn set_max_multipart_memory(&self, bytes: u64) {
        self.max_multipart_memory.store(bytes, Ordering::Relaxed);
    }

    pub fn max_form_body(&self) -> u64 {
        self.max_form_body.load(Ordering::Relaxed)
    }

    pub fn set_max_form_body(&self, bytes: u64) {
        self.max_form_body.store(bytes, Ordering::Relaxed);
    }

    /// Cached descriptor of `T`.
    pub fn descriptor<T: Bind>(&self) -> Arc<Descriptor<T>> {
        self.descriptors.get::<T>()
    }

    /// Number of types whose descriptor has been computed.
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    pub(crate) fn visit<T: Bind>(
        &self,
        value: &mut T,
        req: &HttpRequest,
        path: &str,
        depth: usize,
    ) -> Result<(), Fault> {
        let descriptor = self.descriptor::<T>();
        for member in descriptor.members() {
            let full = if path.is_empty() {
                member.name.to_string()
            } else {
                format!("{}.{}", path, member.name)
            };
            match member.visit(value, self, req, &full, depth + 1) {
                Ok(()) => {}
                Err(Fault::Bound(err)) => return Err(Fault::Bound(err)),
                Err(Fault::Plain(cause)) => return Err(Fault::Bound(BindError::at(full, cause))),
            }
        }

        value
            .bind(req)
            .map_err(|cause| Fault::Bound(BindError::at(path, cause)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.decoders.read().keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("Registry")
            .field("decoders", &kinds)
            .field("max_multipart_memory", &self.max_multipart_memory())
            .field("max_form_body", &self.max_form_body())
            .field("descriptors", &self.descriptor_count())
            .finish()
    }
}

// ============================================================================
// Process-wide shortcuts
// ============================================================================

/// [`Registry::action`] on the global registry.
pub fn action<T: Bind>(req: &mut HttpRequest, value: &mut T) -> Result<(), BindError> {
    Registry::global().action(req, value)
}

pub fn decoder(kind: ContentTypeKind) -> Option<Decoder> {
    Registry::global().decoder(kind)
}

pub fn register_decoder(kind: ContentTypeKind, decoder: Decoder) -> Option<Decoder> {
    Registry::global().register_decoder(kind, decoder)
}

pub fn set_decode(decode: Decoder) {
    Registry::global().set_decode(decode)
}

pub fn reset_decode() {
    Registry::global().reset_decode()
}

pub fn max_multipart_memory() -> u64 {
    Registry::global().max_multipart_memory()
}

pub fn set_max_multipart_memory(bytes: u64) {
    Registry::global().set_max_multipart_memory(bytes)
}
