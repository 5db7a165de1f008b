//! Bind capability and per-type structural descriptors.
//!
//! A type opts into recursive binding by implementing [`Bind`]. Aggregates
//! list the members that participate (and the members that receive uploaded
//! files) in [`Bind::describe`]. The listing runs once per type; the result
//! is memoized in a [`DescriptorCache`] keyed by `TypeId`.
//! `#[derive(Bind)]` writes the listing from `#[bind]` field attributes.
//!
//! # Examples
//!
//! ```
//! use bindery_core::{Bind, BoxError, HttpRequest, Shape};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Address {
//!     city: String,
//! }
//!
//! impl Bind for Address {
//!     fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
//!         if self.city.is_empty() {
//!             return Err("city is required".into());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Deserialize)]
//! struct Signup {
//!     name: String,
//!     address: Option<Address>,
//! }
//!
//! impl Bind for Signup {
//!     fn bind(&mut self, _req: &HttpRequest) -> Result<(), BoxError> {
//!         self.name = self.name.trim().to_string();
//!         Ok(())
//!     }
//!
//!     fn describe(shape: &mut Shape<Self>) {
//!         shape.optional("Address", |s| s.address.as_mut());
//!     }
//! }
//! ```

use crate::binder::{Fault, visit_node};
use crate::urlencoded::{self, FormValues};
use crate::{BoxError, FileHeader, HttpRequest, MultipartForm, Registry};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::sync::Arc;

/// Post-decode hook run bottom-up over a bound value.
pub trait Bind: DeserializeOwned + Send + 'static {
    /// Validate or normalize `self` after its fields were populated.
    fn bind(&mut self, req: &HttpRequest) -> Result<(), BoxError>;

    /// Declare nested members that implement `Bind`, in declaration order,
    /// and members that receive multipart files. Leaves keep the default.
    fn describe(shape: &mut Shape<Self>) {
        let _ = shape;
    }
}

// ============================================================================
// Shape builder
// ============================================================================

/// Member listing for an aggregate, filled in by [`Bind::describe`].
pub struct Shape<T> {
    members: Vec<Member<T>>,
    files: Vec<FileMember<T>>,
}

impl<T: Bind> Shape<T> {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            files: Vec::new(),
        }
    }

    /// A member that is always present.
    pub fn field<U: Bind>(&mut self, name: &'static str, get: fn(&mut T) -> &mut U) -> &mut Self {
        self.members.push(Member {
            name,
            reach: Box::new(Direct(get)),
        });
        self
    }

    /// A member behind optional indirection; `None` is skipped.
    pub fn optional<U: Bind>(
        &mut self,
        name: &'static str,
        get: fn(&mut T) -> Option<&mut U>,
    ) -> &mut Self {
        self.members.push(Member {
            name,
            reach: Box::new(Optional(get)),
        });
        self
    }

    /// An embedded member. Its path segment is the embedded type's own name.
    pub fn embed<U: Bind>(&mut self, get: fn(&mut T) -> &mut U) -> &mut Self {
        self.field(short_type_name::<U>(), get)
    }

    /// Receives the first file uploaded under `form_name`.
    pub fn file(
        &mut self,
        form_name: &'static str,
        get: fn(&mut T) -> &mut Option<FileHeader>,
    ) -> &mut Self {
        self.files.push(FileMember {
            form_name,
            slot: FileSlot::Single(get),
        });
        self
    }

    /// Receives every file uploaded under `form_name`.
    pub fn files(
        &mut self,
        form_name: &'static str,
        get: fn(&mut T) -> &mut Vec<FileHeader>,
    ) -> &mut Self {
        self.files.push(FileMember {
            form_name,
            slot: FileSlot::Many(get),
        });
        self
    }
}

fn short_type_name<U>() -> &'static str {
    let full = std::any::type_name::<U>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ============================================================================
// Descriptor
// ============================================================================

/// Cached structural analysis of one `Bind` type.
pub struct Descriptor<T> {
    type_name: &'static str,
    members: Vec<Member<T>>,
    files: Vec<FileMember<T>>,
}

impl<T: Bind> Descriptor<T> {
    fn compute() -> Self {
        let mut shape = Shape::new();
        T::describe(&mut shape);
        Self {
            type_name: std::any::type_name::<T>(),
            members: shape.members,
            files: shape.files,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Names of the participating members, in visit order.
    pub fn member_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.members.iter().map(|m| m.name)
    }

    /// Form names of the file-receiving members.
    pub fn file_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.files.iter().map(|f| f.form_name)
    }

    pub fn is_leaf(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn members(&self) -> &[Member<T>] {
        &self.members
    }

    /// Assign uploaded files to the declared members, returning how many
    /// members were filled.
    pub(crate) fn attach_files(&self, value: &mut T, form: &MultipartForm) -> usize {
        let mut attached = 0;
        for member in &self.files {
            let uploaded = form.files(member.form_name);
            if uploaded.is_empty() {
                continue;
            }
            match member.slot {
                FileSlot::Single(get) => *get(value) = Some(uploaded[0].clone()),
                FileSlot::Many(get) => *get(value) = uploaded.to_vec(),
            }
            attached += 1;
        }
        attached
    }
}

pub(crate) struct Member<T> {
    pub(crate) name: &'static str,
    reach: Box<dyn Reach<T>>,
}

impl<T> Member<T> {
    pub(crate) fn visit(
        &self,
        value: &mut T,
        registry: &Registry,
        req: &HttpRequest,
        path: &str,
        depth: usize,
    ) -> Result<(), Fault> {
        visit_node(self.reach.reach(value), registry, req, path, depth)
    }
}

struct FileMember<T> {
    form_name: &'static str,
    slot: FileSlot<T>,
}

enum FileSlot<T> {
    Single(fn(&mut T) -> &mut Option<FileHeader>),
    Many(fn(&mut T) -> &mut Vec<FileHeader>),
}

/// Type-erased access from an aggregate to one of its members.
trait Reach<T>: Send + Sync {
    fn reach<'a>(&self, value: &'a mut T) -> Option<&'a mut dyn Node>;
}

struct Direct<T, U>(fn(&mut T) -> &mut U);

impl<T: 'static, U: Bind> Reach<T> for Direct<T, U> {
    fn reach<'a>(&self, value: &'a mut T) -> Option<&'a mut dyn Node> {
        Some((self.0)(value) as &mut dyn Node)
    }
}

struct Optional<T, U>(fn(&mut T) -> Option<&mut U>);

impl<T: 'static, U: Bind> Reach<T> for Optional<T, U> {
    fn reach<'a>(&self, value: &'a mut T) -> Option<&'a mut dyn Node> {
        (self.0)(value).map(|member| member as &mut dyn Node)
    }
}

/// Object-safe view of a `Bind` value used for recursion.
pub(crate) trait Node: Send {
    fn visit(
        &mut self,
        registry: &Registry,
        req: &HttpRequest,
        path: &str,
        depth: usize,
    ) -> Result<(), Fault>;
}

impl<T: Bind> Node for T {
    fn visit(
        &mut self,
        registry: &Registry,
        req: &HttpRequest,
        path: &str,
        depth: usize,
    ) -> Result<(), Fault> {
        registry.visit(self, req, path, depth)
    }
}

// ============================================================================
// Descriptor cache
// ============================================================================

/// Process-lifetime memo of descriptors, written once per type and read
/// on every request.
#[derive(Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for `T`, computing it on first use.
    ///
    /// Two callers racing on the same type may both compute it; the first
    /// insert wins and both get the stored entry.
    pub fn get<T: Bind>(&self) -> Arc<Descriptor<T>> {
        let key = TypeId::of::<T>();
        if let Some(entry) = self.entries.read().get(&key) {
            if let Ok(descriptor) = Arc::clone(entry).downcast::<Descriptor<T>>() {
                return descriptor;
            }
        }

        let computed = Descriptor::<T>::compute();
        tracing::trace!(
            type_name = computed.type_name,
            members = computed.members.len(),
            files = computed.files.len(),
            "computed bind descriptor"
        );

        let entry = Arc::clone(
            self.entries
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(computed) as Arc<dyn Any + Send + Sync>),
        );
        entry
            .downcast::<Descriptor<T>>()
            .unwrap_or_else(|_| unreachable!("descriptor cache keyed by TypeId"))
    }

    /// Number of types analysed so far.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ============================================================================
// Decode targets
// ============================================================================

/// Destination handed to decoders.
///
/// Implemented for every [`Bind`] type, so a decoder can fill any root
/// without knowing its concrete type.
pub trait Target: Send {
    /// Replace the value with a JSON document read from `reader`. Only the
    /// first value is consumed; trailing bytes are left for the caller.
    fn decode_json(&mut self, reader: &mut dyn Read) -> Result<(), BoxError>;

    /// Replace the value with an XML document read from `reader`.
    fn decode_xml(&mut self, reader: &mut dyn Read) -> Result<(), BoxError>;

    /// Replace the value with `application/x-www-form-urlencoded` data.
    fn decode_form(&mut self, body: &[u8]) -> Result<(), BoxError>;

    /// Replace the value with form values already grouped by name.
    fn decode_form_values(&mut self, values: FormValues) -> Result<(), BoxError>;

    /// Replace the value with an already-parsed JSON value.
    fn decode_value(&mut self, value: serde_json::Value) -> Result<(), BoxError>;

    /// Copy uploaded files into the members declared with
    /// [`Shape::file`] and [`Shape::files`].
    fn attach_files(&mut self, registry: &Registry, form: &MultipartForm) -> usize;

    fn type_name(&self) -> &'static str;
}

impl<T: Bind> Target for T {
    fn decode_json(&mut self, reader: &mut dyn Read) -> Result<(), BoxError> {
        let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));
        *self = serde::Deserialize::deserialize(&mut de).map_err(crate::Error::from)?;
        Ok(())
    }

    fn decode_xml(&mut self, reader: &mut dyn Read) -> Result<(), BoxError> {
        *self = quick_xml::de::from_reader(BufReader::new(reader)).map_err(crate::Error::from)?;
        Ok(())
    }

    fn decode_form(&mut self, body: &[u8]) -> Result<(), BoxError> {
        *self = urlencoded::from_bytes(body).map_err(crate::Error::from)?;
        Ok(())
    }

    fn decode_form_values(&mut self, values: FormValues) -> Result<(), BoxError> {
        *self = urlencoded::from_values(values).map_err(crate::Error::from)?;
        Ok(())
    }

    fn decode_value(&mut self, value: serde_json::Value) -> Result<(), BoxError> {
        *self = serde_json::from_value(value).map_err(crate::Error::from)?;
        Ok(())
    }

    fn attach_files(&mut self, registry: &Registry, form: &MultipartForm) -> usize {
        registry.descriptor::<T>().attach_files(self, form)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

}
