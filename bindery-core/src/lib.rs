// Core library for bindery
// Content-type driven body decoding followed by a bottom-up bind pass

// Lets `#[derive(Bind)]` expand inside this crate.
extern crate self as bindery_core;

pub mod binder;
pub mod config;
pub mod content_type;
pub mod decoder;
pub mod error;
pub mod files;
pub mod form;
pub mod http;
pub mod shape;
pub mod urlencoded;

// Re-export commonly used types
pub use bindery_macro::Bind;
pub use binder::*;
pub use config::{BindConfig, ConfigError, DEFAULT_MAX_FORM_BODY, ENV_PREFIX};
pub use content_type::*;
pub use decoder::*;
pub use error::*;
pub use files::*;
pub use form::*;
pub use http::*;
pub use shape::*;
pub use urlencoded::FormValues;
