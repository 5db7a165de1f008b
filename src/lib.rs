// Bindery - content-negotiated request binding for Rust
//
// Decodes a request body by its Content-Type, copies uploaded files into
// declared members, then runs bind hooks bottom-up over the decoded value.

// Re-export core functionality
pub use bindery_core::*;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Bind,
        BindConfig,
        BindError,
        Body,
        BoxError,
        ContentTypeKind,
        Error,
        FileHeader,
        HttpRequest,
        MultipartForm,
        Registry,
        Shape,
        Target,
        action,
        decoder_fn,
        error_to_json,
        error_to_map,
    };
}
