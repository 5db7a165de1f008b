// Procedural macros for bindery
// Generates `Bind` implementations from field attributes

use proc_macro::TokenStream;

mod bind;

/// Implements `Bind`, generating `describe` from `#[bind]` field attributes.
///
/// Container attributes:
/// - `#[bind(hook = "path")]`: function called as `path(&mut self, &HttpRequest)`
///   for the post-decode hook. Without it the hook accepts every value.
/// - `#[bind(crate = "path")]`: path the generated code uses instead of
///   `::bindery_core`.
///
/// Field attributes:
/// - `#[bind]`: nested member, named after the field. `Option<T>`,
///   `Option<Box<T>>` and `Box<T>` are unwrapped.
/// - `#[bind(name = "Child")]`: nested member with an explicit name.
/// - `#[bind(embed)]`: embedded member, named after its type.
/// - `#[bind(file)]` or `#[bind(file = "form_name")]`: receives uploads.
///   `Option<FileHeader>` takes the first file, `Vec<FileHeader>` takes all.
#[proc_macro_derive(Bind, attributes(bind))]
pub fn bind_derive(input: TokenStream) -> TokenStream {
    bind::bind_derive_impl(input)
}
