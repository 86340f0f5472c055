//! Procedural macros for the docmodel project.
//!
//! This crate provides `#[derive(Schema)]`, which registers a struct's field
//! table with the docmodel mapping core.

#[allow(unused_extern_crates)]
extern crate self as docmodel_macros;

mod schema;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `docmodel::schema::Schema` and `docmodel::field::Coerce`.
///
/// Every named member becomes a field, in declaration order; a member named
/// `id` becomes the identifier and must be an `Option<ObjectId>`. Only types
/// with an identifier can implement `Model`; the others can still be
/// embedded. The type must also implement `Clone`, `Default` and `Debug`.
///
/// # Attributes
///
/// - `#[model(collection = "name")]` - overrides the collection name, which
///   otherwise is the lower-cased type name
/// - `#[field(key = "k")]` - stores the member under another key
/// - `#[field(default = expr)]` - value reported while the member is unset;
///   `expr` must convert into the member's value type
/// - `#[field(auto_now)]`, `#[field(auto_now_on_create)]` - timestamp stamping
/// - `#[field(sequence = "counter")]` - draws the value from a named counter
///   on first save
/// - `#[field(skip)]` - leaves the member out of the field table
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Schema)]
/// #[model(collection = "votes")]
/// struct Vote {
///     id: Option<ObjectId>,
///     voter: Option<String>,
///     #[field(auto_now_on_create)]
///     cast_at: Option<DateTime<Utc>>,
/// }
/// ```
#[proc_macro_derive(Schema, attributes(model, field))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    schema::expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
