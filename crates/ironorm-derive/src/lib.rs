//! Derive macros for `ironorm`.
//!
//! Provides `#[derive(FromRow)]` for the typed row-mapping layer (`client`
//! / `row`). The active-record layer (`model`) is a dynamic attribute bag
//! by design and has no derive counterpart.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod from_row;

/// Derive `FromRow` trait for a struct.
///
/// # Example
///
/// ```ignore
/// use ironorm::FromRow;
///
/// #[derive(FromRow)]
/// struct User {
///     id: i64,
///     username: String,
///     #[orm(column = "email_address")]
///     email: Option<String>,
/// }
/// ```
///
/// # Attributes
///
/// - `#[orm(column = "name")]` - Map field to a different column name
#[proc_macro_derive(FromRow, attributes(orm))]
pub fn derive_from_row(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    from_row::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
