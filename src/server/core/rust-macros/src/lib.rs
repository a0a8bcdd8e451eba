/* src/server/core/rust-macros/src/lib.rs */

mod weft_procedure;
mod weft_subscription;
mod weft_type;

use proc_macro::TokenStream;
use syn::{DeriveInput, ItemFn, parse_macro_input};

use weft_procedure::CallKind;

/// Derive `weft_server::WeftType` for a struct with named fields or an
/// enum of unit variants.
#[proc_macro_derive(WeftType, attributes(serde))]
pub fn derive_weft_type(input: TokenStream) -> TokenStream {
  let input = parse_macro_input!(input as DeriveInput);
  weft_type::expand(input).unwrap_or_else(syn::Error::into_compile_error).into()
}

/// Generate `{fn}_procedure()` returning a query `ProcedureDef`.
#[proc_macro_attribute]
pub fn weft_procedure(attr: TokenStream, item: TokenStream) -> TokenStream {
  let item = parse_macro_input!(item as ItemFn);
  weft_procedure::expand(attr.into(), item, CallKind::Query)
    .unwrap_or_else(syn::Error::into_compile_error)
    .into()
}

/// Like [`weft_procedure`], registered as a command.
#[proc_macro_attribute]
pub fn weft_command(attr: TokenStream, item: TokenStream) -> TokenStream {
  let item = parse_macro_input!(item as ItemFn);
  weft_procedure::expand(attr.into(), item, CallKind::Command)
    .unwrap_or_else(syn::Error::into_compile_error)
    .into()
}

/// Generate `{fn}_procedure()` for a function returning a stream of results.
#[proc_macro_attribute]
pub fn weft_subscription(attr: TokenStream, item: TokenStream) -> TokenStream {
  let item = parse_macro_input!(item as ItemFn);
  weft_subscription::expand(attr.into(), item).unwrap_or_else(syn::Error::into_compile_error).into()
}
