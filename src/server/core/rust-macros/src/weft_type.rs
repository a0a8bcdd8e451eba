/* src/server/core/rust-macros/src/weft_type.rs */

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Token, Type};

pub fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
  let name = &input.ident;
  let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

  let body = match &input.data {
    Data::Struct(data) => struct_schema(&data.fields, name)?,
    Data::Enum(data) => {
      let mut values = Vec::with_capacity(data.variants.len());
      for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
          return Err(syn::Error::new_spanned(variant, "WeftType enums must have unit variants only"));
        }
        let value = serde_rename(&variant.attrs)?
          .unwrap_or_else(|| variant.ident.to_string().to_lowercase());
        values.push(value);
      }
      quote! { weft_server::SchemaNode::enumeration::<&str>([#(#values),*]) }
    }
    Data::Union(_) => {
      return Err(syn::Error::new_spanned(name, "WeftType cannot be derived for unions"));
    }
  };

  Ok(quote! {
    impl #impl_generics weft_server::WeftType for #name #ty_generics #where_clause {
      fn schema() -> weft_server::SchemaNode {
        #body
      }
    }
  })
}

fn struct_schema(fields: &Fields, name: &syn::Ident) -> syn::Result<TokenStream> {
  let Fields::Named(named) = fields else {
    return Err(syn::Error::new_spanned(name, "WeftType structs must have named fields"));
  };
  let mut entries = Vec::with_capacity(named.named.len());
  for field in &named.named {
    let key = match serde_rename(&field.attrs)? {
      Some(renamed) => renamed,
      None => field.ident.as_ref().map(ToString::to_string).unwrap_or_default(),
    };
    let ty = &field.ty;
    let schema = quote! { <#ty as weft_server::WeftType>::schema() };
    // `Option<T>` fields may be absent as well as null.
    let schema = if is_option(ty) {
      quote! { weft_server::SchemaNode::optional(#schema) }
    } else {
      schema
    };
    entries.push(quote! { (#key, #schema) });
  }
  Ok(quote! { weft_server::SchemaNode::object::<&str>([#(#entries),*]) })
}

fn is_option(ty: &Type) -> bool {
  let Type::Path(tp) = ty else { return false };
  tp.qself.is_none() && tp.path.segments.last().is_some_and(|seg| seg.ident == "Option")
}

/// `#[serde(rename = "...")]`, ignoring every other serde option.
fn serde_rename(attrs: &[Attribute]) -> syn::Result<Option<String>> {
  let mut renamed = None;
  for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
    attr.parse_nested_meta(|meta| {
      if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
        renamed = Some(meta.value()?.parse::<LitStr>()?.value());
      } else if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
      } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|inner| {
          if inner.input.peek(Token![=]) {
            inner.value()?.parse::<syn::Expr>()?;
          }
          Ok(())
        })?;
      }
      Ok(())
    })?;
  }
  Ok(renamed)
}
