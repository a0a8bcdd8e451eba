/* src/server/core/rust-macros/src/weft_procedure.rs */

use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{FnArg, GenericArgument, ItemFn, LitStr, Pat, PathArguments, ReturnType, Token, Type};

#[derive(Clone, Copy)]
pub(crate) enum CallKind {
  Query,
  Command,
}

pub(crate) struct ProcedureAttr {
  pub name: Option<String>,
  pub error: Option<syn::Path>,
}

impl Parse for ProcedureAttr {
  fn parse(input: ParseStream) -> syn::Result<Self> {
    let mut name = None;
    let mut error = None;

    while !input.is_empty() {
      let ident: syn::Ident = input.parse()?;
      input.parse::<Token![=]>()?;
      if ident == "name" {
        name = Some(input.parse::<LitStr>()?.value());
      } else if ident == "error" {
        error = Some(input.parse::<syn::Path>()?);
      } else {
        return Err(syn::Error::new_spanned(ident, "expected `name` or `error`"));
      }
      if !input.is_empty() {
        input.parse::<Token![,]>()?;
      }
    }

    Ok(ProcedureAttr { name, error })
  }
}

pub fn expand(attr: TokenStream, item: ItemFn, kind: CallKind) -> syn::Result<TokenStream> {
  let attr: ProcedureAttr = syn::parse2(attr)?;
  let fn_name = &item.sig.ident;
  let factory_name = syn::Ident::new(&format!("{fn_name}_procedure"), fn_name.span());

  let input_type = extract_input_type(&item)?;
  let output_type = first_generic(result_type(&item)?)
    .ok_or_else(|| syn::Error::new_spanned(&item.sig.output, "expected `Result<T, WeftError>`"))?;
  let name_str = attr.name.unwrap_or_else(|| fn_name.to_string());
  let (ctx_param, call) = call_tokens(&item)?;

  let constructor = match kind {
    CallKind::Query => quote! { query },
    CallKind::Command => quote! { command },
  };
  let with_error = attr.error.map(|path| {
    quote! { .with_error(<#path as weft_server::WeftType>::schema()) }
  });

  Ok(quote! {
    #item

    pub fn #factory_name() -> weft_server::ProcedureDef {
      weft_server::ProcedureDef::#constructor(
        #name_str,
        <#input_type as weft_server::WeftType>::schema(),
        <#output_type as weft_server::WeftType>::schema(),
        |value: serde_json::Value, #ctx_param: weft_server::ProcedureCtx| async move {
          let input: #input_type = serde_json::from_value(value)
            .map_err(|e| weft_server::WeftError::validation(e.to_string()))?;
          let output = #call.await?;
          serde_json::to_value(output).map_err(|e| weft_server::WeftError::internal(e.to_string()))
        },
      )
      #with_error
    }
  })
}

/// Parameter name for the context and the call expression for `item`.
/// Handlers take `(input)` or `(input, ctx)`.
pub(crate) fn call_tokens(item: &ItemFn) -> syn::Result<(syn::Ident, TokenStream)> {
  let fn_name = &item.sig.ident;
  match item.sig.inputs.len() {
    1 => Ok((syn::Ident::new("_ctx", fn_name.span()), quote! { #fn_name(input) })),
    2 => Ok((syn::Ident::new("ctx", fn_name.span()), quote! { #fn_name(input, ctx) })),
    _ => Err(syn::Error::new_spanned(
      &item.sig.inputs,
      "expected `(input)` or `(input, ctx: ProcedureCtx)` parameters",
    )),
  }
}

pub(crate) fn extract_input_type(item: &ItemFn) -> syn::Result<Type> {
  let arg = item.sig.inputs.first().ok_or_else(|| {
    syn::Error::new_spanned(&item.sig, "procedure must take its input as the first parameter")
  })?;

  match arg {
    FnArg::Typed(pat_type) => {
      if let Pat::Ident(_) = &*pat_type.pat {
        Ok((*pat_type.ty).clone())
      } else {
        Err(syn::Error::new_spanned(&pat_type.pat, "expected a simple identifier pattern"))
      }
    }
    FnArg::Receiver(_) => Err(syn::Error::new_spanned(arg, "procedure cannot take self")),
  }
}

pub(crate) fn result_type(item: &ItemFn) -> syn::Result<&Type> {
  match &item.sig.output {
    ReturnType::Type(_, ty) => Ok(ty),
    ReturnType::Default => {
      Err(syn::Error::new_spanned(&item.sig, "procedure must return `Result<T, WeftError>`"))
    }
  }
}

/// First type argument of the last path segment: `T` in `Result<T, E>`.
pub(crate) fn first_generic(ty: &Type) -> Option<&Type> {
  let Type::Path(tp) = ty else { return None };
  let PathArguments::AngleBracketed(args) = &tp.path.segments.last()?.arguments else {
    return None;
  };
  args.args.iter().find_map(|arg| match arg {
    GenericArgument::Type(inner) => Some(inner),
    _ => None,
  })
}
