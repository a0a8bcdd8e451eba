/* src/server/core/rust-macros/src/weft_subscription.rs */

use proc_macro2::TokenStream;
use quote::quote;
use syn::ItemFn;

use crate::weft_procedure::{
  ProcedureAttr, call_tokens, extract_input_type, first_generic, result_type,
};

/// The handler returns `Result<S, WeftError>` where `S` is a stream type
/// whose first type argument is `Result<T, WeftError>`, e.g.
/// `BoxStream<Result<T, WeftError>>`. `T` becomes the output schema.
pub fn expand(attr: TokenStream, item: ItemFn) -> syn::Result<TokenStream> {
  let attr: ProcedureAttr = syn::parse2(attr)?;
  let fn_name = &item.sig.ident;
  let factory_name = syn::Ident::new(&format!("{fn_name}_procedure"), fn_name.span());

  let input_type = extract_input_type(&item)?;
  let output_type = first_generic(result_type(&item)?)
    .and_then(first_generic)
    .and_then(first_generic)
    .ok_or_else(|| {
      syn::Error::new_spanned(
        &item.sig.output,
        "expected `Result<BoxStream<Result<T, WeftError>>, WeftError>`",
      )
    })?;
  let name_str = attr.name.unwrap_or_else(|| fn_name.to_string());
  let (ctx_param, call) = call_tokens(&item)?;
  let with_error = attr.error.map(|path| {
    quote! { .with_error(<#path as weft_server::WeftType>::schema()) }
  });

  Ok(quote! {
    #item

    pub fn #factory_name() -> weft_server::ProcedureDef {
      weft_server::ProcedureDef::subscription(
        #name_str,
        <#input_type as weft_server::WeftType>::schema(),
        <#output_type as weft_server::WeftType>::schema(),
        |value: serde_json::Value, #ctx_param: weft_server::ProcedureCtx| async move {
          let input: #input_type = serde_json::from_value(value)
            .map_err(|e| weft_server::WeftError::validation(e.to_string()))?;
          let stream = #call.await?;
          Ok(weft_server::PushSource::from_typed_stream(stream))
        },
      )
      #with_error
    }
  })
}
