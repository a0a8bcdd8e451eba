/* src/server/core/rust/src/lib.rs */

pub mod build_loader;
pub mod channel;
pub mod config;
pub mod errors;
pub mod i18n;
pub mod manifest;
pub mod page;
pub mod procedure;
pub mod resolve;
pub mod route;
pub mod router;
pub mod schema;
pub mod subscription;
pub mod template;

pub use build_loader::{LoadError, RpcHashMap, load_build_output, load_i18n_config, load_rpc_hash_map};
pub use channel::{ChannelDef, ChannelEmitter, ChannelEvent, ChannelMeta, ChannelSource, IncomingDef};
pub use config::WeftConfig;
pub use errors::{ErrorCode, WeftError};
pub use i18n::I18nConfig;
pub use manifest::{Manifest, build_manifest};
pub use page::{LayoutDef, LoaderDef, PageDef, ParamSource, ParamType};
pub use procedure::{BoxFuture, BoxStream, ProcedureCtx, ProcedureDef, ProcedureKind};
pub use resolve::{
  LocaleResolver, ResolveData, ResolveStrategy, default_strategies, from_accept_language,
  from_cookie, from_url_prefix, from_url_query, resolve_chain,
};
pub use route::{RouteError, RouteMatch, RouteMatcher};
pub use router::{
  BATCH_NAME, PageRequest, PageResponse, RegistrationError, ReloadError, Router, RouterBuilder,
  RpcResponse,
};
pub use schema::{SchemaNode, ValidationError, ValidationOptions, validate};
pub use subscription::{EventSink, Frame, ListenerRegistry, PushSource, Subscription};
pub use template::{LayoutShell, OUTLET_MARKER};
pub use weft_injector::{ascii_escape_json, build_sentinel_tree, extract_data, inject, inject_no_script};
pub use weft_macros::{WeftType, weft_command, weft_procedure, weft_subscription};

/// Types that describe their own schema.
/// Derive with `#[derive(WeftType)]` or implement by hand.
pub trait WeftType {
  fn schema() -> SchemaNode;
}

macro_rules! impl_weft_type_leaf {
  ($rust_ty:ty, $ctor:ident) => {
    impl WeftType for $rust_ty {
      fn schema() -> SchemaNode {
        SchemaNode::$ctor()
      }
    }
  };
}

impl_weft_type_leaf!(String, string);
impl_weft_type_leaf!(bool, boolean);
impl_weft_type_leaf!(i8, int8);
impl_weft_type_leaf!(i16, int16);
impl_weft_type_leaf!(i32, int32);
impl_weft_type_leaf!(u8, uint8);
impl_weft_type_leaf!(u16, uint16);
impl_weft_type_leaf!(u32, uint32);
impl_weft_type_leaf!(f32, float32);
impl_weft_type_leaf!(f64, float64);

impl WeftType for serde_json::Value {
  fn schema() -> SchemaNode {
    SchemaNode::any()
  }
}

impl<T: WeftType> WeftType for Vec<T> {
  fn schema() -> SchemaNode {
    SchemaNode::array(T::schema())
  }
}

impl<T: WeftType> WeftType for Option<T> {
  fn schema() -> SchemaNode {
    SchemaNode::nullable(T::schema())
  }
}

impl<T: WeftType> WeftType for std::collections::HashMap<String, T> {
  fn schema() -> SchemaNode {
    SchemaNode::values(T::schema())
  }
}

impl<T: WeftType> WeftType for std::collections::BTreeMap<String, T> {
  fn schema() -> SchemaNode {
    SchemaNode::values(T::schema())
  }
}

#[cfg(test)]
extern crate self as weft_server;
