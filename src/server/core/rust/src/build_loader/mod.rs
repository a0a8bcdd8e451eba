/* src/server/core/rust/src/build_loader/mod.rs */

mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use loader::{
  LOCALES_DIR, LoadError, ROUTE_MANIFEST, RPC_HASH_MAP, load_build_output, load_i18n_config,
  load_rpc_hash_map,
};
pub use types::RpcHashMap;
