/* src/client/rust/src/lib.rs */

mod client;
mod error;
mod transport;

pub use client::{BATCH_ENDPOINT, RpcClient, WireNames};
pub use error::ClientError;
pub use transport::{HttpTransport, Transport, WireResponse};
