//! Daemon RPC for the Veil wallet engine.
//!
//! Provides the `DaemonClient` interface the wallet scans and relays through,
//! and `DaemonRpc`, its async HTTP implementation over the daemon's JSON and
//! JSON-RPC endpoints.
//!
//! # Example
//!
//! ```ignore
//! use veil_rpc::{DaemonClient, DaemonRpc};
//!
//! #[tokio::main]
//! async fn main() {
//!     let daemon = DaemonRpc::new("http://localhost:18081").unwrap();
//!     let height = daemon.get_height().await.unwrap();
//!     println!("Height: {}", height);
//! }
//! ```

pub mod client;
pub mod daemon;
pub mod error;
pub mod parse;

pub use client::{RpcClient, RpcConfig};
pub use daemon::{DaemonClient, DaemonRpc};
pub use error::RpcError;

/// Default daemon RPC ports.
pub mod ports {
    pub const DAEMON_MAINNET: u16 = 18081;
    pub const DAEMON_TESTNET: u16 = 28081;
    pub const DAEMON_STAGENET: u16 = 38081;
}
