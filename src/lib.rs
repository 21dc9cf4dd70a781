//! nvrpc Library
//!
//! MessagePack codec and MessagePack-RPC endpoint for talking to an external
//! editor process (Neovim) over a socket, TCP or stdio:
//!
//! - `msgpack` - wire codec, typed encode/decode, struct field tags, dynamic values
//! - `rpc` - endpoint, handler registration, ordered notifications, atomic batches
//! - `config` - endpoint tunables and listen-address discovery
//! - `error` - shared error type
//!
//! # Example
//!
//! ```no_run
//! use nvrpc::{msgpack_struct, Endpoint, EndpointConfig};
//!
//! #[derive(Debug, Default)]
//! struct Mode {
//!     mode: String,
//!     blocking: bool,
//! }
//!
//! msgpack_struct!(Mode { mode, blocking });
//!
//! # fn main() -> anyhow::Result<()> {
//! let nvim = Endpoint::dial("/tmp/nvim.sock", EndpointConfig::default())?;
//! nvim.spawn_serve()?;
//!
//! let mut mode = Mode::default();
//! nvim.call("nvim_get_mode", &mut mode, &())?;
//! println!("{:?}", mode);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod msgpack;
pub mod rpc;

pub use config::EndpointConfig;
pub use error::{ConvertError, Error, Result};
pub use rpc::{Batch, Endpoint, Variadic};
