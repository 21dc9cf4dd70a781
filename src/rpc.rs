//! MessagePack-RPC endpoint.
//!
//! An [`Endpoint`] multiplexes outgoing calls, incoming requests and incoming
//! notifications over one duplex byte stream:
//!
//! - `endpoint` - message framing, pending-call table, read loop, shutdown
//! - `handler` - typed handler registration and argument binding
//! - `notify` - single-worker queue that keeps notifications in order
//! - `batch` - atomic compound calls
//! - `transport` - Unix socket, TCP and stdio constructors
//!
//! # Example
//!
//! ```no_run
//! use nvrpc::{Endpoint, EndpointConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let nvim = Endpoint::connect_env(EndpointConfig::default())?;
//! nvim.register("greet", |name: String| -> Result<String, String> {
//!     Ok(format!("hello, {}", name))
//! })?;
//! let serve = nvim.spawn_serve()?;
//!
//! let mut info = (0u64, nvrpc::msgpack::Value::Nil);
//! nvim.call("nvim_get_api_info", &mut info, &())?;
//! println!("channel {}", info.0);
//!
//! nvim.close()?;
//! serve.join().ok();
//! # Ok(())
//! # }
//! ```

mod batch;
mod endpoint;
mod handler;
mod notify;
mod transport;

pub use batch::Batch;
pub use endpoint::{Closer, Endpoint, NOTIFICATION, REPLY, REQUEST};
pub use handler::{ArgList, Args, FromArg, Handler, IntoReply, Reply, Variadic};
