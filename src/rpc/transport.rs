//! Endpoint constructors for concrete transports.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::endpoint::{Closer, Endpoint};
use crate::config::{listen_address_from_env, EndpointConfig};

impl Endpoint {
    /// Endpoint over a connected Unix socket. Closing shuts the socket down
    /// in both directions.
    pub fn unix(stream: UnixStream, config: EndpointConfig) -> crate::Result<Self> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        let closer: Closer = Box::new(move || shutdown_unix(&stream));
        Self::new(reader, writer, Some(closer), config)
    }

    /// Endpoint over a connected TCP stream.
    pub fn tcp(stream: TcpStream, config: EndpointConfig) -> crate::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        let closer: Closer = Box::new(move || shutdown_tcp(&stream));
        Self::new(reader, writer, Some(closer), config)
    }

    /// Endpoint over this process's stdin and stdout, for a plugin host the
    /// editor launched as a job.
    ///
    /// Stdin cannot be interrupted, so the read loop only ends when the editor
    /// closes the pipe.
    pub fn stdio(config: EndpointConfig) -> crate::Result<Self> {
        Self::new(io::stdin(), io::stdout(), None, config)
    }

    /// Connect to `address`.
    ///
    /// An address containing a path separator, or without a `:`, is a Unix
    /// socket path; anything else is a TCP `host:port`.
    pub fn dial(address: &str, config: EndpointConfig) -> Result<Self> {
        if is_socket_path(address) {
            debug!(path = %address, "connecting to unix socket");
            let stream = UnixStream::connect(Path::new(address))
                .with_context(|| format!("Failed to connect to socket at {}", address))?;
            Self::unix(stream, config).context("Failed to start endpoint")
        } else {
            debug!(address = %address, "connecting over tcp");
            let stream = TcpStream::connect(address)
                .with_context(|| format!("Failed to connect to {}", address))?;
            Self::tcp(stream, config).context("Failed to start endpoint")
        }
    }

    /// Connect to the editor this process runs under (`$NVIM`, then
    /// `$NVIM_LISTEN_ADDRESS`).
    pub fn connect_env(config: EndpointConfig) -> Result<Self> {
        let address = listen_address_from_env()
            .context("Neither NVIM nor NVIM_LISTEN_ADDRESS is set")?;
        Self::dial(&address, config)
    }
}

fn is_socket_path(address: &str) -> bool {
    address.contains('/') || !address.contains(':')
}

// A peer that already hung up leaves the socket disconnected; that is not an
// error when closing.
fn shutdown_unix(stream: &UnixStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

fn shutdown_tcp(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}
