//! Endpoint configuration.

use serde::{Deserialize, Serialize};

use crate::msgpack::DEFAULT_READ_BUFFER;

/// Compound-call method the editor exposes for batches.
pub const DEFAULT_BATCH_METHOD: &str = "nvim_call_atomic";

/// Environment variables that carry the editor's listen address, in lookup
/// order.
pub const LISTEN_ADDRESS_VARS: [&str; 2] = ["NVIM", "NVIM_LISTEN_ADDRESS"];

/// Tunables for an [`Endpoint`](crate::rpc::Endpoint).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use nvrpc::EndpointConfig;
///
/// let config = EndpointConfig::from_json(r#"{"worker_name": "plugin"}"#).unwrap();
/// assert_eq!(config.worker_name, "plugin");
/// assert_eq!(config.batch_method, "nvim_call_atomic");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Peer method that executes a batch.
    pub batch_method: String,
    /// Capacity of the buffered reader and writer around the transport.
    pub read_buffer_size: usize,
    /// Prefix for the names of threads the endpoint spawns.
    pub worker_name: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            batch_method: DEFAULT_BATCH_METHOD.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER,
            worker_name: "nvrpc".to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Listen address of the editor this process runs under, if any.
///
/// Checks `$NVIM` first, then the older `$NVIM_LISTEN_ADDRESS`. Empty values
/// are ignored.
pub fn listen_address_from_env() -> Option<String> {
    LISTEN_ADDRESS_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.batch_method, "nvim_call_atomic");
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.worker_name, "nvrpc");
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            EndpointConfig::from_json(r#"{"batch_method": "call_all", "read_buffer_size": 1024}"#)
                .unwrap();
        assert_eq!(config.batch_method, "call_all");
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.worker_name, "nvrpc");

        assert!(EndpointConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_roundtrip_json() {
        let config = EndpointConfig {
            batch_method: "m".into(),
            read_buffer_size: 1,
            worker_name: "w".into(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EndpointConfig::from_json(&json).unwrap(), config);
    }
}
