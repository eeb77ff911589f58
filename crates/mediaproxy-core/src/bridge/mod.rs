//! Leaf bridge configuration and the zero-copy wrapper pair (spec.md §3
//! "Bridge configuration", §4.6 "Bridge wrappers").
//!
//! Grounded on `original_source/media-proxy/src/mesh/proxy_api.cc`'s
//! `ApplyConfig` handler (the exact `BridgeConfig` field set this module's
//! [`BridgeConfig`] mirrors) and on
//! `original_source/media-proxy/include/mesh/bridge_zc_wrap_{rx,tx}.h` for
//! the wrapper shape. The concrete ST2110/RDMA leaf transports are external
//! (spec.md §6.3); this crate only defines the [`LeafBridgeFactory`] seam a
//! deployment plugs them in through.

mod gateway;
mod wrapper;

pub use gateway::{core_to_gateway, gateway_to_core, GatewayOutcome, GatewayResult, RxGateway, TxGateway};
pub use wrapper::{configure_wrapper_rx, configure_wrapper_tx, WrapperRxHooks, WrapperTxHooks};

use crate::connection::{Connection, Kind};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;

/// `proxy_api.cc`'s `ApplyConfig` accepts only the literal strings `"tx"`/
/// `"rx"` for a bridge's kind; reproduced here rather than deriving on
/// [`Kind`] itself, since `Kind::Undefined` has no agent-config spelling.
fn deserialize_bridge_kind<'de, D>(deserializer: D) -> std::result::Result<Kind, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.as_str() {
        "tx" => Ok(Kind::Transmitter),
        "rx" => Ok(Kind::Receiver),
        other => Err(serde::de::Error::custom(format!("bad bridge kind: '{other}'"))),
    }
}

/// `type` (spec.md §3): which external leaf transport a bridge speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeType {
    St2110,
    Rdma,
}

/// Payload parameters carried in `conn_config` (spec.md §3), independent of
/// the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "media", rename_all = "snake_case")]
pub enum ConnConfig {
    Video {
        width: u32,
        height: u32,
        fps: f64,
        pixel_format: String,
    },
    Audio {
        channels: u32,
        sample_rate: u32,
        format: String,
        packet_time_us: u32,
    },
}

/// `st2110 {remote-ip, port, transport subtype, payload-type}` (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
pub struct St2110Params {
    pub remote_ip: String,
    pub port: u16,
    pub transport_subtype: String,
    pub payload_type: u8,
}

/// `rdma {remote-ip, port}` (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
pub struct RdmaParams {
    pub remote_ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportParams {
    St2110(St2110Params),
    Rdma(RdmaParams),
}

/// A flat descriptor parsed from agent commands (spec.md §3 "Bridge
/// configuration"). `bridge_type` and the variant carried in `transport`
/// must agree; the reconciler rejects a mismatch the way
/// `proxy_api.cc`'s `ApplyConfig` logs-and-skips one (spec.md §4.9).
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub bridge_type: BridgeType,
    #[serde(deserialize_with = "deserialize_bridge_kind")]
    pub kind: Kind,
    pub conn_config: ConnConfig,
    pub transport: TransportParams,
}

/// Builds the external leaf bridge a `BridgeConfig` describes. A deployment
/// supplies one implementation per supported transport; this crate models
/// only the seam (spec.md §6.3 "External interfaces").
#[async_trait]
pub trait LeafBridgeFactory: Send + Sync + 'static {
    async fn create(&self, cfg: &BridgeConfig) -> Result<Arc<dyn Connection>>;
}
