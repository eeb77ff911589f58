//! The agent command source (spec.md §6.1).
//!
//! Grounded on `original_source/media-proxy/include/mesh/proxy_api.h`'s
//! `ProxyAPIClient` (a gRPC stub that streams commands and relays replies).
//! The actual RPC transport is external (spec.md §1 "out of scope: the RPC
//! surfaces to the SDK and the agent"); this module only defines the
//! `CommandSource` seam the core drives.

use crate::config::Config;
use async_trait::async_trait;

/// The two agent commands the core acts on (spec.md §6.1). A real agent
/// stream carries more (registration, health) but only these drive runtime
/// behaviour.
#[derive(Debug, Clone)]
pub enum AgentCommand {
    ApplyConfig(Config),
    Debug(String),
}

/// Why a command stream ended, so the caller knows whether to re-register
/// with the agent and resume, or exit cleanly (spec.md §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    NotFound,
    Cancelled,
}

/// An ordered stream of agent commands. `ack` must be called before the
/// caller applies an `ApplyConfig` payload, so the acknowledgement path
/// cannot deadlock against the reconciler's locks (spec.md §6.1).
#[async_trait]
pub trait CommandSource: Send + Sync + 'static {
    /// Returns the next command, or `Err(StreamEnd)` once the stream ends.
    async fn next_command(&self) -> Result<AgentCommand, StreamEnd>;

    /// Acknowledges receipt of the command at `sequence` (an opaque
    /// monotonic marker the source assigns; a `CommandSource` with no
    /// notion of sequencing may ignore the argument and always succeed).
    async fn ack(&self, sequence: u64);
}
