//! The zero-copy gateway abstraction a bridge wrapper drives (spec.md
//! §4.6), grounded on `original_source/media-proxy/include/mesh/gateway_zc.h`'s
//! `GatewayRx`/`GatewayTx` pair. The gateway itself (the shared-memory IPC
//! framing) is external to this crate (spec.md §6.3); only the shape of the
//! interaction — init from a `ZcConfig`, push/pull a buffer, shut down, and
//! report the connection-level outcome back — is in scope.

use crate::cancel::CancellationToken;
use crate::error::{CoreError, Result};
use crate::group::ZcConfig;
use async_trait::async_trait;

/// The gateway's own result vocabulary, translated to/from [`CoreError`] at
/// the wrapper boundary (spec.md §4.6 "translating gateway results to
/// connection results one-to-one").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    WrongState,
    ContextCancelled,
    Other,
}

pub type GatewayResult<T> = std::result::Result<T, GatewayOutcome>;

/// `WrapperRx`'s side: data arriving from the inner bridge is pushed into
/// the shared region.
#[async_trait]
pub trait RxGateway: Send + Sync + 'static {
    async fn init(&self, cfg: ZcConfig) -> Result<()>;
    async fn transmit(&self, ctx: &CancellationToken, data: &[u8]) -> GatewayResult<usize>;
    async fn shutdown(&self, ctx: &CancellationToken);
}

/// `WrapperTx`'s side: the gateway pulls a buffer from the shared region and
/// hands it to the registered callback, which forwards it to the inner
/// bridge. Modelled here as a direct call rather than a stored callback,
/// since the wrapper's `on_receive`/hot path already plays that role.
#[async_trait]
pub trait TxGateway: Send + Sync + 'static {
    async fn init(&self, cfg: ZcConfig) -> Result<()>;
    /// Reports the outcome of handing a pulled buffer to the inner bridge,
    /// so the gateway can release or retry its own buffer bookkeeping.
    async fn notify_result(&self, outcome: GatewayOutcome);
    async fn shutdown(&self, ctx: &CancellationToken);
}

/// `connection result -> gateway result`, documented one-to-one for
/// `success`/`wrong_state`/`context_cancelled`; everything else collapses to
/// `error_general_failure` (spec.md §4.6).
pub fn gateway_to_core(result: GatewayResult<usize>) -> Result<usize> {
    match result {
        Ok(n) => Ok(n),
        Err(GatewayOutcome::WrongState) => Err(CoreError::wrong_state("gateway reported wrong state")),
        Err(GatewayOutcome::ContextCancelled) => Err(CoreError::context_cancelled()),
        Err(GatewayOutcome::Success) | Err(GatewayOutcome::Other) => {
            Err(CoreError::general_failure("gateway reported failure"))
        }
    }
}

/// The same table, reversed: a `Connection` result translated into the
/// outcome `WrapperTx` reports back to its gateway.
pub fn core_to_gateway(result: &Result<usize>) -> GatewayOutcome {
    match result {
        Ok(_) => GatewayOutcome::Success,
        Err(CoreError::WrongState { .. }) => GatewayOutcome::WrongState,
        Err(CoreError::ContextCancelled { .. }) => GatewayOutcome::ContextCancelled,
        Err(_) => GatewayOutcome::Other,
    }
}
