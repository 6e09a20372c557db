pub mod memory;
pub mod store;

use crate::errors::TunnelError;
use crate::tunnel::{Statistics, Tunnel, TunnelConfig, TunnelState};
use async_trait::async_trait;
use std::sync::Arc;

/// The persistence and kernel-orchestration seam behind every [`Tunnel`].
///
/// A manager owns its tunnels and outlives them; records reach back through a
/// weak handle. Implementations must push every authoritative update into the
/// record via its `on_*_changed` hooks (which is where change signals come
/// from) and must serialize concurrent mutations. Hooks run subscriber
/// callbacks synchronously on the calling task, so they are invoked with the
/// new value already applied and must not be re-entered from a callback.
#[async_trait]
pub trait TunnelManager: Send + Sync {
    /// Fetches the stored configuration and pushes it into the record.
    async fn get_tunnel_config(&self, tunnel: &Tunnel) -> Result<Arc<TunnelConfig>, TunnelError>;

    /// Reads the kernel's view of the tunnel and pushes it into the record.
    /// Always resolves to a resting state, never [`TunnelState::Toggle`].
    async fn get_tunnel_state(&self, tunnel: &Tunnel) -> Result<TunnelState, TunnelError>;

    /// Collects a fresh counter snapshot for a running tunnel and pushes it
    /// into the record. Fails for tunnels that are not up.
    async fn get_tunnel_statistics(
        &self,
        tunnel: &Tunnel,
    ) -> Result<Arc<Statistics>, TunnelError>;

    /// Persists a new configuration. The returned snapshot is authoritative.
    async fn set_tunnel_config(
        &self,
        tunnel: &Tunnel,
        config: TunnelConfig,
    ) -> Result<Arc<TunnelConfig>, TunnelError>;

    /// Applies a state transition. [`TunnelState::Toggle`] means "flip the
    /// current state" and is resolved against the kernel view.
    async fn set_tunnel_state(
        &self,
        tunnel: &Tunnel,
        state: TunnelState,
    ) -> Result<TunnelState, TunnelError>;

    /// Re-keys the tunnel under `new_name`. The returned record may be a new
    /// instance; the old handle is no longer tracked on success.
    async fn rename(
        &self,
        tunnel: &Arc<Tunnel>,
        new_name: &str,
    ) -> Result<Arc<Tunnel>, TunnelError>;

    /// Removes the tunnel from the registry and its stored configuration.
    async fn delete(&self, tunnel: &Tunnel) -> Result<(), TunnelError>;
}
