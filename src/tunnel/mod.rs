pub mod config;
pub mod observer;
pub mod state;
pub mod statistics;

pub use config::{InterfaceConfig, PeerConfig, TunnelConfig};
pub use observer::{Subscription, TunnelField};
pub use state::TunnelState;
pub use statistics::{PeerStatistics, Statistics, Timestamp};

use crate::errors::TunnelError;
use crate::manager::TunnelManager;
use arc_swap::{ArcSwap, ArcSwapOption};
use observer::ChangeNotifier;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

pub const NAME_MAX_LENGTH: usize = 16;

/// True iff the whole string matches `[a-zA-Z0-9_=+.-]{1,16}`.
///
/// Exposed so UIs can validate as the user types; the manager checks it again
/// before any create or rename.
pub fn is_name_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= NAME_MAX_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'))
}

/// The volatile and nonvolatile state of one WireGuard tunnel.
///
/// A `Tunnel` is created and owned by its [`TunnelManager`]; everything else
/// holds `Arc` clones. The record caches the last known configuration, state,
/// and statistics, and emits a per-field change signal whenever the manager
/// pushes an authoritative update through one of the `on_*_changed` hooks.
///
/// The synchronous accessors never block: a cache miss returns `None`
/// immediately and schedules a background fetch whose completion will emit a
/// change signal.
pub struct Tunnel {
    name: String,
    manager: Weak<dyn TunnelManager>,
    runtime: tokio::runtime::Handle,
    config: ArcSwapOption<TunnelConfig>,
    state: ArcSwap<TunnelState>,
    statistics: ArcSwapOption<Statistics>,
    notifier: ChangeNotifier,
}

impl Tunnel {
    pub(crate) fn new(
        manager: Weak<dyn TunnelManager>,
        runtime: tokio::runtime::Handle,
        name: &str,
        config: Option<Arc<TunnelConfig>>,
        state: TunnelState,
    ) -> Result<Arc<Self>, TunnelError> {
        if !is_name_valid(name) {
            return Err(TunnelError::InvalidName {
                name: name.to_string(),
            });
        }
        debug_assert!(state.is_resting(), "initial state must be Up or Down");

        Ok(Arc::new(Self {
            name: name.to_string(),
            manager,
            runtime,
            config: ArcSwapOption::new(config),
            state: ArcSwap::from_pointee(state),
            statistics: ArcSwapOption::empty(),
            notifier: ChangeNotifier::default(),
        }))
    }

    /// Identity projection: tunnels are keyed by name within their manager.
    pub fn key(&self) -> &str {
        &self.name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known configuration. On a cache miss this schedules a background
    /// fetch (failures go to the log) and returns `None` right away; a change
    /// signal fires once the fetch lands.
    pub fn config(self: &Arc<Self>) -> Option<Arc<TunnelConfig>> {
        let cached = self.config.load_full();
        if cached.is_none() {
            self.spawn_background_refresh(TunnelField::Config);
        }
        cached
    }

    /// Cached configuration if present, otherwise a fetch through the manager.
    pub async fn config_async(&self) -> Result<Arc<TunnelConfig>, TunnelError> {
        if let Some(config) = self.config.load_full() {
            return Ok(config);
        }
        self.manager()?.get_tunnel_config(self).await
    }

    /// Current resting state. Always present, never [`TunnelState::Toggle`].
    pub fn state(&self) -> TunnelState {
        **self.state.load()
    }

    /// Fresh state from the manager. Deliberately skips the cache: the kernel
    /// can drift behind the record, and async callers want a current answer.
    pub async fn state_async(&self) -> Result<TunnelState, TunnelError> {
        self.manager()?.get_tunnel_state(self).await
    }

    /// Last known statistics snapshot; same lazy-fetch shape as
    /// [`Tunnel::config`]. Absent whenever the tunnel is not up.
    pub fn statistics(self: &Arc<Self>) -> Option<Arc<Statistics>> {
        let cached = self.statistics.load_full();
        if cached.is_none() {
            self.spawn_background_refresh(TunnelField::Statistics);
        }
        cached
    }

    pub async fn statistics_async(&self) -> Result<Arc<Statistics>, TunnelError> {
        if let Some(statistics) = self.statistics.load_full() {
            return Ok(statistics);
        }
        self.manager()?.get_tunnel_statistics(self).await
    }

    /// Replaces the configuration through the manager. Setting a config equal
    /// to the cached one completes immediately without a manager round-trip
    /// and without a change signal.
    pub async fn set_config(&self, config: TunnelConfig) -> Result<Arc<TunnelConfig>, TunnelError> {
        if let Some(current) = self.config.load_full()
            && *current == config
        {
            return Ok(current);
        }
        self.manager()?.set_tunnel_config(self, config).await
    }

    /// Requests a state transition. A no-op target short-circuits;
    /// [`TunnelState::Toggle`] never equals a resting value, so it always
    /// reaches the manager, which resolves the flip.
    pub async fn set_state(&self, state: TunnelState) -> Result<TunnelState, TunnelError> {
        let current = self.state();
        if state == current {
            return Ok(current);
        }
        self.manager()?.set_tunnel_state(self, state).await
    }

    /// Renames the tunnel. Renaming to the current name is a no-op returning
    /// this record; otherwise the manager decides whether the returned record
    /// is this instance or a replacement.
    pub async fn rename(self: &Arc<Self>, new_name: &str) -> Result<Arc<Tunnel>, TunnelError> {
        if new_name == self.name {
            return Ok(Arc::clone(self));
        }
        self.manager()?.rename(self, new_name).await
    }

    /// Deletes the tunnel. On success the record is detached from its manager
    /// and should not be used further.
    pub async fn delete(&self) -> Result<(), TunnelError> {
        self.manager()?.delete(self).await
    }

    /// Registers a zero-argument "this field changed, re-read it" callback.
    pub fn subscribe<F>(&self, field: TunnelField, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.subscribe(field, callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.notifier.unsubscribe(subscription)
    }

    /// Change signals for one field as an async stream. The subscription
    /// lives as long as the record; dropping the receiver just discards
    /// further signals.
    pub fn changes(&self, field: TunnelField) -> mpsc::UnboundedReceiver<()> {
        self.notifier.watch(field)
    }

    pub(crate) fn on_config_changed(&self, config: Arc<TunnelConfig>) -> Arc<TunnelConfig> {
        self.config.store(Some(Arc::clone(&config)));
        self.notifier.notify(TunnelField::Config);
        config
    }

    /// Applies an authoritative state update. On any transition away from
    /// `Up` the statistics cache is cleared, and its change signal is emitted
    /// strictly before the state signal, so a listener reacting to the state
    /// transition never observes stale counters.
    pub(crate) fn on_state_changed(&self, state: TunnelState) -> TunnelState {
        debug_assert!(
            state.is_resting(),
            "managers must resolve Toggle before reporting a state"
        );
        if state != TunnelState::Up {
            self.on_statistics_changed(None);
        }
        self.state.store(Arc::new(state));
        self.notifier.notify(TunnelField::State);
        state
    }

    pub(crate) fn on_statistics_changed(
        &self,
        statistics: Option<Arc<Statistics>>,
    ) -> Option<Arc<Statistics>> {
        self.statistics.store(statistics.clone());
        self.notifier.notify(TunnelField::Statistics);
        statistics
    }

    fn manager(&self) -> Result<Arc<dyn TunnelManager>, TunnelError> {
        self.manager.upgrade().ok_or(TunnelError::Detached)
    }

    fn spawn_background_refresh(self: &Arc<Self>, field: TunnelField) {
        let Some(manager) = self.manager.upgrade() else {
            tracing::warn!(
                "Skipping background {} refresh for tunnel '{}': manager is gone",
                field,
                self.name
            );
            return;
        };
        let tunnel = Arc::clone(self);
        self.runtime.spawn(async move {
            let result = match field {
                TunnelField::Config => manager.get_tunnel_config(&tunnel).await.map(|_| ()),
                TunnelField::State => manager.get_tunnel_state(&tunnel).await.map(|_| ()),
                TunnelField::Statistics => {
                    manager.get_tunnel_statistics(&tunnel).await.map(|_| ())
                }
            };
            if let Err(e) = result {
                tracing::warn!(
                    "Background {} refresh for tunnel '{}' failed: {}",
                    field,
                    tunnel.name,
                    e
                );
            }
        });
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
