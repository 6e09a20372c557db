use crate::errors::TunnelError;
use crate::manager::TunnelManager;
use crate::manager::store::ConfigStore;
use crate::tunnel::{
    PeerStatistics, Statistics, Tunnel, TunnelConfig, TunnelState, is_name_valid,
};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory [`TunnelManager`] backed by a [`ConfigStore`] directory.
///
/// Kernel interactions are simulated: "running" is a set membership and
/// statistics are fabricated per poll, growing monotonically while a tunnel
/// stays up. Configuration persistence is real. One async mutex over the
/// registry serializes every mutation, so per-field change signals observe a
/// total order.
pub struct MemoryManager {
    runtime: tokio::runtime::Handle,
    store: ConfigStore,
    cancel: CancellationToken,
    weak_self: Weak<dyn TunnelManager>,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    tunnels: HashMap<String, Arc<Tunnel>>,
    configs: HashMap<String, Arc<TunnelConfig>>,
    running: HashSet<String>,
    stat_polls: HashMap<String, u64>,
}

impl MemoryManager {
    /// Creates a manager over `store_directory` and restores one (down)
    /// tunnel per stored configuration. Configurations are not parsed here;
    /// they are fetched lazily on first access.
    pub async fn new(
        runtime: tokio::runtime::Handle,
        store_directory: PathBuf,
    ) -> Result<Arc<Self>, TunnelError> {
        let store = ConfigStore::new(store_directory);
        let stored = store.list_names().await?;

        let manager = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_self: Weak<dyn TunnelManager> = weak.clone();
            Self {
                runtime,
                store,
                cancel: CancellationToken::new(),
                weak_self,
                registry: Mutex::new(Registry::default()),
            }
        });

        {
            let mut registry = manager.registry.lock().await;
            for name in stored {
                let tunnel = Tunnel::new(
                    manager.weak_self.clone(),
                    manager.runtime.clone(),
                    &name,
                    None,
                    TunnelState::Down,
                )?;
                registry.tunnels.insert(name.clone(), tunnel);
                tracing::info!("Restored tunnel '{}' from store", name);
            }
        }

        Ok(manager)
    }

    /// Validates the name, persists the config, and mints a new down tunnel.
    pub async fn create(
        &self,
        name: &str,
        config: TunnelConfig,
    ) -> Result<Arc<Tunnel>, TunnelError> {
        self.ensure_open()?;
        if !is_name_valid(name) {
            return Err(TunnelError::InvalidName {
                name: name.to_string(),
            });
        }
        config.validate()?;

        let mut registry = self.registry.lock().await;
        if registry.tunnels.contains_key(name) {
            return Err(TunnelError::AlreadyExists(name.to_string()));
        }

        self.store.save(name, &config).await?;

        let config = Arc::new(config);
        let tunnel = Tunnel::new(
            self.weak_self.clone(),
            self.runtime.clone(),
            name,
            Some(Arc::clone(&config)),
            TunnelState::Down,
        )?;
        registry.configs.insert(name.to_string(), config);
        registry
            .tunnels
            .insert(name.to_string(), Arc::clone(&tunnel));

        tracing::info!("Created tunnel '{}'", name);
        Ok(tunnel)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Tunnel>> {
        self.registry.lock().await.tunnels.get(name).cloned()
    }

    pub fn store_directory(&self) -> &std::path::Path {
        self.store.directory()
    }

    /// All live tunnels, sorted by name.
    pub async fn list(&self) -> Vec<Arc<Tunnel>> {
        self.registry
            .lock()
            .await
            .tunnels
            .values()
            .cloned()
            .sorted_by(|a, b| a.name().cmp(b.name()))
            .collect()
    }

    /// Entry point for kernel-initiated state changes (e.g. an interface torn
    /// down behind our back). Updates the kernel view and pushes the
    /// authoritative state into the record.
    pub async fn apply_external_state(
        &self,
        name: &str,
        running: bool,
    ) -> Result<TunnelState, TunnelError> {
        let mut registry = self.registry.lock().await;
        let tunnel = registry
            .tunnels
            .get(name)
            .cloned()
            .ok_or_else(|| TunnelError::NotFound(name.to_string()))?;

        if running {
            registry.running.insert(name.to_string());
        } else {
            registry.running.remove(name);
            registry.stat_polls.remove(name);
        }

        let state = TunnelState::from_running(running);
        tracing::info!("Kernel reported tunnel '{}' {}", name, state);
        Ok(tunnel.on_state_changed(state))
    }

    /// Takes every running tunnel down and refuses all further operations
    /// with [`TunnelError::Cancelled`].
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down manager, stopping all tunnels");
        self.cancel.cancel();

        let mut registry = self.registry.lock().await;
        let names: Vec<String> = registry.running.iter().cloned().sorted().collect();
        for name in names {
            registry.running.remove(&name);
            registry.stat_polls.remove(&name);
            if let Some(tunnel) = registry.tunnels.get(&name) {
                tunnel.on_state_changed(TunnelState::Down);
            }
            tracing::info!("Stopped tunnel '{}' during shutdown", name);
        }

        tracing::info!("Manager shutdown complete");
    }

    fn ensure_open(&self) -> Result<(), TunnelError> {
        if self.cancel.is_cancelled() {
            Err(TunnelError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cached configuration for `name`, reading through to the store on the
    /// first access.
    async fn cached_config(
        &self,
        registry: &mut Registry,
        name: &str,
    ) -> Result<Arc<TunnelConfig>, TunnelError> {
        if let Some(config) = registry.configs.get(name) {
            return Ok(Arc::clone(config));
        }
        let loaded = Arc::new(self.store.load(name).await?);
        registry
            .configs
            .insert(name.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }
}

/// A handle is current only while the registry maps its name to this exact
/// record; renamed-away and deleted handles fail here.
fn ensure_registered(registry: &Registry, tunnel: &Tunnel) -> Result<(), TunnelError> {
    match registry.tunnels.get(tunnel.name()) {
        Some(entry) if std::ptr::eq(Arc::as_ptr(entry), tunnel) => Ok(()),
        _ => Err(TunnelError::NotFound(tunnel.name().to_string())),
    }
}

fn synthesize_statistics(config: &TunnelConfig, polls: u64) -> Statistics {
    let mut peers = BTreeMap::new();
    for (index, peer) in config.peers.iter().enumerate() {
        let base = polls * 1480;
        peers.insert(
            peer.public_key.clone(),
            PeerStatistics {
                rx_bytes: base * (index as u64 + 2),
                tx_bytes: base * (index as u64 + 1),
            },
        );
    }
    Statistics::new(peers)
}

#[async_trait]
impl TunnelManager for MemoryManager {
    async fn get_tunnel_config(&self, tunnel: &Tunnel) -> Result<Arc<TunnelConfig>, TunnelError> {
        self.ensure_open()?;
        let mut registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;

        let config = self.cached_config(&mut registry, tunnel.name()).await?;
        Ok(tunnel.on_config_changed(config))
    }

    async fn get_tunnel_state(&self, tunnel: &Tunnel) -> Result<TunnelState, TunnelError> {
        self.ensure_open()?;
        let registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;

        let state = TunnelState::from_running(registry.running.contains(tunnel.name()));
        Ok(tunnel.on_state_changed(state))
    }

    async fn get_tunnel_statistics(
        &self,
        tunnel: &Tunnel,
    ) -> Result<Arc<Statistics>, TunnelError> {
        self.ensure_open()?;
        let mut registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;

        let name = tunnel.name();
        if !registry.running.contains(name) {
            return Err(TunnelError::Backend(anyhow::anyhow!(
                "Tunnel '{}' is not running",
                name
            )));
        }

        let name = name.to_string();
        let config = self.cached_config(&mut registry, &name).await?;
        let polls = registry
            .stat_polls
            .entry(name)
            .and_modify(|p| *p += 1)
            .or_insert(1);

        let statistics = Arc::new(synthesize_statistics(&config, *polls));
        tunnel.on_statistics_changed(Some(Arc::clone(&statistics)));
        Ok(statistics)
    }

    async fn set_tunnel_config(
        &self,
        tunnel: &Tunnel,
        config: TunnelConfig,
    ) -> Result<Arc<TunnelConfig>, TunnelError> {
        self.ensure_open()?;
        config.validate()?;

        let mut registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;

        self.store.save(tunnel.name(), &config).await?;

        let config = Arc::new(config);
        registry
            .configs
            .insert(tunnel.name().to_string(), Arc::clone(&config));

        tracing::info!("Saved configuration for tunnel '{}'", tunnel.name());
        Ok(tunnel.on_config_changed(config))
    }

    async fn set_tunnel_state(
        &self,
        tunnel: &Tunnel,
        state: TunnelState,
    ) -> Result<TunnelState, TunnelError> {
        self.ensure_open()?;
        let mut registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;

        let name = tunnel.name().to_string();
        let running = registry.running.contains(&name);
        let target = if state == TunnelState::Toggle {
            TunnelState::from_running(!running)
        } else {
            state
        };

        if target == TunnelState::Up {
            registry.running.insert(name.clone());
        } else {
            registry.running.remove(&name);
            registry.stat_polls.remove(&name);
        }

        tracing::info!("Set tunnel '{}' {}", name, target);
        Ok(tunnel.on_state_changed(target))
    }

    async fn rename(
        &self,
        tunnel: &Arc<Tunnel>,
        new_name: &str,
    ) -> Result<Arc<Tunnel>, TunnelError> {
        self.ensure_open()?;
        if !is_name_valid(new_name) {
            return Err(TunnelError::InvalidName {
                name: new_name.to_string(),
            });
        }

        let mut registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;
        if registry.tunnels.contains_key(new_name) {
            return Err(TunnelError::AlreadyExists(new_name.to_string()));
        }

        let old_name = tunnel.name().to_string();
        self.store.rename(&old_name, new_name).await?;

        let config = registry.configs.remove(&old_name);
        let renamed = Tunnel::new(
            self.weak_self.clone(),
            self.runtime.clone(),
            new_name,
            config.clone(),
            tunnel.state(),
        )?;

        registry.tunnels.remove(&old_name);
        registry
            .tunnels
            .insert(new_name.to_string(), Arc::clone(&renamed));
        if let Some(config) = config {
            registry.configs.insert(new_name.to_string(), config);
        }
        if registry.running.remove(&old_name) {
            registry.running.insert(new_name.to_string());
        }
        if let Some(polls) = registry.stat_polls.remove(&old_name) {
            registry.stat_polls.insert(new_name.to_string(), polls);
        }

        tracing::info!("Renamed tunnel '{}' to '{}'", old_name, new_name);
        Ok(renamed)
    }

    async fn delete(&self, tunnel: &Tunnel) -> Result<(), TunnelError> {
        self.ensure_open()?;
        let mut registry = self.registry.lock().await;
        ensure_registered(&registry, tunnel)?;

        let name = tunnel.name().to_string();
        if registry.running.remove(&name) {
            registry.stat_polls.remove(&name);
            tunnel.on_state_changed(TunnelState::Down);
        }

        self.store.delete(&name).await?;
        registry.tunnels.remove(&name);
        registry.configs.remove(&name);

        tracing::info!("Deleted tunnel '{}'", name);
        Ok(())
    }
}
