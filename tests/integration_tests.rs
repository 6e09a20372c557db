use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use wg_manager::errors::TunnelError;
use wg_manager::manager::memory::MemoryManager;
use wg_manager::tunnel::config::{InterfaceConfig, PeerConfig, TunnelConfig};
use wg_manager::tunnel::{Tunnel, TunnelField, TunnelState};

fn create_temp_store_dir() -> PathBuf {
    std::env::temp_dir().join(format!("wg_manager_test_{}", uuid::Uuid::new_v4()))
}

fn sample_config() -> TunnelConfig {
    TunnelConfig {
        interface: InterfaceConfig {
            private_key: "cHJpdmF0ZS1rZXktYnl0ZXMtZ28taGVyZS4uLi4uLi4=".to_string(),
            addresses: vec!["10.0.0.2/32".to_string()],
            listen_port: None,
            dns_servers: vec!["10.0.0.1".to_string()],
            mtu: None,
        },
        peers: vec![PeerConfig {
            public_key: "cGVlci1wdWJsaWMta2V5LWJ5dGVzLi4uLi4uLi4uLg==".to_string(),
            allowed_ips: vec!["0.0.0.0/0".to_string()],
            endpoint: Some("vpn.example.com:51820".to_string()),
            persistent_keepalive: Some(25),
        }],
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

async fn create_manager(store_dir: &PathBuf) -> Arc<MemoryManager> {
    init_tracing();
    MemoryManager::new(tokio::runtime::Handle::current(), store_dir.clone())
        .await
        .unwrap()
}

/// Records which field signals arrived, in order.
fn record_signals(tunnel: &Arc<Tunnel>) -> Arc<Mutex<Vec<TunnelField>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for field in TunnelField::all() {
        let log = Arc::clone(&log);
        tunnel.subscribe(field, move || {
            log.lock().unwrap().push(field);
        });
    }
    log
}

#[tokio::test]
async fn happy_state_transition() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();
    assert_eq!(tunnel.state(), TunnelState::Down);

    let signals = record_signals(&tunnel);
    let state = tunnel.set_state(TunnelState::Up).await.unwrap();

    assert_eq!(state, TunnelState::Up);
    assert_eq!(tunnel.state(), TunnelState::Up);
    assert_eq!(*signals.lock().unwrap(), vec![TunnelField::State]);
    assert!(tunnel.statistics().is_none());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn teardown_clears_statistics_before_the_state_signal() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();

    tunnel.set_state(TunnelState::Up).await.unwrap();
    let stats = tunnel.statistics_async().await.unwrap();
    assert!(stats.total_rx() > 0);

    let signals = record_signals(&tunnel);
    let state = manager.apply_external_state("wg0", false).await.unwrap();

    assert_eq!(state, TunnelState::Down);
    assert_eq!(tunnel.state(), TunnelState::Down);
    assert_eq!(
        *signals.lock().unwrap(),
        vec![TunnelField::Statistics, TunnelField::State]
    );

    let refetch = tunnel.statistics_async().await;
    assert!(matches!(refetch, Err(TunnelError::Backend(_))));
    assert!(tunnel.statistics().is_none());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn lazy_config_fetch_after_restore() {
    let store_dir = create_temp_store_dir();
    {
        let manager = create_manager(&store_dir).await;
        manager.create("wg0", sample_config()).await.unwrap();
    }

    let manager = create_manager(&store_dir).await;
    let tunnel = manager.get("wg0").await.unwrap();
    let mut signals = tunnel.changes(TunnelField::Config);

    // Cache miss: returns absent immediately and schedules the fetch.
    assert!(tunnel.config().is_none());

    signals.recv().await.unwrap();
    assert_eq!(*tunnel.config().unwrap(), sample_config());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn setter_short_circuits_on_equal_config() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();

    let signals = record_signals(&tunnel);
    let result = tunnel.set_config(sample_config()).await.unwrap();

    assert_eq!(*result, sample_config());
    assert!(signals.lock().unwrap().is_empty());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn toggle_resolves_through_the_manager() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();

    assert_eq!(
        tunnel.set_state(TunnelState::Toggle).await.unwrap(),
        TunnelState::Up
    );
    assert_eq!(
        tunnel.set_state(TunnelState::Toggle).await.unwrap(),
        TunnelState::Down
    );
    assert_eq!(tunnel.state(), TunnelState::Down);

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn rename_to_current_name_is_a_no_op() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();

    let renamed = tunnel.rename("wg0").await.unwrap();
    assert!(Arc::ptr_eq(&tunnel, &renamed));
    assert!(manager.get("wg0").await.is_some());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn rename_rekeys_registry_and_store() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();
    tunnel.set_state(TunnelState::Up).await.unwrap();

    let renamed = tunnel.rename("office").await.unwrap();

    assert_eq!(renamed.name(), "office");
    assert_eq!(renamed.state(), TunnelState::Up);
    assert_eq!(*renamed.config_async().await.unwrap(), sample_config());
    assert!(manager.get("wg0").await.is_none());
    assert!(manager.get("office").await.is_some());

    // The old handle is no longer tracked.
    let stale = tunnel.set_state(TunnelState::Down).await;
    assert!(matches!(stale, Err(TunnelError::NotFound(name)) if name == "wg0"));

    // The stored document moved with the tunnel.
    let restored = create_manager(&store_dir).await;
    assert!(restored.get("office").await.is_some());
    assert!(restored.get("wg0").await.is_none());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn rename_rejects_invalid_and_duplicate_names() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();
    manager.create("office", sample_config()).await.unwrap();

    let result = tunnel.rename("bad name").await;
    assert!(matches!(result, Err(TunnelError::InvalidName { .. })));

    let result = tunnel.rename("office").await;
    assert!(matches!(result, Err(TunnelError::AlreadyExists(_))));

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn delete_tears_down_and_unregisters() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();
    tunnel.set_state(TunnelState::Up).await.unwrap();
    tunnel.statistics_async().await.unwrap();

    let signals = record_signals(&tunnel);
    tunnel.delete().await.unwrap();

    assert_eq!(
        *signals.lock().unwrap(),
        vec![TunnelField::Statistics, TunnelField::State]
    );
    assert_eq!(tunnel.state(), TunnelState::Down);
    assert!(manager.get("wg0").await.is_none());

    let stale = tunnel.set_state(TunnelState::Up).await;
    assert!(matches!(stale, Err(TunnelError::NotFound(_))));

    let restored = create_manager(&store_dir).await;
    assert!(restored.list().await.is_empty());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn restore_lists_stored_tunnels_as_down() {
    let store_dir = create_temp_store_dir();
    {
        let manager = create_manager(&store_dir).await;
        manager.create("wg0", sample_config()).await.unwrap();
        manager.create("office", sample_config()).await.unwrap();
    }

    let manager = create_manager(&store_dir).await;
    let tunnels = manager.list().await;
    let names: Vec<&str> = tunnels.iter().map(|t| t.name()).collect();

    assert_eq!(names, vec!["office", "wg0"]);
    assert!(tunnels.iter().all(|t| t.state() == TunnelState::Down));

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn external_kernel_up_makes_statistics_available() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();

    manager.apply_external_state("wg0", true).await.unwrap();
    assert_eq!(tunnel.state(), TunnelState::Up);

    let stats = tunnel.statistics_async().await.unwrap();
    assert!(stats.peer(&sample_config().peers[0].public_key).is_some());

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}

#[tokio::test]
async fn shutdown_stops_tunnels_and_cancels_operations() {
    let store_dir = create_temp_store_dir();
    let manager = create_manager(&store_dir).await;
    let tunnel = manager.create("wg0", sample_config()).await.unwrap();
    tunnel.set_state(TunnelState::Up).await.unwrap();

    manager.shutdown().await;

    assert_eq!(tunnel.state(), TunnelState::Down);

    let result = tunnel.set_state(TunnelState::Up).await;
    assert!(matches!(result, Err(TunnelError::Cancelled)));

    let result = manager.create("wg1", sample_config()).await;
    assert!(matches!(result, Err(TunnelError::Cancelled)));

    tokio::fs::remove_dir_all(&store_dir).await.ok();
}
