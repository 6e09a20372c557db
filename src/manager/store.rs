use crate::tunnel::{TunnelConfig, is_name_valid};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::fs;

/// On-disk configuration store: one YAML document per tunnel, named
/// `<tunnel-name>.yaml`. Tunnel names pass [`is_name_valid`] before they get
/// near the filesystem, so they are safe as file stems.
pub struct ConfigStore {
    directory: PathBuf,
}

impl ConfigStore {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn config_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.yaml"))
    }

    pub async fn load(&self, name: &str) -> anyhow::Result<TunnelConfig> {
        let path = self.config_path(name);
        let contents = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        match serde_yaml::from_str::<TunnelConfig>(&contents) {
            Ok(config) => {
                config
                    .validate()
                    .with_context(|| format!("Config validation failed for {}", path.display()))?;
                Ok(config)
            }
            Err(parse_error) => {
                let backup_path = path.with_extension("yaml.bak");
                if let Err(e) = fs::copy(&path, &backup_path).await {
                    tracing::warn!("Failed to back up corrupted config: {}", e);
                } else {
                    tracing::info!(
                        "Backed up corrupted config to {}",
                        backup_path.display()
                    );
                }
                Err(parse_error)
                    .with_context(|| format!("Corrupted YAML config at {}", path.display()))
            }
        }
    }

    /// Names of every stored tunnel, without parsing the documents (configs
    /// are fetched lazily). Files whose stem is not a valid tunnel name are
    /// logged and skipped so one stray file cannot block startup.
    pub async fn list_names(&self) -> anyhow::Result<Vec<String>> {
        match fs::metadata(&self.directory).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read store directory {}", self.directory.display())
                });
            }
        }

        let mut read_dir = fs::read_dir(&self.directory).await.with_context(|| {
            format!("Failed to read store directory {}", self.directory.display())
        })?;

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_name_valid(name) {
                tracing::warn!(
                    "Skipping stored config {}: stem is not a valid tunnel name",
                    path.display()
                );
                continue;
            }
            names.push(name.to_string());
        }

        Ok(names)
    }

    // Atomic write with temp file
    pub async fn save(&self, name: &str, config: &TunnelConfig) -> anyhow::Result<()> {
        let yaml_content =
            serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

        fs::create_dir_all(&self.directory).await.with_context(|| {
            format!("Failed to create store directory {}", self.directory.display())
        })?;

        let path = self.config_path(name);
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, yaml_content.as_bytes())
            .await
            .with_context(|| format!("Failed to write temporary config to {}", tmp_path.display()))?;

        #[cfg(unix)]
        {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(&tmp_path)
                .await
                .context("Failed to open temp file for fsync")?;
            file.sync_all().await.context("Failed to fsync temp file")?;
        }

        fs::rename(&tmp_path, &path).await.with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> anyhow::Result<()> {
        let old_path = self.config_path(old_name);
        let new_path = self.config_path(new_name);
        fs::rename(&old_path, &new_path).await.with_context(|| {
            format!(
                "Failed to rename {} to {}",
                old_path.display(),
                new_path.display()
            )
        })
    }

    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let path = self.config_path(name);
        fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete config at {}", path.display()))
    }
}
