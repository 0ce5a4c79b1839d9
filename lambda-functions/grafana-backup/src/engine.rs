use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tokio::process::Command;
use tracing::info;

use crate::settings::MaterializedSettings;

pub const DEFAULT_ENGINE_BIN: &str = "grafana-backup";

/// Interface boundary to the external backup/restore engine. The engine
/// reads and writes archives in the scratch directory named by its
/// settings file; failures are opaque to the orchestrator.
#[allow(async_fn_in_trait)]
pub trait BackupEngine {
    async fn save(&self, components: &str, settings: &MaterializedSettings)
        -> anyhow::Result<()>;

    async fn restore(
        &self,
        archive: &Path,
        components: &str,
        settings: &MaterializedSettings,
    ) -> anyhow::Result<()>;
}

/// Adapter that drives the `grafana-backup` CLI as the engine.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    binary: PathBuf,
}

impl CommandEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_env() -> Self {
        let binary = std::env::var("GRAFANA_BACKUP_BIN")
            .unwrap_or_else(|_| DEFAULT_ENGINE_BIN.to_string());
        Self::new(binary)
    }

    async fn run(&self, mut command: Command) -> anyhow::Result<()> {
        let output = command
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

impl BackupEngine for CommandEngine {
    async fn save(
        &self,
        components: &str,
        settings: &MaterializedSettings,
    ) -> anyhow::Result<()> {
        info!("Running engine save for components: {}", components);
        let mut command = Command::new(&self.binary);
        command
            .arg("save")
            .arg("--components")
            .arg(components)
            .arg("--config")
            .arg(&settings.path);
        self.run(command).await
    }

    async fn restore(
        &self,
        archive: &Path,
        components: &str,
        settings: &MaterializedSettings,
    ) -> anyhow::Result<()> {
        info!("Running engine restore of {}", archive.display());
        let mut command = Command::new(&self.binary);
        command
            .arg("restore")
            .arg(archive)
            .arg("--components")
            .arg(components)
            .arg("--config")
            .arg(&settings.path);
        self.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{LogLevel, RuntimeParameters};
    use crate::settings::EngineSettings;
    use crate::ApiToken;

    fn settings() -> MaterializedSettings {
        let parameters = RuntimeParameters {
            grafana_url: "https://grafana.example.com".to_string(),
            bucket_name: "grafana-backups".to_string(),
            bucket_prefix: "grafana".to_string(),
            backup_dir: PathBuf::from("/tmp/grafana"),
            secret_name: "/grafana/api-token".to_string(),
            log_level: LogLevel::Info,
        };
        MaterializedSettings {
            path: PathBuf::from("/tmp/grafanaSettings.json"),
            settings: EngineSettings::new(&parameters, &ApiToken::new("token-123")),
        }
    }

    #[tokio::test]
    async fn test_successful_engine_run() {
        // `true` ignores its arguments and exits zero.
        let engine = CommandEngine::new("true");
        assert!(engine.save("folders", &settings()).await.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let engine = CommandEngine::new("false");
        let result = engine
            .restore(Path::new("/tmp/archive.tar.gz"), "folders", &settings())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_binary_reports_spawn_failure() {
        let engine = CommandEngine::new("/nonexistent/grafana-backup");
        let result =
            tokio_test::block_on(engine.save("folders,dashboards", &settings()));

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("failed to spawn"));
    }

    #[test]
    fn test_default_binary_name() {
        assert_eq!(DEFAULT_ENGINE_BIN, "grafana-backup");
    }
}
