use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BoxError, Error};
use crate::params::RuntimeParameters;
use crate::ApiToken;

/// Where the engine expects its settings file.
pub const SETTINGS_FILE: &str = "/tmp/grafanaSettings.json";

const SEARCH_API_LIMIT: u32 = 5000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub general: GeneralSettings,
    pub grafana: GrafanaSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneralSettings {
    pub debug: bool,
    pub verify_ssl: bool,
    pub api_health_check: bool,
    pub backup_dir: String,
    pub pretty_print: bool,
}

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct GrafanaSettings {
    pub url: String,
    pub token: String,
    pub search_api_limit: u32,
    pub default_password: String,
    pub admin_account: String,
    pub admin_password: String,
}

impl fmt::Debug for GrafanaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrafanaSettings")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("search_api_limit", &self.search_api_limit)
            .finish_non_exhaustive()
    }
}

impl EngineSettings {
    /// The general section carries fixed hardening defaults that callers
    /// cannot override.
    pub fn new(parameters: &RuntimeParameters, token: &ApiToken) -> Self {
        Self {
            general: GeneralSettings {
                debug: false,
                verify_ssl: true,
                api_health_check: false,
                backup_dir: parameters.backup_dir.display().to_string(),
                pretty_print: false,
            },
            grafana: GrafanaSettings {
                url: parameters.grafana_url.clone(),
                token: token.expose().to_string(),
                search_api_limit: SEARCH_API_LIMIT,
                default_password: String::new(),
                admin_account: String::new(),
                admin_password: String::new(),
            },
        }
    }

    pub fn render(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), Error> {
        let rendered = self.render().map_err(unavailable(path))?;
        tokio::fs::write(path, rendered)
            .await
            .map_err(unavailable(path))
    }

    pub async fn load(path: &Path) -> Result<Self, Error> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(unavailable(path))?;
        serde_json::from_str(&raw).map_err(unavailable(path))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedSettings {
    pub path: PathBuf,
    pub settings: EngineSettings,
}

/// Writes the settings file, then loads it back through the same entry
/// point the engine uses. The file stays behind; scratch-dir lifecycle is
/// not this component's concern.
pub async fn materialize(
    parameters: &RuntimeParameters,
    token: &ApiToken,
    path: PathBuf,
) -> Result<MaterializedSettings, Error> {
    info!("Configuring Grafana engine settings");
    EngineSettings::new(parameters, token)
        .write_to(&path)
        .await?;
    let settings = EngineSettings::load(&path).await?;
    Ok(MaterializedSettings { path, settings })
}

fn unavailable<E>(path: &Path) -> impl FnOnce(E) -> Error + '_
where
    E: Into<BoxError>,
{
    move |source| Error::SettingsUnavailable {
        path: path.to_path_buf(),
        source: source.into(),
    }
}
