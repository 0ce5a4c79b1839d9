use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

/// Scratch space root on Lambda ephemeral storage.
pub const SCRATCH_ROOT: &str = "/tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Accepts exactly INFO, WARNING or ERROR. Anything else is ignored by
    /// the caller, which keeps its previous level.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .as_deref()
            .and_then(Self::parse)
            .unwrap_or_default()
    }

    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParameters {
    pub grafana_url: String,
    pub bucket_name: String,
    pub bucket_prefix: String,
    pub backup_dir: PathBuf,
    pub secret_name: String,
    pub log_level: LogLevel,
}

impl RuntimeParameters {
    pub fn from_env() -> Self {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Maps the named external inputs into a typed record. Missing values
    /// resolve to empty strings and surface later as remote-call failures;
    /// this layer does no validation.
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("LOG_LEVEL")
            .as_deref()
            .and_then(LogLevel::parse)
            .unwrap_or_default();
        let grafana_url = lookup("GRAFANA_URL").unwrap_or_default();
        let bucket_name = lookup("BUCKET_NAME").unwrap_or_default();
        let bucket_prefix = lookup("BUCKET_PREFIX").unwrap_or_default();
        let secret_name = lookup("API_TOKEN_PARAMETER").unwrap_or_default();
        // The scratch directory is always derived from the prefix, never
        // supplied directly.
        let backup_dir = Path::new(SCRATCH_ROOT).join(&bucket_prefix);

        info!("Using Grafana: {}", grafana_url);
        info!("Using Bucket: {}", bucket_name);
        info!("Using Bucket Prefix: {}", bucket_prefix);
        info!("Using Backup dir: {}", backup_dir.display());
        info!("Using SSM Secure parameter: {}", secret_name);

        Self {
            grafana_url,
            bucket_name,
            bucket_prefix,
            backup_dir,
            secret_name,
            log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(map: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |name| map.get(name).map(|value| value.to_string())
    }

    #[test]
    fn test_resolve_full_environment() {
        let parameters = RuntimeParameters::resolve(lookup(HashMap::from([
            ("GRAFANA_URL", "https://grafana.example.com"),
            ("BUCKET_NAME", "grafana-backups"),
            ("BUCKET_PREFIX", "grafana"),
            ("API_TOKEN_PARAMETER", "/grafana/api-token"),
            ("LOG_LEVEL", "WARNING"),
        ])));

        assert_eq!(parameters.grafana_url, "https://grafana.example.com");
        assert_eq!(parameters.bucket_name, "grafana-backups");
        assert_eq!(parameters.bucket_prefix, "grafana");
        assert_eq!(parameters.secret_name, "/grafana/api-token");
        assert_eq!(parameters.log_level, LogLevel::Warning);
    }

    #[test]
    fn test_backup_dir_is_derived_from_prefix() {
        let parameters = RuntimeParameters::resolve(lookup(HashMap::from([(
            "BUCKET_PREFIX",
            "grafana",
        )])));
        assert_eq!(parameters.backup_dir, PathBuf::from("/tmp/grafana"));

        // Deterministic: the same prefix always produces the same directory.
        let again = RuntimeParameters::resolve(lookup(HashMap::from([(
            "BUCKET_PREFIX",
            "grafana",
        )])));
        assert_eq!(parameters.backup_dir, again.backup_dir);
    }

    #[test]
    fn test_missing_values_are_not_rejected() {
        let parameters = RuntimeParameters::resolve(|_| None);

        assert_eq!(parameters.grafana_url, "");
        assert_eq!(parameters.bucket_name, "");
        assert_eq!(parameters.bucket_prefix, "");
        assert_eq!(parameters.secret_name, "");
        assert_eq!(parameters.backup_dir, PathBuf::from("/tmp"));
        assert_eq!(parameters.log_level, LogLevel::Info);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("DEBUG"), None);
        assert_eq!(LogLevel::parse("info"), None);
        assert_eq!(LogLevel::parse(""), None);
    }

    #[test]
    fn test_unknown_log_level_keeps_default() {
        let parameters = RuntimeParameters::resolve(lookup(HashMap::from([(
            "LOG_LEVEL",
            "VERBOSE",
        )])));
        assert_eq!(parameters.log_level, LogLevel::Info);
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::Info.as_directive(), "info");
        assert_eq!(LogLevel::Warning.as_directive(), "warn");
        assert_eq!(LogLevel::Error.as_directive(), "error");
    }
}
