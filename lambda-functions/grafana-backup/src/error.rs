use std::path::PathBuf;

use thiserror::Error;

use crate::OperationKind;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("required setting {0} is empty")]
    ConfigurationIncomplete(&'static str),

    #[error("could not read API token from parameter {name}")]
    CredentialUnavailable {
        name: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("no backups found under s3://{bucket}/{prefix}")]
    NoBackupsFound { bucket: String, prefix: String },

    #[error("object store request for {key} failed")]
    TransferFailed {
        key: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("bucket {bucket} rejected the upload asserted for owner {account}")]
    OwnershipMismatch { bucket: String, account: String },

    #[error("could not materialize engine settings at {}", path.display())]
    SettingsUnavailable {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("expected exactly one artifact in {}, found {found}", dir.display())]
    AmbiguousEngineOutput { dir: PathBuf, found: usize },

    #[error("{operation} engine failed")]
    EngineFailure {
        operation: OperationKind,
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub(crate) fn transfer<E>(key: impl Into<String>) -> impl FnOnce(E) -> Error
    where
        E: Into<BoxError>,
    {
        let key = key.into();
        move |source| Error::TransferFailed {
            key,
            source: Some(source.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationKind;

    #[test]
    fn test_error_messages() {
        let error = Error::NoBackupsFound {
            bucket: "grafana-backups".to_string(),
            prefix: "grafana".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "no backups found under s3://grafana-backups/grafana"
        );

        let error = Error::OwnershipMismatch {
            bucket: "grafana-backups".to_string(),
            account: "123456789012".to_string(),
        };
        assert!(error.to_string().contains("123456789012"));

        let error = Error::EngineFailure {
            operation: OperationKind::Restore,
            source: "exit status 1".into(),
        };
        assert_eq!(error.to_string(), "restore engine failed");
    }

    #[test]
    fn test_transfer_helper_attaches_source() {
        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disconnected");
        let error = Error::transfer("grafana/archive.tar.gz")(io_error);

        match error {
            Error::TransferFailed { key, source } => {
                assert_eq!(key, "grafana/archive.tar.gz");
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_output_counts() {
        let error = Error::AmbiguousEngineOutput {
            dir: PathBuf::from("/tmp/grafana"),
            found: 0,
        };
        assert_eq!(
            error.to_string(),
            "expected exactly one artifact in /tmp/grafana, found 0"
        );
    }
}
