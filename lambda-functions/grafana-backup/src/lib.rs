use std::fmt;
use std::path::PathBuf;

use aws_config::BehaviorVersion;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_ssm::Client as SsmClient;
use aws_sdk_sts::Client as StsClient;
use bon::Builder;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

pub mod engine;
pub mod error;
pub mod params;
pub mod settings;

pub use engine::{BackupEngine, CommandEngine};
pub use error::Error;
pub use params::{LogLevel, RuntimeParameters};
pub use settings::{EngineSettings, MaterializedSettings};

/// All component kinds the engine knows about.
pub const DEFAULT_COMPONENTS: &str = "folders,dashboards,datasources,alert-channels";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Backup,
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backup => write!(f, "backup"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

#[derive(Builder, Deserialize, Debug, Clone)]
#[builder(on(String, into))]
pub struct Request {
    #[builder(default = OperationKind::default())]
    #[serde(default)]
    pub operation: OperationKind,
    pub components: Option<String>,
    pub backup_file: Option<String>,
}

impl Request {
    // An empty string behaves like a missing value in the invocation
    // contract.
    pub fn components(&self) -> &str {
        self.components
            .as_deref()
            .filter(|components| !components.is_empty())
            .unwrap_or(DEFAULT_COMPONENTS)
    }

    pub fn backup_file(&self) -> Option<&str> {
        self.backup_file
            .as_deref()
            .filter(|backup_file| !backup_file.is_empty())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: ResponseBody,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResponseBody {
    pub message: String,
}

impl Response {
    pub fn success(operation: OperationKind) -> Self {
        Self {
            status_code: 200,
            body: ResponseBody {
                message: format!("{operation} finished successfully"),
            },
        }
    }
}

/// Bearer token for the Grafana API. Never logged; the Debug impl redacts
/// the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

/// One archive, addressed both locally and in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    pub name: String,
    pub local_path: PathBuf,
    pub remote_key: String,
}

impl ArtifactReference {
    pub fn new(parameters: &RuntimeParameters, name: &str) -> Self {
        Self {
            name: name.to_string(),
            local_path: parameters.backup_dir.join(name),
            remote_key: format!("{}/{}", parameters.bucket_prefix, name),
        }
    }
}

/// Picks the base name of the most recently modified object. Ties break
/// arbitrarily.
pub fn select_latest<I>(objects: I) -> Option<String>
where
    I: IntoIterator<Item = (String, DateTime)>,
{
    objects
        .into_iter()
        .max_by_key(|(_, modified)| (modified.secs(), modified.subsec_nanos()))
        .map(|(key, _)| {
            key.rsplit('/')
                .next()
                .unwrap_or(key.as_str())
                .to_string()
        })
}

/// The engine's postcondition is exactly one archive in the scratch
/// directory; anything else is a named failure rather than a guess.
pub async fn locate_produced_artifact(
    parameters: &RuntimeParameters,
) -> Result<ArtifactReference, Error> {
    let mut entries = tokio::fs::read_dir(&parameters.backup_dir)
        .await
        .map_err(engine_postcondition)?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(engine_postcondition)? {
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    match names.as_slice() {
        [name] => Ok(ArtifactReference::new(parameters, name)),
        _ => Err(Error::AmbiguousEngineOutput {
            dir: parameters.backup_dir.clone(),
            found: names.len(),
        }),
    }
}

fn engine_postcondition(source: std::io::Error) -> Error {
    Error::EngineFailure {
        operation: OperationKind::Backup,
        source: source.into(),
    }
}

fn token_from_parameter(name: &str, value: Option<String>) -> Result<ApiToken, Error> {
    value
        .filter(|value| !value.is_empty())
        .map(ApiToken::new)
        .ok_or_else(|| Error::CredentialUnavailable {
            name: name.to_string(),
            source: None,
        })
}

pub struct GrafanaBackupService {
    s3_client: S3Client,
    ssm_client: SsmClient,
    sts_client: StsClient,
    parameters: RuntimeParameters,
}

impl GrafanaBackupService {
    pub async fn new(parameters: RuntimeParameters) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Self {
            s3_client: S3Client::new(&config),
            ssm_client: SsmClient::new(&config),
            sts_client: StsClient::new(&config),
            parameters,
        }
    }

    pub fn parameters(&self) -> &RuntimeParameters {
        &self.parameters
    }

    /// Runs one invocation: credential, settings, then the requested
    /// operation. Nothing is cached across invocations and no failure is
    /// caught here; a re-invocation is the recovery mechanism.
    pub async fn run(
        &self,
        request: Request,
        engine: &impl BackupEngine,
    ) -> Result<Response, Error> {
        let operation = request.operation;
        info!("Starting {} of {}", operation, self.parameters.grafana_url);

        let token = self.fetch_token().await?;
        let settings = settings::materialize(
            &self.parameters,
            &token,
            PathBuf::from(settings::SETTINGS_FILE),
        )
        .await?;
        let components = request.components();

        match operation {
            OperationKind::Backup => {
                engine
                    .save(components, &settings)
                    .await
                    .map_err(|source| Error::EngineFailure {
                        operation,
                        source: source.into(),
                    })?;
                let artifact = locate_produced_artifact(&self.parameters).await?;
                self.upload_backup(&artifact).await?;
            }
            OperationKind::Restore => {
                let backup_file = match request.backup_file() {
                    Some(name) => name.to_string(),
                    None => self.latest_backup().await?,
                };
                let artifact = self.download_backup(&backup_file).await?;
                engine
                    .restore(&artifact.local_path, components, &settings)
                    .await
                    .map_err(|source| Error::EngineFailure {
                        operation,
                        source: source.into(),
                    })?;
            }
        }

        Ok(Response::success(operation))
    }

    async fn fetch_token(&self) -> Result<ApiToken, Error> {
        let name = &self.parameters.secret_name;
        if name.is_empty() {
            return Err(Error::ConfigurationIncomplete("API_TOKEN_PARAMETER"));
        }

        info!("Getting Grafana token from parameter: {}", name);
        let response = self
            .ssm_client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|source| Error::CredentialUnavailable {
                name: name.clone(),
                source: Some(source.into()),
            })?;

        token_from_parameter(name, response.parameter.and_then(|parameter| parameter.value))
    }

    async fn latest_backup(&self) -> Result<String, Error> {
        info!("Retrieving latest available backup");

        let mut objects = Vec::new();
        let mut pages = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.parameters.bucket_name)
            .prefix(&self.parameters.bucket_prefix)
            .into_paginator()
            .send();

        // The latest object is compared across all pages, not just the
        // first one.
        while let Some(page) = pages.next().await {
            let page = page.map_err(Error::transfer(self.parameters.bucket_prefix.as_str()))?;
            for object in page.contents() {
                if let (Some(key), Some(modified)) = (object.key(), object.last_modified()) {
                    objects.push((key.to_string(), modified.clone()));
                }
            }
        }

        let latest = select_latest(objects).ok_or_else(|| Error::NoBackupsFound {
            bucket: self.parameters.bucket_name.clone(),
            prefix: self.parameters.bucket_prefix.clone(),
        })?;

        info!("Latest available backup: {}", latest);
        Ok(latest)
    }

    async fn download_backup(&self, backup_file: &str) -> Result<ArtifactReference, Error> {
        info!("Downloading backup file: {}", backup_file);
        let artifact = ArtifactReference::new(&self.parameters, backup_file);
        let key = artifact.remote_key.as_str();

        tokio::fs::create_dir_all(&self.parameters.backup_dir)
            .await
            .map_err(Error::transfer(key))?;

        let response = self
            .s3_client
            .get_object()
            .bucket(&self.parameters.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(Error::transfer(key))?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(&artifact.local_path)
            .await
            .map_err(Error::transfer(key))?;
        while let Some(chunk) = body.try_next().await.map_err(Error::transfer(key))? {
            file.write_all(&chunk).await.map_err(Error::transfer(key))?;
        }
        file.flush().await.map_err(Error::transfer(key))?;

        Ok(artifact)
    }

    async fn upload_backup(&self, artifact: &ArtifactReference) -> Result<(), Error> {
        let account_id = self.caller_account().await?;
        info!("Uploading backup file: {}", artifact.name);

        let key = artifact.remote_key.as_str();
        let body = ByteStream::from_path(&artifact.local_path)
            .await
            .map_err(Error::transfer(key))?;

        // The owner assertion makes the upload fail closed if the bucket
        // does not belong to this account.
        let result = self
            .s3_client
            .put_object()
            .bucket(&self.parameters.bucket_name)
            .key(key)
            .expected_bucket_owner(&account_id)
            .body(body)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(source)
                if source.as_service_error().and_then(|error| error.code())
                    == Some("AccessDenied") =>
            {
                Err(Error::OwnershipMismatch {
                    bucket: self.parameters.bucket_name.clone(),
                    account: account_id,
                })
            }
            Err(source) => Err(Error::transfer(key)(source)),
        }
    }

    async fn caller_account(&self) -> Result<String, Error> {
        let identity = self
            .sts_client
            .get_caller_identity()
            .send()
            .await
            .map_err(Error::transfer("sts:GetCallerIdentity"))?;

        identity
            .account()
            .map(str::to_string)
            .ok_or_else(|| Error::TransferFailed {
                key: "sts:GetCallerIdentity".to_string(),
                source: None,
            })
    }
}
