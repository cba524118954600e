//! Backend selection from URIs and TOML.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cloud::ObjectStoreBackend;
use crate::error::{BackendError, BackendResult};
use crate::local::LocalBackend;
use crate::traits::Backend;

/// Where a registry keeps its data.
///
/// Serialized with a `kind` discriminator:
///
/// ```toml
/// kind = "s3"
/// bucket = "models"
/// prefix = "registry"
/// endpoint = "http://localhost:9000"
/// allow_http = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Local(LocalConfig),
    S3(S3Config),
    Gcs(GcsConfig),
    /// Process-local store; every `open_backend` call yields a fresh one.
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
}

/// S3 or any S3-compatible service (MinIO, Ceph, R2).
///
/// Unset credentials and region fall back to the standard `AWS_*`
/// environment variables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint; switches to path-style requests.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

/// Google Cloud Storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub service_account_path: Option<PathBuf>,
    /// Inline service-account JSON.
    #[serde(default)]
    pub service_account_key: Option<String>,
}

impl BackendConfig {
    /// Parse a backend URI.
    ///
    /// Accepted forms: a plain path or `file://path`, `s3://bucket/prefix`,
    /// `gs://bucket/prefix` (or `gcs://`), and `memory://`.
    pub fn from_uri(uri: &str) -> BackendResult<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(BackendError::Config("empty backend URI".into()));
        }
        if uri.starts_with("memory://") {
            return Ok(Self::Memory);
        }
        if let Some(root) = uri.strip_prefix("file://") {
            return Ok(Self::local(root));
        }
        if uri.starts_with("s3://") {
            let (bucket, prefix) = parse_remote_url(uri, &["s3://"])?;
            return Ok(Self::S3(S3Config {
                bucket,
                prefix,
                ..S3Config::default()
            }));
        }
        if uri.starts_with("gs://") || uri.starts_with("gcs://") {
            let (bucket, prefix) = parse_remote_url(uri, &["gs://", "gcs://"])?;
            return Ok(Self::Gcs(GcsConfig {
                bucket,
                prefix,
                ..GcsConfig::default()
            }));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            return Err(BackendError::Config(format!(
                "unsupported backend scheme '{scheme}://'"
            )));
        }
        Ok(Self::local(uri))
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::Local(LocalConfig { root: root.into() })
    }

    pub fn from_toml_str(s: &str) -> BackendResult<Self> {
        toml::from_str(s).map_err(|e| BackendError::Config(format!("invalid backend config: {e}")))
    }

    pub fn from_file(path: &Path) -> BackendResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(c) => write!(f, "file://{}", c.root.display()),
            Self::S3(c) => write!(f, "s3://{}/{}", c.bucket, c.prefix),
            Self::Gcs(c) => write!(f, "gs://{}/{}", c.bucket, c.prefix),
            Self::Memory => f.write_str("memory://"),
        }
    }
}

/// Open the backend described by `config`.
pub fn open_backend(config: &BackendConfig) -> BackendResult<Arc<dyn Backend>> {
    tracing::debug!(backend = %config, "opening backend");
    let backend: Arc<dyn Backend> = match config {
        BackendConfig::Local(c) => Arc::new(LocalBackend::open(&c.root)?),
        BackendConfig::S3(c) => Arc::new(ObjectStoreBackend::s3(c)?),
        BackendConfig::Gcs(c) => Arc::new(ObjectStoreBackend::gcs(c)?),
        BackendConfig::Memory => Arc::new(ObjectStoreBackend::in_memory()?),
    };
    Ok(backend)
}

/// Split `scheme://bucket/prefix` into `(bucket, prefix)`.
fn parse_remote_url(url: &str, schemes: &[&str]) -> BackendResult<(String, String)> {
    let trimmed = url.trim();
    for scheme in schemes {
        if let Some(rest) = trimmed.strip_prefix(scheme) {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((b, p)) => (b.to_string(), p.trim_matches('/').to_string()),
                None => (rest.to_string(), String::new()),
            };
            if bucket.is_empty() {
                return Err(BackendError::Config(format!("missing bucket in '{url}'")));
            }
            return Ok((bucket, prefix));
        }
    }
    Err(BackendError::Config(format!(
        "expected URL with schemes {schemes:?}, got: {url}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::ObjectName;

    #[test]
    fn uri_local_forms() {
        assert_eq!(
            BackendConfig::from_uri("/var/lib/tessera").unwrap(),
            BackendConfig::local("/var/lib/tessera")
        );
        assert_eq!(
            BackendConfig::from_uri("file:///tmp/reg").unwrap(),
            BackendConfig::local("/tmp/reg")
        );
        assert_eq!(
            BackendConfig::from_uri("./relative").unwrap(),
            BackendConfig::local("./relative")
        );
    }

    #[test]
    fn uri_s3() {
        let BackendConfig::S3(c) = BackendConfig::from_uri("s3://my-bucket/some/prefix/").unwrap() else {
            panic!("expected s3");
        };
        assert_eq!(c.bucket, "my-bucket");
        assert_eq!(c.prefix, "some/prefix");
        assert!(!c.allow_http);

        let BackendConfig::S3(c) = BackendConfig::from_uri("s3://only-bucket").unwrap() else {
            panic!("expected s3");
        };
        assert_eq!(c.prefix, "");
    }

    #[test]
    fn uri_gcs_aliases() {
        for uri in ["gs://b/p", "gcs://b/p"] {
            let BackendConfig::Gcs(c) = BackendConfig::from_uri(uri).unwrap() else {
                panic!("expected gcs for {uri}");
            };
            assert_eq!((c.bucket.as_str(), c.prefix.as_str()), ("b", "p"));
        }
    }

    #[test]
    fn uri_rejections() {
        assert!(BackendConfig::from_uri("").is_err());
        assert!(BackendConfig::from_uri("s3:///prefix").is_err());
        let err = BackendConfig::from_uri("http://bucket/key").unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn toml_configs() {
        let cfg = BackendConfig::from_toml_str(
            r#"
            kind = "s3"
            bucket = "models"
            prefix = "registry"
            endpoint = "http://localhost:9000"
            allow_http = true
            "#,
        )
        .unwrap();
        let BackendConfig::S3(s3) = &cfg else {
            panic!("expected s3");
        };
        assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(s3.allow_http);
        assert_eq!(cfg.to_string(), "s3://models/registry");

        let cfg = BackendConfig::from_toml_str("kind = \"local\"\nroot = \"/data\"").unwrap();
        assert_eq!(cfg, BackendConfig::local("/data"));

        let cfg = BackendConfig::from_toml_str("kind = \"memory\"").unwrap();
        assert_eq!(cfg, BackendConfig::Memory);

        assert!(BackendConfig::from_toml_str("kind = \"ftp\"").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.toml");
        std::fs::write(&path, "kind = \"gcs\"\nbucket = \"b\"\nservice_account_path = \"/k.json\"").unwrap();
        let BackendConfig::Gcs(c) = BackendConfig::from_file(&path).unwrap() else {
            panic!("expected gcs");
        };
        assert_eq!(c.service_account_path, Some(PathBuf::from("/k.json")));
    }

    #[test]
    fn open_local_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let local = open_backend(&BackendConfig::local(dir.path())).unwrap();
        local.health_check().unwrap();
        assert!(local.describe().starts_with("file://"));

        let memory = open_backend(&BackendConfig::Memory).unwrap();
        memory.health_check().unwrap();
        let name = ObjectName::new("demo").unwrap();
        assert!(memory.list_versions(&name).unwrap().is_empty());
    }
}
