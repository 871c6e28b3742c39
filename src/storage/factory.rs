//! Factory for creating storage backends based on configuration

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::local::LocalStorageBackend;
use super::{StorageBackend, StorageConfig, StorageError};
use crate::config::{BackendDescriptor, BackendName, Config};

#[cfg(feature = "s3")]
use super::S3StorageConfig;
#[cfg(feature = "s3")]
use crate::services::s3_service::S3Service;

impl StorageConfig {
    /// Validate a backend descriptor and turn it into a buildable configuration.
    pub fn from_descriptor(name: BackendName, descriptor: &BackendDescriptor) -> Result<Self, StorageError> {
        let misconfigured = |reason: &str| StorageError::Configuration {
            backend: name.to_string(),
            reason: reason.to_string(),
        };

        match descriptor.driver.as_str() {
            "local" => {
                let root = descriptor
                    .root
                    .clone()
                    .ok_or_else(|| misconfigured("local driver requires a root directory"))?;
                Ok(StorageConfig::Local {
                    root,
                    public_url: descriptor.public_url.clone(),
                })
            }
            "s3" => {
                #[cfg(feature = "s3")]
                {
                    let bucket_name = descriptor
                        .bucket
                        .clone()
                        .ok_or_else(|| misconfigured("bucket is required"))?;
                    let access_key_id = descriptor
                        .access_key_id
                        .clone()
                        .ok_or_else(|| misconfigured("access key id is required"))?;
                    let secret_access_key = descriptor
                        .secret_access_key
                        .clone()
                        .ok_or_else(|| misconfigured("secret access key is required"))?;
                    // R2 and most S3-compatible services ignore the region but the SDK wants one
                    let region = descriptor.region.clone().unwrap_or_else(|| {
                        if name == BackendName::R2 {
                            "auto".to_string()
                        } else {
                            "us-east-1".to_string()
                        }
                    });
                    Ok(StorageConfig::S3(S3StorageConfig {
                        bucket_name,
                        region,
                        access_key_id,
                        secret_access_key,
                        endpoint_url: descriptor.endpoint_url.clone(),
                        force_path_style: descriptor.force_path_style,
                        public_url: descriptor.public_url.clone(),
                    }))
                }
                #[cfg(not(feature = "s3"))]
                {
                    Err(misconfigured("S3 support not compiled in"))
                }
            }
            other => Err(misconfigured(&format!("unknown driver '{}'", other))),
        }
    }
}

/// Create a storage backend based on the provided configuration
pub async fn create_storage_backend(config: StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Local { root, public_url } => {
            let backend = LocalStorageBackend::new(root, public_url);
            backend.initialize().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "s3")]
        StorageConfig::S3(s3_config) => {
            let backend = S3Service::new(s3_config).await?;
            backend.initialize().await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Every storage backend the process knows about, by name.
///
/// Backends that fail validation or initialization are remembered with their
/// reason so an upload targeting them fails with a configuration error instead
/// of silently landing somewhere else.
#[derive(Default)]
pub struct StorageRegistry {
    backends: BTreeMap<BackendName, Arc<dyn StorageBackend>>,
    unavailable: BTreeMap<BackendName, StorageError>,
}

impl StorageRegistry {
    /// Build every configured backend. Object-storage backends check that
    /// their bucket is reachable before they are registered.
    pub async fn from_config(config: &Config) -> Self {
        let mut registry = StorageRegistry::default();

        for (name, descriptor) in &config.backends {
            let storage_config = match StorageConfig::from_descriptor(*name, descriptor) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Storage backend '{}' disabled: {}", name, e);
                    registry.unavailable.insert(*name, e);
                    continue;
                }
            };

            match create_storage_backend(storage_config).await {
                Ok(backend) => {
                    info!("Storage backend '{}' ready ({})", name, backend.storage_type());
                    registry.backends.insert(*name, backend);
                }
                Err(e) => {
                    error!("Failed to initialize storage backend '{}': {:#}", name, e);
                    registry.unavailable.insert(
                        *name,
                        StorageError::Configuration {
                            backend: name.to_string(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        registry
    }

    /// Register an already-built backend.
    pub fn with_backend(mut self, name: BackendName, backend: Arc<dyn StorageBackend>) -> Self {
        self.unavailable.remove(&name);
        self.backends.insert(name, backend);
        self
    }

    /// Look up a backend by name.
    pub fn select(&self, name: BackendName) -> Result<Arc<dyn StorageBackend>, StorageError> {
        if let Some(backend) = self.backends.get(&name) {
            return Ok(backend.clone());
        }
        Err(self
            .unavailable
            .get(&name)
            .cloned()
            .unwrap_or_else(|| StorageError::NotConfigured(name.to_string())))
    }

    /// Names of all usable backends.
    pub fn available(&self) -> Vec<BackendName> {
        self.backends.keys().copied().collect()
    }

    /// Backends that could not be built, with the reason.
    pub fn unavailable(&self) -> impl Iterator<Item = (&BackendName, &StorageError)> {
        self.unavailable.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_descriptor_rejects_unknown_driver() {
        let descriptor = BackendDescriptor {
            driver: "ftp".to_string(),
            ..Default::default()
        };
        let err = StorageConfig::from_descriptor(BackendName::Media, &descriptor).unwrap_err();
        assert!(matches!(err, StorageError::Configuration { .. }));
        assert!(err.to_string().contains("ftp"));
    }

    #[test]
    fn test_from_descriptor_requires_local_root() {
        let descriptor = BackendDescriptor {
            driver: "local".to_string(),
            ..Default::default()
        };
        assert!(StorageConfig::from_descriptor(BackendName::Local, &descriptor).is_err());
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_from_descriptor_s3_requires_credentials() {
        let descriptor = BackendDescriptor {
            driver: "s3".to_string(),
            bucket: Some("media".to_string()),
            ..Default::default()
        };
        let err = StorageConfig::from_descriptor(BackendName::R2, &descriptor).unwrap_err();
        assert!(err.to_string().contains("access key"));
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_from_descriptor_r2_defaults_region() {
        let descriptor = BackendDescriptor {
            driver: "s3".to_string(),
            bucket: Some("media".to_string()),
            access_key_id: Some("id".to_string()),
            secret_access_key: Some("secret".to_string()),
            endpoint_url: Some("https://acct.r2.cloudflarestorage.com".to_string()),
            force_path_style: true,
            ..Default::default()
        };
        match StorageConfig::from_descriptor(BackendName::R2, &descriptor).unwrap() {
            StorageConfig::S3(cfg) => {
                assert_eq!(cfg.region, "auto");
                assert!(cfg.force_path_style);
            }
            other => panic!("expected S3 config, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registry_reports_unconfigured_and_misconfigured() {
        let dir = TempDir::new().unwrap();
        let mut config = crate::test_helpers::test_config(dir.path());
        config.backends.insert(
            BackendName::S3,
            BackendDescriptor {
                driver: "carrier-pigeon".to_string(),
                ..Default::default()
            },
        );

        let registry = StorageRegistry::from_config(&config).await;
        assert!(registry.select(BackendName::Local).is_ok());
        assert!(matches!(
            registry.select(BackendName::S3),
            Err(StorageError::Configuration { .. })
        ));
        assert!(matches!(
            registry.select(BackendName::R2),
            Err(StorageError::NotConfigured(_))
        ));
    }
}
