use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::Config;
use crate::storage::{StorageBackend, StorageRegistry};

const PROBE_PATH: &str = ".mediashelf-probe";

/// Outcome of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReport {
    pub name: String,
    pub storage_type: Option<&'static str>,
    pub error: Option<String>,
}

impl BackendReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Write, check and remove a small object.
pub async fn probe_backend(backend: &dyn StorageBackend) -> Result<()> {
    let payload = b"mediashelf storage probe";
    let written = backend
        .write_stream(PROBE_PATH, &mut payload.as_slice(), "text/plain")
        .await
        .context("write failed")?;
    if written != payload.len() as u64 {
        anyhow::bail!("short write: {} of {} bytes", written, payload.len());
    }
    if !backend.exists(PROBE_PATH).await.context("exists check failed")? {
        anyhow::bail!("probe object missing after write");
    }
    backend.delete(PROBE_PATH).await.context("delete failed")?;
    Ok(())
}

/// Probe every backend in the registry, usable or not.
pub async fn check_registry(registry: &StorageRegistry) -> Vec<BackendReport> {
    let mut reports = Vec::new();

    for name in registry.available() {
        let report = match registry.select(name) {
            Ok(backend) => {
                let error = probe_backend(backend.as_ref()).await.err().map(|e| format!("{:#}", e));
                BackendReport {
                    name: name.to_string(),
                    storage_type: Some(backend.storage_type()),
                    error,
                }
            }
            Err(e) => BackendReport {
                name: name.to_string(),
                storage_type: None,
                error: Some(e.to_string()),
            },
        };
        reports.push(report);
    }

    for (name, e) in registry.unavailable() {
        reports.push(BackendReport {
            name: name.to_string(),
            storage_type: None,
            error: Some(e.to_string()),
        });
    }

    reports
}

/// Build every configured backend, probe it and print a summary.
/// Fails if any backend is unusable.
pub async fn check_storage(config: &Config) -> Result<()> {
    let registry = StorageRegistry::from_config(config).await;
    let reports = check_registry(&registry).await;

    println!();
    println!("==============================================");
    println!("  STORAGE BACKENDS");
    println!("==============================================");
    for report in &reports {
        match &report.error {
            None => {
                info!("Storage backend '{}' passed its probe", report.name);
                println!("  {:<6} ok ({})", report.name, report.storage_type.unwrap_or("unknown"));
            }
            Some(e) => {
                error!("Storage backend '{}' failed: {}", report.name, e);
                println!("  {:<6} FAILED: {}", report.name, e);
            }
        }
    }
    println!("==============================================");
    println!();

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} storage backend(s) unusable", failed, reports.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendName;
    use crate::storage::local::LocalStorageBackend;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_probe_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let backend = LocalStorageBackend::new(dir.path().to_string_lossy().to_string(), None);
        backend.initialize().await.unwrap();

        probe_backend(&backend).await.unwrap();
        assert!(!dir.path().join(PROBE_PATH).exists());
    }

    #[tokio::test]
    async fn test_registry_report_includes_unavailable_backends() {
        let dir = TempDir::new().unwrap();
        let mut config = crate::test_helpers::test_config(dir.path());
        config.backends.insert(
            BackendName::Media,
            crate::config::BackendDescriptor {
                driver: "ftp".to_string(),
                ..Default::default()
            },
        );

        let registry = StorageRegistry::from_config(&config).await;
        let reports = check_registry(&registry).await;

        let local = reports.iter().find(|r| r.name == "local").unwrap();
        assert!(local.is_ok());
        let media = reports.iter().find(|r| r.name == "media").unwrap();
        assert!(!media.is_ok());
    }

    #[tokio::test]
    async fn test_registry_report_for_registered_backend() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalStorageBackend::new(dir.path().to_string_lossy().to_string(), None));
        let registry = StorageRegistry::default().with_backend(BackendName::S3, backend);

        let reports = check_registry(&registry).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].storage_type, Some("local"));
        assert!(reports[0].is_ok());
    }
}
