use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Named storage backends an upload can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendName {
    Local,
    Media,
    R2,
    S3,
}

impl BackendName {
    pub const ALL: [BackendName; 4] = [
        BackendName::Local,
        BackendName::Media,
        BackendName::R2,
        BackendName::S3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendName::Local => "local",
            BackendName::Media => "media",
            BackendName::R2 => "r2",
            BackendName::S3 => "s3",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            BackendName::Local => "LOCAL",
            BackendName::Media => "MEDIA",
            BackendName::R2 => "R2",
            BackendName::S3 => "S3",
        }
    }

    /// Resolve a caller-supplied backend selector. Unrecognized or missing
    /// values fall back to `default`.
    pub fn from_selector(selector: Option<&str>, default: BackendName) -> BackendName {
        selector
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendName::Local),
            "media" => Ok(BackendName::Media),
            "r2" => Ok(BackendName::R2),
            "s3" => Ok(BackendName::S3),
            _ => Err(anyhow!("Unknown storage backend: {}", s)),
        }
    }
}

impl TryFrom<String> for BackendName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|e: anyhow::Error| e.to_string())
    }
}

/// Static description of one storage backend. Driver identifiers and required
/// credentials are validated when the backend is built, not here, so a
/// malformed descriptor surfaces as a configuration error at upload time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub driver: String,
    pub root: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    /// Public URL template, e.g. `https://cdn.example.com/{path}`. Without a
    /// `{path}` placeholder the object path is appended after a `/`.
    pub public_url: Option<String>,
}

impl BackendDescriptor {
    pub fn local(root: impl Into<String>) -> Self {
        Self {
            driver: "local".to_string(),
            root: Some(root.into()),
            ..Default::default()
        }
    }
}

/// One derivative size class, e.g. `thumb` bounded by 150x150.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeSize {
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
}

impl DerivativeSize {
    pub fn new(name: impl Into<String>, max_width: u32, max_height: u32) -> Self {
        Self {
            name: name.into(),
            max_width,
            max_height,
        }
    }

    /// Parse `thumb:150x150,medium:600x600`.
    pub fn parse_list(spec: &str) -> Result<Vec<DerivativeSize>> {
        let mut sizes = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, dims) = entry
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid derivative size '{}', expected name:WxH", entry))?;
            let (w, h) = dims
                .split_once(['x', 'X'])
                .ok_or_else(|| anyhow!("Invalid derivative dimensions '{}'", dims))?;
            let max_width: u32 = w.trim().parse()?;
            let max_height: u32 = h.trim().parse()?;
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(anyhow!("Invalid derivative size name '{}'", name));
            }
            if max_width == 0 || max_height == 0 {
                return Err(anyhow!("Derivative size '{}' must be non-zero", name));
            }
            if sizes.iter().any(|s: &DerivativeSize| s.name == name) {
                return Err(anyhow!("Duplicate derivative size '{}'", name));
            }
            sizes.push(DerivativeSize::new(name, max_width, max_height));
        }
        Ok(sizes)
    }
}

pub fn default_derivative_sizes() -> Vec<DerivativeSize> {
    vec![
        DerivativeSize::new("thumb", 150, 150),
        DerivativeSize::new("medium", 600, 600),
    ]
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_address: String,
    /// Base URL used to build token-gated links, without trailing slash.
    pub public_base_url: String,
    pub upload_path: String,
    pub staging_path: String,
    pub max_file_size_mb: u64,
    pub image_quality: u8,
    pub derivative_sizes: Vec<DerivativeSize>,
    pub default_backend: BackendName,
    pub deduplicate_uploads: bool,
    pub backends: BTreeMap<BackendName, BackendDescriptor>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Failed to read .env file: {}", e),
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. `from_env` passes
    /// the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let upload_path = get("UPLOAD_PATH").unwrap_or_else(|| "./uploads".to_string());
        let staging_path = get("STAGING_PATH").unwrap_or_else(|| format!("{}/.staging", upload_path));

        let max_file_size_mb = match get("MAX_FILE_SIZE_MB") {
            Some(v) => v
                .parse::<u64>()
                .map_err(|_| anyhow!("MAX_FILE_SIZE_MB must be a positive integer, got '{}'", v))?,
            None => 10,
        };
        if max_file_size_mb == 0 {
            return Err(anyhow!("MAX_FILE_SIZE_MB must be greater than zero"));
        }
        if max_file_size_mb.checked_mul(1024 * 1024).is_none() {
            return Err(anyhow!("MAX_FILE_SIZE_MB is too large: {}", max_file_size_mb));
        }

        let image_quality = match get("IMAGE_QUALITY") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| anyhow!("IMAGE_QUALITY must be an integer, got '{}'", v))?
                .clamp(1, 100) as u8,
            None => 85,
        };

        let derivative_sizes = match get("DERIVATIVE_SIZES") {
            Some(v) => DerivativeSize::parse_list(&v)?,
            None => default_derivative_sizes(),
        };

        let default_backend = match get("DEFAULT_BACKEND") {
            Some(v) => v.parse()?,
            None => BackendName::Local,
        };

        let deduplicate_uploads = get("DEDUPLICATE_UPLOADS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let mut backends = BTreeMap::new();
        for name in BackendName::ALL {
            if let Some(descriptor) = backend_from_lookup(name, &upload_path, &get) {
                backends.insert(name, descriptor);
            }
        }

        let public_base_url = get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Config {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://mediashelf.db?mode=rwc".to_string()),
            server_address: get("SERVER_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            public_base_url,
            upload_path,
            staging_path,
            max_file_size_mb,
            image_quality,
            derivative_sizes,
            default_backend,
            deduplicate_uploads,
            backends,
        })
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn backend_from_lookup<G>(name: BackendName, upload_path: &str, get: &G) -> Option<BackendDescriptor>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = name.env_prefix();
    let var = |suffix: &str| get(&format!("{}_{}", prefix, suffix));

    let driver = var("DRIVER");
    let bucket = var("BUCKET");
    let root = var("ROOT").or_else(|| if name == BackendName::Media { var("PATH") } else { None });

    let (default_driver, default_root) = match name {
        BackendName::Local => ("local", Some(upload_path.to_string())),
        BackendName::Media => ("local", Some(format!("{}/media", upload_path))),
        BackendName::R2 | BackendName::S3 => {
            // Object storage backends exist only when something configures them
            let configured = [
                "DRIVER",
                "BUCKET",
                "ACCESS_KEY_ID",
                "SECRET_ACCESS_KEY",
                "ENDPOINT_URL",
                "REGION",
                "PUBLIC_URL",
            ]
            .iter()
            .any(|suffix| var(suffix).is_some());
            if !configured {
                return None;
            }
            ("s3", None)
        }
    };

    Some(BackendDescriptor {
        driver: driver.unwrap_or_else(|| default_driver.to_string()).to_lowercase(),
        root: root.or(default_root),
        bucket,
        access_key_id: var("ACCESS_KEY_ID"),
        secret_access_key: var("SECRET_ACCESS_KEY"),
        region: var("REGION"),
        endpoint_url: var("ENDPOINT_URL"),
        force_path_style: var("PATH_STYLE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(name == BackendName::R2),
        public_url: var("PUBLIC_URL"),
    })
}
