use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::policy::ExtractLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// How long a connection waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_busy_timeout_secs() -> u64 {
    10
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root served under `/storage/`. Packages are extracted into `<root>/packages`.
    pub root: PathBuf,
    /// Staging directory for incoming uploads. Must not be below `root`.
    /// Defaults to `<root>.uploads` next to the storage root.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(PACKAGES_DIR_NAME)
    }

    pub fn upload_dir(&self) -> PathBuf {
        if let Some(dir) = &self.upload_dir {
            return dir.clone();
        }
        match self.root.file_name() {
            Some(name) => {
                let mut staging = name.to_os_string();
                staging.push(".uploads");
                self.root.with_file_name(staging)
            }
            None => self.root.join(UPLOAD_DIR_FALLBACK),
        }
    }
}

const UPLOAD_DIR_FALLBACK: &str = "mag-uploads";

pub const PACKAGES_DIR_NAME: &str = "packages";

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_package_bytes")]
    pub max_package_bytes: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    #[serde(default = "default_free_space_margin")]
    pub free_space_margin: f64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_package_bytes: default_max_package_bytes(),
            max_file_bytes: default_max_file_bytes(),
            read_chunk_bytes: default_read_chunk_bytes(),
            free_space_margin: default_free_space_margin(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl LimitsConfig {
    pub fn extract_limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_package_bytes: self.max_package_bytes,
            max_file_bytes: self.max_file_bytes,
            read_chunk_bytes: self.read_chunk_bytes,
            free_space_margin: self.free_space_margin,
        }
    }
}

const MIB: u64 = 1024 * 1024;

fn default_max_package_bytes() -> u64 {
    300 * MIB
}
fn default_max_file_bytes() -> u64 {
    100 * MIB
}
fn default_read_chunk_bytes() -> usize {
    MIB as usize
}
fn default_free_space_margin() -> f64 {
    0.10
}
fn default_max_upload_bytes() -> usize {
    320 * MIB as usize
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_secret")]
    pub secret: String,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

fn default_secret() -> String {
    "change-this-secret".to_string()
}
fn default_token_ttl_minutes() -> i64 {
    60 * 24
}

/// Upper bound for `auth.token_ttl_minutes` (one year).
pub const MAX_TOKEN_TTL_MINUTES: i64 = 366 * 24 * 60;

/// One row of the static user table reconciled into the database at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct UserSeed {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    let upload_dir = config.storage.upload_dir();
    if upload_dir.starts_with(&config.storage.root) {
        anyhow::bail!(
            "storage.upload_dir must be outside storage.root ({} is served under /storage)",
            config.storage.root.display()
        );
    }

    let limits = &config.limits;
    if limits.max_package_bytes == 0 {
        anyhow::bail!("limits.max_package_bytes must be > 0");
    }
    if limits.max_file_bytes == 0 {
        anyhow::bail!("limits.max_file_bytes must be > 0");
    }
    if limits.max_file_bytes > limits.max_package_bytes {
        anyhow::bail!("limits.max_file_bytes must not exceed limits.max_package_bytes");
    }
    if limits.read_chunk_bytes == 0 {
        anyhow::bail!("limits.read_chunk_bytes must be > 0");
    }
    if !(0.0..1.0).contains(&limits.free_space_margin) {
        anyhow::bail!("limits.free_space_margin must be in [0.0, 1.0)");
    }
    if limits.max_upload_bytes == 0 {
        anyhow::bail!("limits.max_upload_bytes must be > 0");
    }

    if config.auth.secret.trim().is_empty() {
        anyhow::bail!("auth.secret must not be empty");
    }
    if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&config.auth.token_ttl_minutes) {
        anyhow::bail!(
            "auth.token_ttl_minutes must be between 1 and {}",
            MAX_TOKEN_TTL_MINUTES
        );
    }

    let mut seen = HashSet::new();
    for user in &config.users {
        let code = user.code.trim().to_uppercase();
        if code.is_empty() {
            anyhow::bail!("users: code must not be empty (user '{}')", user.name);
        }
        if !seen.insert(code) {
            anyhow::bail!("users: duplicate code '{}'", user.code);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!(
            r#"
[db]
path = "/tmp/mag.sqlite"

[storage]
root = "/tmp/storage"

[server]
bind = "127.0.0.1:0"
{}
"#,
            extra
        );
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse("").unwrap();
        assert_eq!(config.limits.max_package_bytes, 300 * MIB);
        assert_eq!(config.limits.max_file_bytes, 100 * MIB);
        assert_eq!(config.limits.read_chunk_bytes, MIB as usize);
        assert!((config.limits.free_space_margin - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.auth.token_ttl_minutes, 1440);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000"]);
        assert!(config.users.is_empty());
        assert_eq!(
            config.storage.packages_dir(),
            PathBuf::from("/tmp/storage/packages")
        );
    }

    #[test]
    fn test_users_table() {
        let config = parse(
            r#"
[[users]]
code = "ORC/DDAE-11.25"
name = "Magno"

[[users]]
code = "ADM/COORD-01.25"
name = "Maria"
active = false
"#,
        )
        .unwrap();
        assert_eq!(config.users.len(), 2);
        assert!(config.users[0].active);
        assert!(!config.users[1].active);
    }

    #[test]
    fn test_duplicate_user_codes_rejected() {
        let err = parse(
            r#"
[[users]]
code = "abc-1"
name = "One"

[[users]]
code = "ABC-1"
name = "Two"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate code"));
    }

    #[test]
    fn test_file_ceiling_above_package_ceiling_rejected() {
        let err = parse(
            r#"
[limits]
max_package_bytes = 10
max_file_bytes = 20
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_file_bytes"));
    }

    #[test]
    fn test_upload_dir_sits_next_to_storage_root() {
        let config = parse("").unwrap();
        assert_eq!(
            config.storage.upload_dir(),
            PathBuf::from("/tmp/storage.uploads")
        );
        assert_eq!(config.db.busy_timeout_secs, 10);
        assert_eq!(config.db.max_connections, 5);
    }

    #[test]
    fn test_upload_dir_inside_storage_root_rejected() {
        let content = r#"
[db]
path = "/tmp/mag.sqlite"

[storage]
root = "/tmp/storage"
upload_dir = "/tmp/storage/incoming"

[server]
bind = "127.0.0.1:0"
"#;
        let config: Config = toml::from_str(content).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("storage.upload_dir"));
    }

    #[test]
    fn test_token_ttl_bounds() {
        assert!(parse("[auth]\ntoken_ttl_minutes = 0\n").is_err());
        let err = parse(&format!(
            "[auth]\ntoken_ttl_minutes = {}\n",
            MAX_TOKEN_TTL_MINUTES + 1
        ))
        .unwrap_err();
        assert!(err.to_string().contains("token_ttl_minutes"));
        assert!(parse("[auth]\ntoken_ttl_minutes = 9223372036854775807\n").is_err());
        assert!(parse(&format!(
            "[auth]\ntoken_ttl_minutes = {}\n",
            MAX_TOKEN_TTL_MINUTES
        ))
        .is_ok());
    }

    #[test]
    fn test_margin_out_of_range_rejected() {
        assert!(parse("[limits]\nfree_space_margin = 1.0\n").is_err());
        assert!(parse("[limits]\nfree_space_margin = -0.1\n").is_err());
    }
}
