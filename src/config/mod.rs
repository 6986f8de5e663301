//! Configuration module for guard, policy, sandbox, and soft-delete settings
//!
//! Provides TOML-based configuration with defaults, CLI override, and env var
//! support. Invalid enumerated values and out-of-range knobs are rejected at
//! load time; a command is never evaluated against a half-parsed config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{GuardLevel, NetworkMode, SandboxMode, SecurityLevel};

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config directory error: {0}")]
    DirectoryError(String),
}

/// Pattern inputs consumed by the analyzer and the path validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Substring patterns that exempt a line from all checks.
    pub allowlist: Vec<String>,
    /// Substring patterns that flag a line outright.
    pub denylist: Vec<String>,
    /// Absolute path prefixes that destructive commands may not touch.
    pub protected_dirs: Vec<String>,
    pub monitor_vcs_ops: bool,
    pub block_force_vcs: bool,
    pub detect_prod_env: bool,
    pub prod_env_keywords: Vec<String>,
    /// When set, database clients only flag on destructive statements.
    pub only_destructive_sql: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            denylist: Vec::new(),
            protected_dirs: Vec::new(),
            monitor_vcs_ops: true,
            block_force_vcs: false,
            detect_prod_env: true,
            prod_env_keywords: vec!["production".to_string(), "prod".to_string()],
            only_destructive_sql: true,
        }
    }
}

/// Guard-level settings, including the interactive/env-var bypass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardLevelConfig {
    pub level: GuardLevel,
    pub allow_user_bypass: bool,
    pub bypass_env_var: String,
    /// Branches treated as production by `auto` resolution.
    pub production_branches: Vec<String>,
}

impl Default for GuardLevelConfig {
    fn default() -> Self {
        Self {
            level: GuardLevel::Auto,
            allow_user_bypass: true,
            bypass_env_var: "CMDGUARD_BYPASS".to_string(),
            production_branches: vec![
                "main".to_string(),
                "master".to_string(),
                "production".to_string(),
                "release".to_string(),
            ],
        }
    }
}

/// A host path mounted into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: PathBuf,
    #[serde(default)]
    pub writable: bool,
}

/// Preferred sandbox backend. `Auto` defers to the runtime selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeChoice {
    #[default]
    Auto,
    Bubblewrap,
    Namespace,
    Container,
}

/// Sandbox routing and isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub mode: SandboxMode,
    pub security_level: SecurityLevel,
    pub runtime: RuntimeChoice,
    pub enable_cache: bool,
    pub cache_dirs: Vec<PathBuf>,
    pub timeout_seconds: u64,
    pub allow_network: bool,
    pub network_mode: NetworkMode,
    pub env_whitelist: Vec<String>,
    pub bind_mounts: Vec<BindMount>,
    /// Extra read-only paths exposed to every sandbox.
    pub readonly_paths: Vec<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SandboxMode::Auto,
            security_level: SecurityLevel::Balanced,
            runtime: RuntimeChoice::Auto,
            enable_cache: true,
            cache_dirs: Vec::new(),
            timeout_seconds: 300,
            allow_network: true,
            network_mode: NetworkMode::Restricted,
            env_whitelist: vec![
                "PATH".to_string(),
                "HOME".to_string(),
                "LANG".to_string(),
                "TERM".to_string(),
                "USER".to_string(),
            ],
            bind_mounts: Vec::new(),
            readonly_paths: Vec::new(),
        }
    }
}

/// Soft-delete interception and backup retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftDeleteConfig {
    pub enabled: bool,
    pub protect_vcs: bool,
    pub auto_cleanup: bool,
    pub auto_delete: bool,
    pub max_age_days: u32,
    pub max_backups: usize,
    pub max_size_mb: u64,
    pub auto_delete_after_days: u32,
    /// Override for the backup root; defaults to `<state dir>/backups`.
    pub backup_dir: Option<PathBuf>,
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protect_vcs: true,
            auto_cleanup: true,
            auto_delete: false,
            max_age_days: 30,
            max_backups: 50,
            max_size_mb: 1024,
            auto_delete_after_days: 90,
            backup_dir: None,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub guard_level: GuardLevelConfig,
    pub policy: PolicyConfig,
    pub sandbox: SandboxConfig,
    pub soft_delete: SoftDeleteConfig,
}

impl GuardConfig {
    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.sandbox.timeout_seconds == 0 {
            return Err("sandbox.timeout_seconds must be greater than zero".to_string());
        }
        if self.soft_delete.max_backups == 0 {
            return Err("soft_delete.max_backups must be greater than zero".to_string());
        }
        if self.soft_delete.auto_delete && self.soft_delete.auto_delete_after_days == 0 {
            return Err(
                "soft_delete.auto_delete_after_days must be set when auto_delete is enabled"
                    .to_string(),
            );
        }
        for dir in &self.policy.protected_dirs {
            if !dir.starts_with('/') {
                return Err(format!("policy.protected_dirs entry is not absolute: {dir}"));
            }
        }
        if self.guard_level.bypass_env_var.is_empty() && self.guard_level.allow_user_bypass {
            return Err("guard_level.bypass_env_var must be set when bypass is allowed".to_string());
        }
        Ok(())
    }
}

/// Manages the on-disk configuration file.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a manager using the XDG config directory
    /// (`~/.config/cmdguard/config.toml`).
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| {
                ConfigError::DirectoryError("could not determine config directory".to_string())
            })?
            .join("cmdguard");

        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir)?;
        }

        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a manager with a custom config path.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        if let Some(parent) = config_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { config_path })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file, or return defaults if not found.
    pub fn load(&self) -> Result<GuardConfig, ConfigError> {
        if !self.config_path.exists() {
            return Ok(GuardConfig::default());
        }

        let contents = std::fs::read_to_string(&self.config_path)?;
        let config: GuardConfig = toml::from_str(&contents)?;
        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    /// Persist configuration as TOML.
    pub fn save(&self, config: &GuardConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationError)?;
        let contents = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.config_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.config_path, perms)?;
        }

        Ok(())
    }
}
