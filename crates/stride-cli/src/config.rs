//! Configuration file management for stride.
//!
//! A TOML file at `~/.config/stride/config.toml` plus a resolution chain:
//! CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use stride_core::compile::Level2Shape;
use stride_core::generation::OpenAiConfig;
use stride_db::config::DbConfig;

pub const API_KEY_ENV: &str = "STRIDE_OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "STRIDE_OPENAI_BASE_URL";
pub const MODEL_ENV: &str = "STRIDE_MODEL";
pub const LEVEL2_SHAPE_ENV: &str = "STRIDE_LEVEL2_SHAPE";

/// Generation quota given to users created without `--quota`.
pub const DEFAULT_QUOTA: i32 = 5;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GenerationSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default)]
    pub level2_shape: Level2Shape,
    #[serde(default = "default_quota")]
    pub default_quota: i32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            level2_shape: Level2Shape::default(),
            default_quota: DEFAULT_QUOTA,
        }
    }
}

fn default_quota() -> i32 {
    DEFAULT_QUOTA
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// `$XDG_CONFIG_HOME/stride`, or `~/.config/stride` on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("stride");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("stride")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Write the config file with owner-only permissions.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration.
#[derive(Debug)]
pub struct StrideConfig {
    pub db_config: DbConfig,
    /// `None` when no API key is configured anywhere.
    pub openai: Option<OpenAiConfig>,
    pub level2_shape: Level2Shape,
    pub default_quota: i32,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl StrideConfig {
    /// Resolve configuration.
    ///
    /// - DB URL: `cli_db_url` > `STRIDE_DATABASE_URL` > `[database] url` > default
    /// - API key, base URL, model: env > `[generation]` > built-in defaults
    /// - Level-2 shape: `STRIDE_LEVEL2_SHAPE` > `[pipeline] level2_shape` > `plan_item`
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();
        Self::resolve_with(cli_db_url, file_config)
    }

    fn resolve_with(cli_db_url: Option<&str>, file_config: Option<ConfigFile>) -> Result<Self> {
        let file_config = file_config.unwrap_or_default();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Some(url) = env_nonempty(DbConfig::ENV_VAR) {
            url
        } else {
            file_config.database.url
        };

        let generation = file_config.generation;
        let openai = env_nonempty(API_KEY_ENV)
            .or(generation.api_key)
            .map(|api_key| {
                let mut cfg = OpenAiConfig::new(api_key);
                if let Some(base_url) = env_nonempty(BASE_URL_ENV).or(generation.base_url) {
                    cfg.base_url = base_url;
                }
                if let Some(model) = env_nonempty(MODEL_ENV).or(generation.model) {
                    cfg.model = model;
                }
                cfg
            });

        let level2_shape = match env_nonempty(LEVEL2_SHAPE_ENV) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("{LEVEL2_SHAPE_ENV} is invalid"))?,
            None => file_config.pipeline.level2_shape,
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
            openai,
            level2_shape,
            default_quota: file_config.pipeline.default_quota,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        for var in [
            DbConfig::ENV_VAR,
            API_KEY_ENV,
            BASE_URL_ENV,
            MODEL_ENV,
            LEVEL2_SHAPE_ENV,
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: ConfigFile =
            toml::from_str("[database]\nurl = \"postgresql://db:5432/stride\"\n").unwrap();
        assert_eq!(parsed.database.url, "postgresql://db:5432/stride");
        assert!(parsed.generation.api_key.is_none());
        assert_eq!(parsed.pipeline.level2_shape, Level2Shape::PlanItem);
        assert_eq!(parsed.pipeline.default_quota, DEFAULT_QUOTA);
    }

    #[test]
    fn file_roundtrip_keeps_every_section() {
        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            generation: GenerationSection {
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: Some("llama3".to_string()),
                api_key: Some("sk-test".to_string()),
            },
            pipeline: PipelineSection {
                level2_shape: Level2Shape::Timeline,
                default_quota: 12,
            },
        };

        let contents = toml::to_string_pretty(&original).unwrap();
        assert!(contents.contains("level2_shape = \"timeline\""));
        let loaded: ConfigFile = toml::from_str(&contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.generation.model.as_deref(), Some("llama3"));
        assert_eq!(loaded.pipeline.level2_shape, Level2Shape::Timeline);
        assert_eq!(loaded.pipeline.default_quota, 12);
    }

    #[cfg(unix)]
    #[test]
    fn save_config_writes_owner_only_file() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let result = save_config(&ConfigFile::default());
        let path = config_path();

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        result.unwrap();
        assert!(path.starts_with(tmp.path()));
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn cli_flag_overrides_env_and_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };

        let config =
            StrideConfig::resolve_with(Some("postgresql://cli:5432/clidb"), None).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        clear_env();
    }

    #[test]
    fn env_overrides_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(LEVEL2_SHAPE_ENV, "timeline") };
        unsafe { std::env::set_var(MODEL_ENV, "gpt-4o") };

        let file = ConfigFile {
            generation: GenerationSection {
                api_key: Some("sk-file".to_string()),
                model: Some("file-model".to_string()),
                base_url: None,
            },
            ..ConfigFile::default()
        };
        let config = StrideConfig::resolve_with(None, Some(file)).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(config.level2_shape, Level2Shape::Timeline);

        let openai = config.openai.unwrap();
        assert_eq!(openai.api_key, "sk-file");
        assert_eq!(openai.model, "gpt-4o");
        assert_eq!(openai.base_url, OpenAiConfig::DEFAULT_BASE_URL);

        clear_env();
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let _lock = lock_env();
        clear_env();

        let config = StrideConfig::resolve_with(None, None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert!(config.openai.is_none());
        assert_eq!(config.level2_shape, Level2Shape::PlanItem);
        assert_eq!(config.default_quota, DEFAULT_QUOTA);
    }

    #[test]
    fn invalid_shape_in_env_is_an_error() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(LEVEL2_SHAPE_ENV, "paragraph") };

        let err = StrideConfig::resolve_with(None, None).unwrap_err();
        assert!(format!("{err:#}").contains("paragraph"), "unexpected error: {err:#}");

        clear_env();
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let _lock = lock_env();
        let path = config_path();
        assert!(
            path.ends_with("stride/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
