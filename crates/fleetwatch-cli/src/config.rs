//! Configuration file management for fleetwatch.
//!
//! Provides a TOML-based config file at `~/.config/fleetwatch/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use fleetwatch_chat::BotType;
use fleetwatch_core::token::TokenConfig;
use fleetwatch_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub chat: ChatSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token secret (64 hex chars = 32 bytes).
    pub token_secret: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChatSection {
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub bots: HashMap<String, String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the fleetwatch config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/fleetwatch` or
/// `~/.config/fleetwatch`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("fleetwatch");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("fleetwatch")
}

/// Return the path to the fleetwatch config file.
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

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
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
// Token secret generation
// -----------------------------------------------------------------------

/// Generate a random token secret: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct FleetwatchConfig {
    pub db_config: DbConfig,
    pub token_config: TokenConfig,
    pub webhook_secret: Option<String>,
    pub bot_credentials: HashMap<BotType, String>,
}

impl FleetwatchConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - DB URL: `cli_db_url` > `FLEETWATCH_DATABASE_URL` env >
    ///   `config_file.database.url` > `DbConfig::DEFAULT_URL`.
    /// - Token secret: `FLEETWATCH_TOKEN_SECRET` env >
    ///   `config_file.auth.token_secret` (hex-decoded) > error.
    /// - Webhook secret: `FLEETWATCH_WEBHOOK_SECRET` env >
    ///   `config_file.chat.webhook_secret` > absent (webhook mode refuses to
    ///   start without one).
    /// - Per-bot credentials: `FLEETWATCH_BOT_<TYPE>` env vars, one per
    ///   [`BotType`], falling back to `config_file.chat.bots`.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("FLEETWATCH_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let token_config = if let Ok(secret_hex) = std::env::var("FLEETWATCH_TOKEN_SECRET") {
            let bytes =
                hex::decode(&secret_hex).context("FLEETWATCH_TOKEN_SECRET env var is not valid hex")?;
            TokenConfig::new(bytes)
        } else if let Some(ref cfg) = file_config {
            let bytes = hex::decode(&cfg.auth.token_secret)
                .context("invalid hex in config file token_secret")?;
            TokenConfig::new(bytes)
        } else {
            bail!(
                "token secret not found; set FLEETWATCH_TOKEN_SECRET or run `fleetwatch init` to create a config file"
            );
        };

        let webhook_secret = std::env::var("FLEETWATCH_WEBHOOK_SECRET")
            .ok()
            .or_else(|| file_config.as_ref().and_then(|c| c.chat.webhook_secret.clone()));

        let mut bot_credentials = file_config
            .as_ref()
            .map(|c| {
                c.chat
                    .bots
                    .iter()
                    .filter_map(|(k, v)| BotType::from_env_suffix(k).map(|b| (b, v.clone())))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();
        for bot in BotType::ALL {
            let var = format!("FLEETWATCH_BOT_{}", bot.env_suffix());
            if let Ok(value) = std::env::var(&var) {
                bot_credentials.insert(*bot, value);
            }
        }

        Ok(Self {
            db_config,
            token_config,
            webhook_secret,
            bot_credentials,
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

    #[test]
    fn generate_token_secret_is_64_hex_chars() {
        let secret = generate_token_secret();
        assert_eq!(secret.len(), 64);
        assert!(
            secret.chars().all(|c| c.is_ascii_hexdigit()),
            "expected all hex digits, got: {secret}"
        );
    }

    #[test]
    fn generate_token_secret_is_random() {
        let a = generate_token_secret();
        let b = generate_token_secret();
        assert_ne!(a, b, "two generated secrets should differ");
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("fleetwatch");
        let path = dir.join("config.toml");

        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            auth: AuthSection {
                token_secret: "aa".repeat(32),
            },
            chat: ChatSection::default(),
        };

        std::fs::create_dir_all(&dir).unwrap();
        let contents = toml::to_string_pretty(&original).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let loaded_contents = std::fs::read_to_string(&path).unwrap();
        let loaded: ConfigFile = toml::from_str(&loaded_contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.auth.token_secret, original.auth.token_secret);
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();

        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("test.toml");
        std::fs::write(&file, "test").unwrap();

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&file, perms).unwrap();

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("FLEETWATCH_DATABASE_URL", "postgresql://env:5432/envdb") };
        unsafe {
            std::env::set_var(
                "FLEETWATCH_TOKEN_SECRET",
                "aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55",
            )
        };

        let config = FleetwatchConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("FLEETWATCH_DATABASE_URL") };
        unsafe { std::env::remove_var("FLEETWATCH_TOKEN_SECRET") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();

        unsafe { std::env::set_var("FLEETWATCH_DATABASE_URL", "postgresql://env:5432/envdb") };
        unsafe {
            std::env::set_var(
                "FLEETWATCH_TOKEN_SECRET",
                "aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55",
            )
        };

        let config = FleetwatchConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");

        unsafe { std::env::remove_var("FLEETWATCH_DATABASE_URL") };
        unsafe { std::env::remove_var("FLEETWATCH_TOKEN_SECRET") };
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _lock = lock_env();

        unsafe { std::env::remove_var("FLEETWATCH_DATABASE_URL") };
        unsafe {
            std::env::set_var(
                "FLEETWATCH_TOKEN_SECRET",
                "aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55",
            )
        };

        let config = FleetwatchConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);

        unsafe { std::env::remove_var("FLEETWATCH_TOKEN_SECRET") };
    }

    #[test]
    fn resolve_errors_when_no_token_secret() {
        let _lock = lock_env();

        unsafe { std::env::remove_var("FLEETWATCH_TOKEN_SECRET") };
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_home = std::env::var("HOME").ok();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("HOME", tmp.path()) };
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };

        let result = FleetwatchConfig::resolve(Some("postgresql://localhost:5432/fleetwatch"));

        match orig_home {
            Some(h) => unsafe { std::env::set_var("HOME", h) },
            None => unsafe { std::env::remove_var("HOME") },
        }
        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        assert!(result.is_err(), "should error when no token secret");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("token secret not found"), "unexpected error: {msg}");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("fleetwatch/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
