//! Service configuration: TOML file plus environment overrides.
//!
//! Every section is optional. Environment variables loaded through `dotenvy`
//! win over the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `DATABASE_URL` | `database.url` |
//! | `SUPABASE_JWT_SECRET` | `auth.jwt_secret` |
//! | `PORT` | `server.port` |
//!
//! ```toml
//! [server]
//! port = 7002
//!
//! [market]
//! approval_policy = "manual"
//! sweep_interval_secs = 30
//! question_bank = "questions.toml"
//! ```

use crate::verifier::ApprovalPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 7002,
            request_timeout_secs: 30,
            body_limit_bytes: 1024 * 1024,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret. Unset means tokens are decoded without verification.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    pub audience: String,
    /// Value of the `role` claim that grants operator routes.
    pub admin_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_secret: None,
            audience: "authenticated".into(),
            admin_role: "service_role".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub approval_policy: ApprovalPolicy,
    /// Seconds between expiry sweeps; 0 disables the background loop.
    pub sweep_interval_secs: u64,
    pub max_proof_len: usize,
    pub question_bank: Option<PathBuf>,
    pub event_log_capacity: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            approval_policy: ApprovalPolicy::Auto,
            sweep_interval_secs: 60,
            max_proof_len: 4000,
            question_bank: None,
            event_log_capacity: 200,
        }
    }
}

impl Config {
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::parse_toml(&content)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Split out so tests need not
    /// touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(secret) = lookup("SUPABASE_JWT_SECRET").filter(|v| !v.is_empty()) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(port) = lookup("PORT").filter(|v| !v.is_empty()) {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got {:?}", port))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.market.max_proof_len == 0 {
            anyhow::bail!("market.max_proof_len must be positive");
        }
        if self.market.event_log_capacity == 0 {
            anyhow::bail!("market.event_log_capacity must be positive");
        }
        if self.server.body_limit_bytes == 0 {
            anyhow::bail!("server.body_limit_bytes must be positive");
        }
        if self.auth.admin_role.trim().is_empty() {
            anyhow::bail!("auth.admin_role must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.server.port, 7002);
        assert_eq!(config.market.approval_policy, ApprovalPolicy::Auto);
        assert_eq!(config.auth.admin_role, "service_role");
        assert!(config.database.url.is_none());
    }

    #[test]
    fn sections_are_parsed() {
        let config = Config::parse_toml(
            r#"
[server]
port = 8080
request_timeout_secs = 5

[database]
url = "postgres://localhost/market"
max_connections = 4

[market]
approval_policy = "manual"
sweep_interval_secs = 0
question_bank = "questions.toml"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.market.approval_policy, ApprovalPolicy::Manual);
        assert_eq!(config.market.sweep_interval_secs, 0);
        assert_eq!(
            config.market.question_bank.as_deref(),
            Some(Path::new("questions.toml"))
        );
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Config::parse_toml("[market]\napproval_policy = \"sometimes\"").is_err());
        assert!(Config::parse_toml("[market]\nmax_proof_len = 0").is_err());
    }

    #[test]
    fn environment_wins_over_file() {
        let mut config = Config::parse_toml("[server]\nport = 9000").unwrap();
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://db/market"),
            ("SUPABASE_JWT_SECRET", "s3cret"),
            ("PORT", "7100"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 7100);
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/market"));
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn bad_port_override_fails() {
        let mut config = Config::default();
        assert!(config
            .apply_env(|k| (k == "PORT").then(|| "seventy".to_string()))
            .is_err());
    }
}
