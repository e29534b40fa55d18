//! Server configuration from flags and environment variables.
//!
//! `main` loads `.env` with dotenvy before parsing, so every field can come
//! from the shell, a `.env` file, or the command line.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;

use crate::auth::{AuthSettings, DEFAULT_BCRYPT_COST};

#[derive(Parser, Debug, Clone)]
#[command(name = "building_portal", version, about = "Residential building portal API", long_about = None)]
pub struct Config {
    /// Address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory of the sled database
    #[arg(long, env = "DB_PATH", default_value = "portal_data")]
    pub db_path: String,

    /// HMAC secret for session tokens
    #[arg(long, env = "JWT_KEY", hide_env_values = true)]
    pub jwt_key: String,

    /// `production` turns on Secure cookies
    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub app_env: String,

    #[arg(long, env = "BCRYPT_COST", default_value_t = DEFAULT_BCRYPT_COST)]
    pub bcrypt_cost: u32,

    /// Front-end origin allowed to send credentialed requests
    #[arg(long, env = "CORS_ORIGIN", default_value = "http://localhost:3000")]
    pub cors_origin: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write daily-rotated log files here
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            jwt_key: self.jwt_key.clone(),
            bcrypt_cost: self.bcrypt_cost,
            secure_cookies: self.is_production(),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {addr}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["building_portal"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--jwt-key",
            "k",
            "--port",
            "8080",
            "--app-env",
            "Production",
            "--log-format",
            "json",
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);

        let settings = config.auth_settings();
        assert!(settings.secure_cookies);
        assert_eq!(settings.jwt_key, "k");
    }

    #[test]
    fn test_development_cookies_not_secure() {
        let config = parse(&["--jwt-key", "k", "--app-env", "development"]);
        assert!(!config.auth_settings().secure_cookies);
    }

    #[test]
    fn test_bind_addr() {
        let config = parse(&["--jwt-key", "k", "--host", "127.0.0.1", "--port", "5001"]);
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:5001");

        let bad = parse(&["--jwt-key", "k", "--host", "not a host"]);
        assert!(bad.bind_addr().is_err());
    }
}
