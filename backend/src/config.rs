use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub api_key: String, // shared secret of all devices
    pub bind_addr: String,
    pub port: u16,
    pub frontend_origin: String,
    pub session_ttl_secs: i64,
    pub cookie_secure: bool,
}

fn required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(anyhow!("{name} must be set")),
    }
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: '{v}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let session_ttl_secs = parsed_or("LUMY_SESSION_TTL_SECS", 7 * 24 * 3600)?;
        if session_ttl_secs <= 0 {
            return Err(anyhow!("LUMY_SESSION_TTL_SECS must be positive"));
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            api_key: required("LUMY_API_KEY")?,
            bind_addr: env::var("LUMY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed_or("LUMY_PORT", 8081)?,
            frontend_origin: env::var("LUMY_FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            session_ttl_secs,
            cookie_secure: parsed_or("LUMY_COOKIE_SECURE", false)?,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            api_key: "test-device-key".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            frontend_origin: "http://127.0.0.1:8080".to_string(),
            session_ttl_secs: 3600,
            cookie_secure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // env vars are process-global; keep every mutation in this one test
    #[test]
    fn reads_environment() {
        env::set_var("DATABASE_URL", "lumy-test.db");
        env::set_var("LUMY_API_KEY", "secret");
        env::set_var("LUMY_PORT", "9000");
        env::remove_var("LUMY_SESSION_TTL_SECS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "lumy-test.db");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_ttl_secs, 7 * 24 * 3600);

        env::set_var("LUMY_PORT", "not-a-port");
        assert!(Config::from_env().is_err());

        env::set_var("LUMY_PORT", "9000");
        env::set_var("LUMY_API_KEY", "  ");
        assert!(Config::from_env().is_err());
    }
}
