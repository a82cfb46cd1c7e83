use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Longest accepted token lifetime: ten years.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 10;

/// Server settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("PARLEY_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into());
        if jwt_secret == DEV_JWT_SECRET {
            warn!("PARLEY_JWT_SECRET is not set, using the development secret");
        }

        Ok(Self {
            host: get("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: get("PARLEY_PORT")
                .unwrap_or_else(|| "5000".into())
                .parse()
                .context("PARLEY_PORT must be a port number")?,
            db_path: get("PARLEY_DB_PATH")
                .unwrap_or_else(|| "parley.db".into())
                .into(),
            jwt_secret,
            token_ttl_hours: parse_token_ttl(get("PARLEY_TOKEN_TTL_HOURS"))?,
            upload_dir: get("PARLEY_UPLOAD_DIR")
                .unwrap_or_else(|| "./uploads".into())
                .into(),
            max_upload_bytes: match get("PARLEY_MAX_UPLOAD_BYTES") {
                Some(v) => v
                    .parse()
                    .context("PARLEY_MAX_UPLOAD_BYTES must be a byte count")?,
                None => parley_chat::files::DEFAULT_MAX_UPLOAD_BYTES,
            },
        })
    }
}

fn parse_token_ttl(raw: Option<String>) -> anyhow::Result<i64> {
    let hours: i64 = raw
        .as_deref()
        .unwrap_or("720")
        .parse()
        .context("PARLEY_TOKEN_TTL_HOURS must be a whole number of hours")?;
    if !(1..=MAX_TOKEN_TTL_HOURS).contains(&hours) {
        anyhow::bail!(
            "PARLEY_TOKEN_TTL_HOURS must be between 1 and {}, got {}",
            MAX_TOKEN_TTL_HOURS,
            hours
        );
    }
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(config.token_ttl_hours, 720);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("PARLEY_PORT", "8080"),
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_MAX_UPLOAD_BYTES", "1024"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.max_upload_bytes, 1024);

        assert!(Config::from_lookup(lookup(&[("PARLEY_PORT", "http")])).is_err());
    }

    #[test]
    fn token_lifetime_must_be_positive_and_bounded() {
        for bad in ["0", "-5", "10000000000", "soon"] {
            assert!(
                Config::from_lookup(lookup(&[("PARLEY_TOKEN_TTL_HOURS", bad)])).is_err(),
                "{} was accepted",
                bad
            );
        }
        let config = Config::from_lookup(lookup(&[("PARLEY_TOKEN_TTL_HOURS", "87600")])).unwrap();
        assert_eq!(config.token_ttl_hours, MAX_TOKEN_TTL_HOURS);
    }
}
