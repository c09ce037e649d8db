use anyhow::Context;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

use crate::catalog::carousel::DEFAULT_ROTATION_MS;
use crate::catalog::views::SEARCH_RESULT_LIMIT;

pub struct Settings {
    pub host: String,
    pub port: u16,
    pub firebase_database_url: Option<String>,
    pub firebase_auth: Option<SecretString>,
    pub firebase_timeout: Duration,
    pub videos_path: String,
    pub secret_token: SecretString,
    pub hero_rotation: Duration,
    pub search_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            firebase_database_url: None,
            firebase_auth: None,
            firebase_timeout: Duration::from_secs(10),
            videos_path: "videos".to_string(),
            secret_token: SecretString::new(String::new()),
            hero_rotation: Duration::from_millis(DEFAULT_ROTATION_MS),
            search_window: SEARCH_RESULT_LIMIT,
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secret_token = non_empty("SECRET_TOKEN").context("SECRET_TOKEN env var not set")?;

        Ok(Self {
            host: non_empty("MOJIFLIX_HOST").unwrap_or(defaults.host),
            port: parse_or("MOJIFLIX_PORT", non_empty("MOJIFLIX_PORT"), defaults.port)?,
            firebase_database_url: non_empty("FIREBASE_DATABASE_URL"),
            firebase_auth: non_empty("FIREBASE_AUTH").map(SecretString::new),
            firebase_timeout: Duration::from_secs(parse_or(
                "FIREBASE_TIMEOUT_SECS",
                non_empty("FIREBASE_TIMEOUT_SECS"),
                defaults.firebase_timeout.as_secs(),
            )?),
            videos_path: non_empty("VIDEOS_PATH").unwrap_or(defaults.videos_path),
            secret_token: SecretString::new(secret_token),
            hero_rotation: Duration::from_millis(parse_or(
                "HERO_ROTATION_MS",
                non_empty("HERO_ROTATION_MS"),
                DEFAULT_ROTATION_MS,
            )?),
            search_window: parse_or(
                "SEARCH_WINDOW",
                non_empty("SEARCH_WINDOW"),
                defaults.search_window,
            )?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, raw)),
        None => Ok(default),
    }
}
