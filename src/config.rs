use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::audio::backend::MAX_VOLUME;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Registers commands on one guild while developing

    // Playback
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub max_search_results: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; `load` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .trim()
                .parse()
                .context("APPLICATION_ID must be a numeric id")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.trim().parse().ok()),

            default_volume: parse_or("DEFAULT_VOLUME", &lookup, defaults.default_volume)?,
            max_queue_size: parse_or("MAX_QUEUE_SIZE", &lookup, defaults.max_queue_size)?,
            max_search_results: parse_or(
                "MAX_SEARCH_RESULTS",
                &lookup,
                defaults.max_search_results,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The token must not be blank
    /// - Volume must be between 0 and 150
    /// - Queue and search limits must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.default_volume > MAX_VOLUME {
            anyhow::bail!(
                "Default volume must be between 0 and {}, got: {}",
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_search_results == 0 {
            anyhow::bail!("Max search results must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {}% vol, {} queue, {} search results",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.max_search_results,
        )
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        _ => Ok(default),
    }
}

/// Fallbacks for everything except the Discord credentials.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 100,
            max_queue_size: 1000,
            max_search_results: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config =
            Config::from_lookup(lookup(&[("DISCORD_TOKEN", "abc"), ("APPLICATION_ID", "42")]))
                .unwrap();

        assert_eq!(config.application_id, 42);
        assert_eq!(config.guild_id, None);
        assert_eq!(config.default_volume, 100);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.max_search_results, 5);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("APPLICATION_ID", "42"),
            ("GUILD_ID", "7"),
            ("DEFAULT_VOLUME", "80"),
            ("MAX_QUEUE_SIZE", " 25 "),
            ("MAX_SEARCH_RESULTS", ""),
        ]))
        .unwrap();

        assert_eq!(config.guild_id, Some(7));
        assert_eq!(config.default_volume, 80);
        assert_eq!(config.max_queue_size, 25);
        assert_eq!(config.max_search_results, 5);
    }

    #[test]
    fn test_missing_token_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("APPLICATION_ID", "42")])).is_err());
        assert!(
            Config::from_lookup(lookup(&[("DISCORD_TOKEN", "  "), ("APPLICATION_ID", "42")]))
                .is_err()
        );
    }

    #[test]
    fn test_validate_limits() {
        let base = Config {
            discord_token: "abc".to_string(),
            ..Config::default()
        };
        assert!(base.validate().is_ok());

        let loud = Config {
            default_volume: 151,
            ..base.clone()
        };
        assert!(loud.validate().is_err());

        let empty_queue = Config {
            max_queue_size: 0,
            ..base.clone()
        };
        assert!(empty_queue.validate().is_err());

        let no_results = Config {
            max_search_results: 0,
            ..base
        };
        assert!(no_results.validate().is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            application_id: 42,
            ..Config::default()
        };
        let summary = config.summary();
        assert!(summary.contains("App ID 42"));
        assert!(summary.contains("Guild: global"));
        assert!(!summary.contains("super-secret"));
    }
}
