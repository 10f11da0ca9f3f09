use crate::usage::{self, UsageLimits};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub discord_token: String,
    /// Users that always resolve to the highest permission level.
    pub bot_masters: Vec<u64>,
    pub default_prefix: String,
    pub database_url: String,
    pub status_message: String,

    // Session / command cache settings
    pub session_ttl_secs: u64,
    pub command_cache_sweep_secs: u64,

    // Usage-limit settings
    pub usage_cache_capacity: usize,
    pub usage_purge_interval_secs: u64,
    pub usage_retention_secs: u64,
    /// Global per-command defaults, overridable per guild.
    pub usage_limits: HashMap<String, UsageLimits>,
}

const DEFAULT_PREFIX: &str = "!";
const LIMITS_FILE: &str = "usage_limits.toml";

/// One entry of `usage_limits.toml`, durations in humantime notation.
#[derive(Debug, Default, Deserialize)]
struct RawLimit {
    global_cooldown: Option<String>,
    local_cooldown: Option<String>,
    enabled: Option<bool>,
}

impl RawLimit {
    fn into_limits(self, command: &str, max_ms: i64) -> anyhow::Result<UsageLimits> {
        let parse = |value: Option<String>| -> anyhow::Result<Option<i64>> {
            value
                .map(|v| {
                    let duration = humantime::parse_duration(v.trim())
                        .map_err(|e| anyhow::anyhow!("Invalid cooldown for `{}`: {}", command, e))?;
                    usage::cooldown_millis(duration, max_ms)
                        .map_err(|e| anyhow::anyhow!("Invalid cooldown for `{}`: {}", command, e))
                })
                .transpose()
        };
        Ok(UsageLimits {
            global_cooldown_ms: parse(self.global_cooldown)?,
            local_cooldown_ms: parse(self.local_cooldown)?,
            enabled: self.enabled,
        })
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let usage_retention_secs: u64 = env::var("USAGE_RETENTION_SECS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse()
            .unwrap_or(604_800);
        let max_cooldown_ms = i64::try_from(usage_retention_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            bot_masters: env::var("BOT_MASTERS")
                .map(|raw| parse_id_list(&raw))
                .unwrap_or_default(),
            default_prefix: env::var("DEFAULT_PREFIX")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/warden.db".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Keeping watch".to_string()),
            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            command_cache_sweep_secs: env::var("COMMAND_CACHE_SWEEP_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            usage_cache_capacity: env::var("USAGE_CACHE_CAPACITY")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            usage_purge_interval_secs: env::var("USAGE_PURGE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            usage_retention_secs,
            usage_limits: Self::load_usage_limits(max_cooldown_ms)?,
        })
    }

    /// Cooldowns longer than `max_cooldown_ms` are rejected.
    pub fn load_usage_limits(max_cooldown_ms: i64) -> anyhow::Result<HashMap<String, UsageLimits>> {
        if let Ok(content) = fs::read_to_string(LIMITS_FILE) {
            return parse_limits_toml(&content, max_cooldown_ms);
        }

        // Fallback to env variable
        if let Ok(raw) = env::var("USAGE_LIMITS") {
            let parsed: HashMap<String, RawLimit> = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("USAGE_LIMITS is not valid JSON: {}", e))?;
            return convert_limits(parsed, max_cooldown_ms);
        }

        Ok(HashMap::new())
    }
}

fn parse_limits_toml(content: &str, max_ms: i64) -> anyhow::Result<HashMap<String, UsageLimits>> {
    #[derive(Deserialize)]
    struct LimitsWrapper {
        #[serde(default)]
        limits: HashMap<String, RawLimit>,
    }
    let wrapper: LimitsWrapper = toml::from_str(content)?;
    convert_limits(wrapper.limits, max_ms)
}

fn convert_limits(raw: HashMap<String, RawLimit>, max_ms: i64) -> anyhow::Result<HashMap<String, UsageLimits>> {
    raw.into_iter()
        .map(|(command, limit)| {
            let command = command.to_lowercase();
            let limits = limit.into_limits(&command, max_ms)?;
            Ok((command, limits))
        })
        .collect()
}

fn parse_id_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("bot_masters", &self.bot_masters)
            .field("default_prefix", &self.default_prefix)
            .field("database_url", &self.database_url)
            .field("status_message", &self.status_message)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("command_cache_sweep_secs", &self.command_cache_sweep_secs)
            .field("usage_cache_capacity", &self.usage_cache_capacity)
            .field("usage_purge_interval_secs", &self.usage_purge_interval_secs)
            .field("usage_retention_secs", &self.usage_retention_secs)
            .field("usage_limits", &self.usage_limits)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("DISCORD_TOKEN");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when required vars are missing");

        // 2. Test defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::set_var("BOT_MASTERS", "42, 7,not-a-number");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.bot_masters, vec![42, 7]);
        assert_eq!(config.default_prefix, "!");
        assert_eq!(config.session_ttl_secs, 300);

        // 3. Test debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("BOT_MASTERS");
    }

    const WEEK_MS: i64 = 604_800_000;

    #[test]
    fn test_parse_limits_toml() {
        let content = r#"
            [limits.Ping]
            local_cooldown = "10s"

            [limits.ban]
            global_cooldown = "1m"
            enabled = false
        "#;
        let limits = parse_limits_toml(content, WEEK_MS).unwrap();
        let ping = limits.get("ping").unwrap();
        assert_eq!(ping.local_cooldown_ms, Some(10_000));
        assert_eq!(ping.global_cooldown_ms, None);
        let ban = limits.get("ban").unwrap();
        assert_eq!(ban.global_cooldown_ms, Some(60_000));
        assert_eq!(ban.enabled, Some(false));
    }

    #[test]
    fn test_parse_limits_rejects_bad_duration() {
        let content = r#"
            [limits.ping]
            local_cooldown = "soon"
        "#;
        assert!(parse_limits_toml(content, WEEK_MS).is_err());
    }

    #[test]
    fn test_parse_limits_rejects_cooldown_beyond_retention() {
        let content = r#"
            [limits.ping]
            local_cooldown = "30days"
        "#;
        let err = parse_limits_toml(content, WEEK_MS).unwrap_err();
        assert!(err.to_string().contains("usage retention window"));

        let content = r#"
            [limits.ping]
            global_cooldown = "500000000y"
        "#;
        assert!(parse_limits_toml(content, i64::MAX).is_err());
    }
}
