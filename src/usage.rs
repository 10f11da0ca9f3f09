//! Usage limits and cooldowns.
//!
//! Limits are merged field by field: the command's declared cooldowns, then
//! the global table from configuration, then the guild override. Last-used
//! timestamps are tracked per user, per scope (guild, dm, or global).

use crate::cache::RecordCache;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{BotError, Result};
use crate::guild::GuildHandle;
use crate::registry::CommandInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

pub const DM_SCOPE: &str = "dm";
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub global_cooldown_ms: Option<i64>,
    pub local_cooldown_ms: Option<i64>,
    pub enabled: Option<bool>,
}

impl UsageLimits {
    pub fn from_command(info: &CommandInfo) -> Self {
        Self {
            global_cooldown_ms: info.global_cooldown.map(saturating_millis),
            local_cooldown_ms: info.local_cooldown.map(saturating_millis),
            enabled: None,
        }
    }

    /// Fields present in `over` win; everything else is inherited from `self`.
    pub fn merge(&self, over: &UsageLimits) -> UsageLimits {
        UsageLimits {
            global_cooldown_ms: over.global_cooldown_ms.or(self.global_cooldown_ms),
            local_cooldown_ms: over.local_cooldown_ms.or(self.local_cooldown_ms),
            enabled: over.enabled.or(self.enabled),
        }
    }

    pub fn has_cooldown(&self) -> bool {
        self.global_cooldown_ms.is_some() || self.local_cooldown_ms.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == UsageLimits::default()
    }
}

fn saturating_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Converts a configured cooldown to millis. A cooldown may not outlast the
/// usage retention window `max_ms`: the purge would forget a use that is still
/// cooling down.
pub fn cooldown_millis(duration: Duration, max_ms: i64) -> Result<i64> {
    match i64::try_from(duration.as_millis()) {
        Ok(ms) if ms <= max_ms => Ok(ms),
        _ => Err(BotError::CooldownTooLong {
            requested: humantime::format_duration(duration).to_string(),
            limit: humantime::format_duration(Duration::from_millis(max_ms.max(0) as u64)).to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Guild(u64),
    Dm,
    Global,
}

impl Scope {
    pub fn for_guild(guild_id: Option<u64>) -> Scope {
        guild_id.map_or(Scope::Dm, Scope::Guild)
    }

    pub fn key(&self) -> String {
        match self {
            Scope::Guild(id) => id.to_string(),
            Scope::Dm => DM_SCOPE.to_string(),
            Scope::Global => GLOBAL_SCOPE.to_string(),
        }
    }
}

/// scope key -> command -> last-used millis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    scopes: HashMap<String, HashMap<String, i64>>,
}

impl UsageRecord {
    pub fn last_used(&self, scope: Scope, command: &str) -> Option<i64> {
        self.scopes
            .get(&scope.key())
            .and_then(|commands| commands.get(command))
            .copied()
    }

    pub(crate) fn insert_raw(&mut self, scope_key: String, command: String, timestamp: i64) {
        self.scopes.entry(scope_key).or_default().insert(command, timestamp);
    }

    /// Sets `scope` and, unless it already is global, the global scope too.
    pub fn set(&mut self, scope: Scope, command: &str, timestamp: i64) {
        self.insert_raw(scope.key(), command.to_string(), timestamp);
        if scope != Scope::Global {
            self.insert_raw(GLOBAL_SCOPE.to_string(), command.to_string(), timestamp);
        }
    }

    pub fn prune_before(&mut self, cutoff: i64) {
        for commands in self.scopes.values_mut() {
            commands.retain(|_, ts| *ts >= cutoff);
        }
        self.scopes.retain(|_, commands| !commands.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Whether `command` may run now in `scope` under `limits`.
pub fn can_use(record: &UsageRecord, scope: Scope, command: &str, limits: &UsageLimits, now: i64) -> bool {
    if limits.enabled == Some(false) {
        return false;
    }
    if let Some(local) = limits.local_cooldown_ms {
        if let Some(last) = record.last_used(scope, command) {
            if now < last.saturating_add(local) {
                return false;
            }
        }
    }
    if let Some(global) = limits.global_cooldown_ms {
        if let Some(last) = record.last_used(Scope::Global, command) {
            if now < last.saturating_add(global) {
                return false;
            }
        }
    }
    true
}

/// A loaded user usage record.
pub struct UserUsage {
    user_id: u64,
    record: Mutex<UsageRecord>,
}

impl UserUsage {
    fn new(user_id: u64, record: UsageRecord) -> Self {
        Self {
            user_id,
            record: Mutex::new(record),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    fn lock(&self) -> MutexGuard<'_, UsageRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_used(&self, scope: Scope, command: &str) -> Option<i64> {
        self.lock().last_used(scope, command)
    }

    pub fn snapshot(&self) -> UsageRecord {
        self.lock().clone()
    }
}

pub struct UsageStore {
    db: Database,
    clock: Arc<dyn Clock>,
    defaults: HashMap<String, UsageLimits>,
    retention_ms: i64,
    cache: RecordCache<u64, Arc<UserUsage>>,
}

impl UsageStore {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        defaults: HashMap<String, UsageLimits>,
        capacity: usize,
        retention_secs: u64,
    ) -> Self {
        Self {
            db,
            clock,
            defaults,
            retention_ms: (retention_secs as i64).saturating_mul(1000),
            cache: RecordCache::new(capacity),
        }
    }

    /// Upper bound for any configurable cooldown.
    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    /// Declared cooldowns, then the global table, then the guild override.
    /// The guild handle must have `UsageLimits` loaded.
    pub fn effective_limits(&self, info: &CommandInfo, guild: Option<&GuildHandle>) -> Result<UsageLimits> {
        let mut limits = UsageLimits::from_command(info);
        if let Some(global) = self.defaults.get(info.name) {
            limits = limits.merge(global);
        }
        if let Some(guild) = guild {
            if let Some(over) = guild.usage_limit(info.name)? {
                limits = limits.merge(&over);
            }
        }
        Ok(limits)
    }

    pub async fn load(&self, user_id: u64) -> Result<Arc<UserUsage>> {
        if let Some(usage) = self.cache.get(&user_id) {
            return Ok(usage);
        }
        let record = self
            .db
            .run_blocking(move |db| db.load_user_usage(user_id))
            .await?;
        Ok(self
            .cache
            .insert_if_absent(user_id, Arc::new(UserUsage::new(user_id, record))))
    }

    pub fn can_use(&self, usage: &UserUsage, scope: Scope, command: &str, limits: &UsageLimits) -> bool {
        can_use(&usage.lock(), scope, command, limits, self.clock.now_millis())
    }

    pub async fn record_use(&self, usage: &UserUsage, scope: Scope, command: &str, timestamp: i64) -> Result<()> {
        let user_id = usage.user_id;
        let name = command.to_string();
        self.db
            .run_blocking(move |db| db.record_user_usage(user_id, scope, &name, timestamp))
            .await?;
        usage.lock().set(scope, command, timestamp);
        Ok(())
    }

    /// Deletes entries older than the retention window and evicts records left empty.
    pub async fn purge_stale(&self) -> Result<usize> {
        let cutoff = self.clock.now_millis() - self.retention_ms;
        let deleted = self
            .db
            .run_blocking(move |db| db.delete_usage_before(cutoff))
            .await?;
        let evicted = self.cache.evict_where(|_, usage| {
            let mut record = usage.lock();
            record.prune_before(cutoff);
            record.is_empty()
        });
        debug!("Usage purge: {} rows deleted, {} cached records evicted", deleted, evicted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::guild::{GuildField, GuildStore};

    static PING: CommandInfo = CommandInfo::new("ping", "utility").local_cooldown(Duration::from_secs(10));

    fn store(clock: &MockClock, defaults: HashMap<String, UsageLimits>) -> UsageStore {
        UsageStore::new(
            Database::open_in_memory().unwrap(),
            Arc::new(clock.clone()),
            defaults,
            16,
            3600,
        )
    }

    #[test]
    fn test_merge_is_per_field() {
        let base = UsageLimits {
            global_cooldown_ms: Some(5_000),
            local_cooldown_ms: Some(1_000),
            enabled: None,
        };
        let over = UsageLimits {
            local_cooldown_ms: Some(30_000),
            ..Default::default()
        };
        let merged = base.merge(&over);
        assert_eq!(merged.global_cooldown_ms, Some(5_000));
        assert_eq!(merged.local_cooldown_ms, Some(30_000));
        // Absent in both sources stays absent
        assert_eq!(merged.enabled, None);
    }

    #[test]
    fn test_set_also_sets_global() {
        let mut record = UsageRecord::default();
        record.set(Scope::Guild(7), "ping", 1_000);
        assert_eq!(record.last_used(Scope::Guild(7), "ping"), Some(1_000));
        assert_eq!(record.last_used(Scope::Global, "ping"), Some(1_000));

        // Overwrite, not max-taking
        record.set(Scope::Dm, "ping", 500);
        assert_eq!(record.last_used(Scope::Global, "ping"), Some(500));
        assert_eq!(record.last_used(Scope::Guild(7), "ping"), Some(1_000));
    }

    #[test]
    fn test_can_use_rules() {
        let mut record = UsageRecord::default();
        record.set(Scope::Guild(1), "ping", 10_000);

        let local = UsageLimits {
            local_cooldown_ms: Some(10_000),
            ..Default::default()
        };
        assert!(!can_use(&record, Scope::Guild(1), "ping", &local, 15_000));
        assert!(can_use(&record, Scope::Guild(1), "ping", &local, 20_000));
        // Local cooldown does not cross scopes
        assert!(can_use(&record, Scope::Guild(2), "ping", &local, 15_000));

        let global = UsageLimits {
            global_cooldown_ms: Some(10_000),
            ..Default::default()
        };
        assert!(!can_use(&record, Scope::Guild(2), "ping", &global, 15_000));

        let disabled = UsageLimits {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(!can_use(&UsageRecord::default(), Scope::Dm, "ping", &disabled, 0));
    }

    #[test]
    fn test_huge_cooldown_does_not_overflow() {
        let mut record = UsageRecord::default();
        record.set(Scope::Guild(1), "ping", 1_700_000_000_000);
        let limits = UsageLimits {
            local_cooldown_ms: Some(i64::MAX - 1),
            global_cooldown_ms: Some(i64::MAX),
            enabled: None,
        };
        assert!(!can_use(&record, Scope::Guild(1), "ping", &limits, 1_700_000_001_000));
        assert!(!can_use(&record, Scope::Guild(2), "ping", &limits, i64::MAX - 1));
    }

    #[test]
    fn test_cooldown_millis_bounds() {
        let week_ms = 7 * 24 * 3600 * 1000;
        assert_eq!(cooldown_millis(Duration::from_secs(30), week_ms).unwrap(), 30_000);
        assert_eq!(cooldown_millis(Duration::from_millis(week_ms as u64), week_ms).unwrap(), week_ms);
        assert!(matches!(
            cooldown_millis(Duration::from_secs(30 * 24 * 3600), week_ms),
            Err(BotError::CooldownTooLong { .. })
        ));
        // Too large for i64 millis
        assert!(cooldown_millis(Duration::from_secs(u64::MAX), i64::MAX).is_err());
        assert_eq!(
            UsageLimits::from_command(&CommandInfo::new("x", "y").local_cooldown(Duration::MAX)).local_cooldown_ms,
            Some(i64::MAX)
        );
    }

    #[tokio::test]
    async fn test_effective_limits_layering() {
        let clock = MockClock::default();
        let mut defaults = HashMap::new();
        defaults.insert(
            "ping".to_string(),
            UsageLimits {
                global_cooldown_ms: Some(2_000),
                ..Default::default()
            },
        );
        let usage = store(&clock, defaults);

        let without_guild = usage.effective_limits(&PING, None).unwrap();
        assert_eq!(without_guild.local_cooldown_ms, Some(10_000));
        assert_eq!(without_guild.global_cooldown_ms, Some(2_000));

        let guilds = GuildStore::new(Database::open_in_memory().unwrap(), "!");
        let guild = guilds.get_guild_wrapper(1, &[GuildField::UsageLimits]).await.unwrap();
        guild
            .set_usage_limit(
                "ping",
                UsageLimits {
                    local_cooldown_ms: Some(60_000),
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let with_guild = usage.effective_limits(&PING, Some(&guild)).unwrap();
        assert_eq!(with_guild.local_cooldown_ms, Some(60_000));
        assert_eq!(with_guild.global_cooldown_ms, Some(2_000));
        assert_eq!(with_guild.enabled, Some(true));
    }

    #[tokio::test]
    async fn test_record_use_persists_and_survives_reload() {
        let clock = MockClock::default();
        let db = Database::open_in_memory().unwrap();
        let usage = UsageStore::new(db.clone(), Arc::new(clock.clone()), HashMap::new(), 16, 3600);

        let user = usage.load(42).await.unwrap();
        let now = clock.now_millis();
        usage.record_use(&user, Scope::Guild(9), "ping", now).await.unwrap();

        let persisted = db.load_user_usage(42).unwrap();
        assert_eq!(persisted.last_used(Scope::Guild(9), "ping"), Some(now));
        assert_eq!(persisted.last_used(Scope::Global, "ping"), Some(now));
        assert_eq!(user.snapshot(), persisted);

        // Cached handle is reused
        let again = usage.load(42).await.unwrap();
        assert!(Arc::ptr_eq(&user, &again));
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let clock = MockClock::default();
        let usage = store(&clock, HashMap::new());
        let limits = usage.effective_limits(&PING, None).unwrap();
        let user = usage.load(1).await.unwrap();

        assert!(usage.can_use(&user, Scope::Guild(5), "ping", &limits));
        usage
            .record_use(&user, Scope::Guild(5), "ping", clock.now_millis())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(!usage.can_use(&user, Scope::Guild(5), "ping", &limits));
        clock.advance(Duration::from_secs(6));
        assert!(usage.can_use(&user, Scope::Guild(5), "ping", &limits));
    }

    #[tokio::test]
    async fn test_purge_stale_entries() {
        let clock = MockClock::default();
        let usage = store(&clock, HashMap::new());
        let user = usage.load(1).await.unwrap();
        usage
            .record_use(&user, Scope::Dm, "ping", clock.now_millis())
            .await
            .unwrap();

        assert_eq!(usage.purge_stale().await.unwrap(), 0);
        clock.advance(Duration::from_secs(7200));
        assert_eq!(usage.purge_stale().await.unwrap(), 2);
        // Second pass has nothing left to do
        assert_eq!(usage.purge_stale().await.unwrap(), 0);

        let reloaded = usage.load(1).await.unwrap();
        assert!(!Arc::ptr_eq(&user, &reloaded));
        assert!(reloaded.snapshot().is_empty());
    }
}
