//! Command caches: short-lived state for multi-turn commands.
//!
//! At most one cache exists per (channel, user). Live caches are indexed in
//! memory under `"{channel_id} {user_id}"` so the dispatcher never queries the
//! database on the hot path. A removed handle stays in the index until the
//! next lookup or sweep drops it.

use crate::clock::Clock;
use crate::db::command_cache::CommandCacheRow;
use crate::db::Database;
use crate::error::{BotError, Result};
use crate::permissions::PermLevel;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handler-defined state. Each command documents and validates its own keys.
pub type CachePayload = serde_json::Map<String, Value>;

struct CacheState {
    payload: CachePayload,
    expires_at: i64,
    removed: bool,
}

pub struct CommandCache {
    channel_id: u64,
    user_id: u64,
    guild_id: Option<u64>,
    command: String,
    perm_level: PermLevel,
    db: Database,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl CommandCache {
    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn guild_id(&self) -> Option<u64> {
        self.guild_id
    }

    /// Name of the command that opened this cache.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Permission level resolved when the cache was created.
    pub fn perm_level(&self) -> PermLevel {
        self.perm_level
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn payload(&self) -> CachePayload {
        self.lock().payload.clone()
    }

    pub fn set_payload(&self, payload: CachePayload) {
        self.lock().payload = payload;
    }

    /// Reads `key`, returning `None` if it is missing or has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().payload.get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.lock().payload.insert(key.to_string(), value);
        Ok(())
    }

    pub fn expires_at(&self) -> i64 {
        self.lock().expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.clock.now_millis() >= self.lock().expires_at
    }

    pub fn is_removed(&self) -> bool {
        self.lock().removed
    }

    fn mark_removed(&self) {
        self.lock().removed = true;
    }

    fn to_row(&self) -> Result<CommandCacheRow> {
        let state = self.lock();
        Ok(CommandCacheRow {
            channel_id: self.channel_id,
            user_id: self.user_id,
            guild_id: self.guild_id,
            command: self.command.clone(),
            perm_level: self.perm_level.as_i64(),
            expires_at: state.expires_at,
            payload: serde_json::to_string(&state.payload)?,
        })
    }

    /// Persists the payload, optionally pushing the expiration to now + `extend`.
    /// Saving a removed cache does nothing.
    pub async fn save(&self, extend: Option<Duration>) -> Result<()> {
        if let Some(extend) = extend {
            let extend_ms = i64::try_from(extend.as_millis()).unwrap_or(i64::MAX);
            self.lock().expires_at = self.clock.now_millis().saturating_add(extend_ms);
        }
        if self.is_removed() {
            debug!(
                "Command cache {} {} already removed; save skipped",
                self.channel_id, self.user_id
            );
            return Ok(());
        }
        let row = self.to_row()?;
        self.db
            .run_blocking(move |db| db.upsert_command_cache(&row))
            .await
    }

    /// Deletes the persisted record. The index entry heals on the next lookup.
    /// If the delete fails the handle stays live, so the row is never orphaned
    /// behind a removed handle.
    pub async fn remove(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.removed {
                return Ok(());
            }
            state.removed = true;
        }
        let (channel_id, user_id) = (self.channel_id, self.user_id);
        let deleted = self
            .db
            .run_blocking(move |db| db.delete_command_cache(channel_id, user_id))
            .await;
        if let Err(e) = deleted {
            warn!(
                "Command cache {} {}: delete failed, keeping it live: {}",
                channel_id, user_id, e
            );
            self.lock().removed = false;
            return Err(e);
        }
        Ok(())
    }
}

/// Everything needed to open a new command cache.
#[derive(Debug, Clone)]
pub struct NewCommandCache {
    pub channel_id: u64,
    pub user_id: u64,
    pub guild_id: Option<u64>,
    pub command: String,
    pub perm_level: PermLevel,
    pub expires_at: i64,
    pub payload: CachePayload,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub index_evicted: usize,
    pub rows_deleted: usize,
}

pub struct SessionStore {
    db: Database,
    clock: Arc<dyn Clock>,
    index: Mutex<HashMap<String, Arc<CommandCache>>>,
}

impl SessionStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(channel_id: u64, user_id: u64) -> String {
        format!("{} {}", channel_id, user_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CommandCache>>> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self, new: NewCommandCache) -> Arc<CommandCache> {
        Arc::new(CommandCache {
            channel_id: new.channel_id,
            user_id: new.user_id,
            guild_id: new.guild_id,
            command: new.command,
            perm_level: new.perm_level,
            db: self.db.clone(),
            clock: self.clock.clone(),
            state: Mutex::new(CacheState {
                payload: new.payload,
                expires_at: new.expires_at,
                removed: false,
            }),
        })
    }

    /// Opens a cache. Fails if a live one exists for the key unless `overwrite` is set,
    /// in which case the previous handle is marked removed.
    pub async fn create(&self, new: NewCommandCache, overwrite: bool) -> Result<Arc<CommandCache>> {
        let key = Self::key(new.channel_id, new.user_id);
        if !overwrite {
            if let Some(existing) = self.find(new.channel_id, new.user_id) {
                return Err(BotError::SessionExists {
                    channel_id: existing.channel_id,
                    user_id: existing.user_id,
                });
            }
        }

        let cache = self.handle(new);
        let row = cache.to_row()?;
        self.db
            .run_blocking(move |db| db.upsert_command_cache(&row))
            .await?;

        if let Some(previous) = self.lock().insert(key, cache.clone()) {
            previous.mark_removed();
        }
        debug!(
            "Command cache opened for {} in channel {} ({})",
            cache.user_id, cache.channel_id, cache.command
        );
        Ok(cache)
    }

    /// The live cache for (channel, user), if any. Removed or expired entries are dropped.
    pub fn find(&self, channel_id: u64, user_id: u64) -> Option<Arc<CommandCache>> {
        let key = Self::key(channel_id, user_id);
        let mut index = self.lock();
        let cache = index.get(&key)?.clone();
        if cache.is_removed() || cache.is_expired() {
            index.remove(&key);
            return None;
        }
        Some(cache)
    }

    /// Loads unexpired caches from the database into the index.
    pub async fn restore(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let rows = self
            .db
            .run_blocking(move |db| db.load_live_command_caches(now))
            .await?;

        let mut restored = 0;
        for row in rows {
            let Some(perm_level) = PermLevel::from_i64(row.perm_level) else {
                warn!(
                    "Skipping command cache {} {}: unknown permission level {}",
                    row.channel_id, row.user_id, row.perm_level
                );
                continue;
            };
            let payload = match serde_json::from_str::<CachePayload>(&row.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        "Skipping command cache {} {}: unreadable payload: {}",
                        row.channel_id, row.user_id, e
                    );
                    continue;
                }
            };
            let key = Self::key(row.channel_id, row.user_id);
            let cache = self.handle(NewCommandCache {
                channel_id: row.channel_id,
                user_id: row.user_id,
                guild_id: row.guild_id,
                command: row.command,
                perm_level,
                expires_at: row.expires_at,
                payload,
            });
            self.lock().insert(key, cache);
            restored += 1;
        }
        info!("Restored {} command caches", restored);
        Ok(restored)
    }

    /// Drops expired entries from the index and deletes expired rows. Safe to repeat.
    pub async fn clean_command_caches(&self) -> Result<SweepReport> {
        let now = self.clock.now_millis();
        let index_evicted = {
            let mut index = self.lock();
            let before = index.len();
            index.retain(|_, cache| {
                let dead = cache.is_removed() || cache.expires_at() <= now;
                if dead {
                    cache.mark_removed();
                }
                !dead
            });
            before - index.len()
        };
        let rows_deleted = self
            .db
            .run_blocking(move |db| db.delete_expired_command_caches(now))
            .await?;
        Ok(SweepReport {
            index_evicted,
            rows_deleted,
        })
    }

    /// Drops every indexed cache opened in `guild_id`. Rows are removed by the guild cascade.
    pub fn forget_guild(&self, guild_id: u64) -> usize {
        let mut index = self.lock();
        let before = index.len();
        index.retain(|_, cache| {
            let owned = cache.guild_id == Some(guild_id);
            if owned {
                cache.mark_removed();
            }
            !owned
        });
        before - index.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
