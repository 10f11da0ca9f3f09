//! Guild configuration store.
//!
//! Each guild is represented by a [`GuildHandle`] whose record is hydrated
//! field by field. Reading a field that has not been loaded is an error, not
//! an empty default. Mutators write the targeted column(s) first, then bump
//! the field's write generation and apply the same delta to the resident
//! record. A load discards and refetches any field written while it ran.

use crate::db::Database;
use crate::error::{BotError, Result};
use crate::permissions::{self, MemberIdentity, PermLevel, Rank, Ranks};
use crate::registry::CommandInfo;
use crate::usage::UsageLimits;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuildField {
    Prefix,
    Ranks,
    Commands,
    UsageLimits,
    Megalog,
    Channels,
}

impl GuildField {
    pub const ALL: [GuildField; 6] = [
        GuildField::Prefix,
        GuildField::Ranks,
        GuildField::Commands,
        GuildField::UsageLimits,
        GuildField::Megalog,
        GuildField::Channels,
    ];

    fn index(self) -> usize {
        match self {
            GuildField::Prefix => 0,
            GuildField::Ranks => 1,
            GuildField::Commands => 2,
            GuildField::UsageLimits => 3,
            GuildField::Megalog => 4,
            GuildField::Channels => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GuildField::Prefix => "prefix",
            GuildField::Ranks => "ranks",
            GuildField::Commands => "commands",
            GuildField::UsageLimits => "usageLimits",
            GuildField::Megalog => "megalog",
            GuildField::Channels => "channels",
        }
    }
}

impl fmt::Display for GuildField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-command override: explicit toggle plus command-specific data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSettings {
    pub enabled: Option<bool>,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MegalogFunction {
    MessageDelete,
    MessageEdit,
    MemberJoin,
    MemberLeave,
    RoleUpdate,
    ChannelUpdate,
    NicknameChange,
    Ban,
    Unban,
}

impl MegalogFunction {
    pub const ALL: [MegalogFunction; 9] = [
        MegalogFunction::MessageDelete,
        MegalogFunction::MessageEdit,
        MegalogFunction::MemberJoin,
        MegalogFunction::MemberLeave,
        MegalogFunction::RoleUpdate,
        MegalogFunction::ChannelUpdate,
        MegalogFunction::NicknameChange,
        MegalogFunction::Ban,
        MegalogFunction::Unban,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MegalogFunction::MessageDelete => "messageDelete",
            MegalogFunction::MessageEdit => "messageEdit",
            MegalogFunction::MemberJoin => "memberJoin",
            MegalogFunction::MemberLeave => "memberLeave",
            MegalogFunction::RoleUpdate => "roleUpdate",
            MegalogFunction::ChannelUpdate => "channelUpdate",
            MegalogFunction::NicknameChange => "nicknameChange",
            MegalogFunction::Ban => "ban",
            MegalogFunction::Unban => "unban",
        }
    }
}

impl FromStr for MegalogFunction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        MegalogFunction::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown megalog function `{}`", s))
    }
}

/// Event-type routing plus channels whose events are never logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MegalogSettings {
    pub channels: BTreeMap<MegalogFunction, u64>,
    pub ignored: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Log,
    Case,
    Modmail,
}

impl ChannelKind {
    pub fn column(self) -> &'static str {
        match self {
            ChannelKind::Log => "log_channel",
            ChannelKind::Case => "case_channel",
            ChannelKind::Modmail => "modmail_channel",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuildChannels {
    pub log: Option<u64>,
    pub case: Option<u64>,
    pub modmail: Option<u64>,
}

impl GuildChannels {
    pub fn get(&self, kind: ChannelKind) -> Option<u64> {
        match kind {
            ChannelKind::Log => self.log,
            ChannelKind::Case => self.case,
            ChannelKind::Modmail => self.modmail,
        }
    }

    fn set(&mut self, kind: ChannelKind, channel: Option<u64>) {
        match kind {
            ChannelKind::Log => self.log = channel,
            ChannelKind::Case => self.case = channel,
            ChannelKind::Modmail => self.modmail = channel,
        }
    }
}

/// Result of `toggle_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleResult {
    Applied,
    /// The command is not togglable; nothing was written.
    NotApplicable,
}

/// A partially hydrated guild configuration. `None` means "not loaded".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildRecord {
    pub prefix: Option<Option<String>>,
    pub ranks: Option<Ranks>,
    pub commands: Option<HashMap<String, CommandSettings>>,
    pub usage_limits: Option<HashMap<String, UsageLimits>>,
    pub megalog: Option<MegalogSettings>,
    pub channels: Option<GuildChannels>,
    /// Per-field count of persisted writes, indexed by `GuildField::index`.
    writes: [u64; GuildField::ALL.len()],
}

impl GuildRecord {
    pub fn is_loaded(&self, field: GuildField) -> bool {
        match field {
            GuildField::Prefix => self.prefix.is_some(),
            GuildField::Ranks => self.ranks.is_some(),
            GuildField::Commands => self.commands.is_some(),
            GuildField::UsageLimits => self.usage_limits.is_some(),
            GuildField::Megalog => self.megalog.is_some(),
            GuildField::Channels => self.channels.is_some(),
        }
    }

    /// Requested fields that are not resident, with their write generation.
    fn missing(&self, fields: &[GuildField]) -> Vec<(GuildField, u64)> {
        let mut missing: Vec<(GuildField, u64)> = Vec::new();
        for field in fields {
            if !self.is_loaded(*field) && !missing.iter().any(|(f, _)| f == field) {
                missing.push((*field, self.writes[field.index()]));
            }
        }
        missing
    }

    /// Records a persisted write to `field`.
    fn touch(&mut self, field: GuildField) {
        self.writes[field.index()] += 1;
    }

    /// Installs fetched fields that are still missing. Resident fields win, and
    /// a field written since `pending` was taken is returned as stale instead
    /// of being installed.
    fn fill_missing(&mut self, mut fetched: GuildRecord, pending: &[(GuildField, u64)]) -> Vec<GuildField> {
        let mut stale = Vec::new();
        for &(field, seen) in pending {
            if self.is_loaded(field) {
                continue;
            }
            if self.writes[field.index()] != seen {
                stale.push(field);
                continue;
            }
            match field {
                GuildField::Prefix => self.prefix = fetched.prefix.take(),
                GuildField::Ranks => self.ranks = fetched.ranks.take(),
                GuildField::Commands => self.commands = fetched.commands.take(),
                GuildField::UsageLimits => self.usage_limits = fetched.usage_limits.take(),
                GuildField::Megalog => self.megalog = fetched.megalog.take(),
                GuildField::Channels => self.channels = fetched.channels.take(),
            }
        }
        stale
    }
}

pub struct GuildHandle {
    guild_id: u64,
    db: Database,
    default_prefix: Arc<str>,
    record: Mutex<GuildRecord>,
}

impl GuildHandle {
    fn new(guild_id: u64, db: Database, default_prefix: Arc<str>) -> Self {
        Self {
            guild_id,
            db,
            default_prefix,
            record: Mutex::new(GuildRecord::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.guild_id
    }

    fn lock(&self) -> MutexGuard<'_, GuildRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_loaded(&self, field: GuildField) -> bool {
        self.lock().is_loaded(field)
    }

    /// Fetches the requested fields that are not yet resident. A field written
    /// while its fetch was in flight is fetched again.
    pub async fn load(&self, fields: &[GuildField]) -> Result<()> {
        let mut pending = self.lock().missing(fields);
        while !pending.is_empty() {
            debug!("Guild {}: loading fields {:?}", self.guild_id, pending);
            let guild_id = self.guild_id;
            let requested: Vec<GuildField> = pending.iter().map(|(field, _)| *field).collect();
            let fetched = self
                .db
                .run_blocking(move |db| db.load_guild_fields(guild_id, &requested))
                .await?;

            pending = {
                let mut record = self.lock();
                let stale = record.fill_missing(fetched, &pending);
                record.missing(&stale)
            };
        }
        Ok(())
    }

    fn read<T>(&self, field: GuildField, f: impl FnOnce(&GuildRecord) -> Option<T>) -> Result<T> {
        let record = self.lock();
        f(&record).ok_or_else(|| {
            warn!(
                guild_id = self.guild_id,
                field = %field,
                "Guild field read before it was loaded"
            );
            BotError::FieldNotLoaded(field)
        })
    }

    // --- Accessors ---

    /// The effective prefix: the guild's custom one, else the global default.
    pub fn prefix(&self) -> Result<String> {
        Ok(self
            .custom_prefix()?
            .unwrap_or_else(|| self.default_prefix.to_string()))
    }

    pub fn custom_prefix(&self) -> Result<Option<String>> {
        self.read(GuildField::Prefix, |r| r.prefix.clone())
    }

    pub fn ranks(&self) -> Result<Ranks> {
        self.read(GuildField::Ranks, |r| r.ranks.clone())
    }

    /// Bot masters and platform admins resolve here before `permissions::resolve`
    /// so their level does not depend on `Ranks` being loaded.
    pub fn perm_level(&self, member: &MemberIdentity<'_>, bot_masters: &[u64]) -> Result<PermLevel> {
        if bot_masters.contains(&member.user_id) {
            return Ok(PermLevel::BotMaster);
        }
        if member.is_platform_admin {
            return Ok(PermLevel::Admin);
        }
        let ranks = self.ranks()?;
        Ok(permissions::resolve(member, &ranks, bot_masters))
    }

    pub fn command_settings(&self, command: &str) -> Result<Option<CommandSettings>> {
        self.read(GuildField::Commands, |r| {
            r.commands.as_ref().map(|c| c.get(command).cloned())
        })
    }

    /// Commands are enabled unless explicitly disabled.
    pub fn command_is_enabled(&self, command: &str) -> Result<bool> {
        Ok(self
            .command_settings(command)?
            .map_or(true, |s| s.enabled != Some(false)))
    }

    /// Filters are disabled unless explicitly enabled.
    pub fn filter_is_enabled(&self, filter: &str) -> Result<bool> {
        Ok(self
            .command_settings(filter)?
            .map_or(false, |s| s.enabled == Some(true)))
    }

    pub fn usage_limit(&self, command: &str) -> Result<Option<UsageLimits>> {
        self.read(GuildField::UsageLimits, |r| {
            r.usage_limits.as_ref().map(|l| l.get(command).copied())
        })
    }

    pub fn megalog(&self) -> Result<MegalogSettings> {
        self.read(GuildField::Megalog, |r| r.megalog.clone())
    }

    /// Channel that should receive `function` events from `source_channel`, if any.
    pub fn megalog_target(&self, function: MegalogFunction, source_channel: u64) -> Result<Option<u64>> {
        let megalog = self.megalog()?;
        if megalog.ignored.contains(&source_channel) {
            return Ok(None);
        }
        Ok(megalog.channels.get(&function).copied())
    }

    pub fn channels(&self) -> Result<GuildChannels> {
        self.read(GuildField::Channels, |r| r.channels)
    }

    // --- Mutators ---

    pub async fn set_prefix(&self, prefix: Option<&str>) -> Result<()> {
        let prefix = prefix
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let guild_id = self.guild_id;
        let stored = prefix.clone();
        self.db
            .run_blocking(move |db| db.set_guild_prefix(guild_id, stored.as_deref()))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Prefix);
        record.prefix = Some(prefix);
        Ok(())
    }

    /// Returns false if `target_id` already held the rank.
    pub async fn add_to_rank(&self, rank: Rank, target_id: u64) -> Result<bool> {
        let guild_id = self.guild_id;
        let inserted = self
            .db
            .run_blocking(move |db| db.add_rank_member(guild_id, rank, target_id))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Ranks);
        if let Some(ranks) = record.ranks.as_mut() {
            ranks.insert(rank, target_id);
        }
        Ok(inserted)
    }

    pub async fn remove_from_rank(&self, rank: Rank, target_id: u64) -> Result<bool> {
        let guild_id = self.guild_id;
        let removed = self
            .db
            .run_blocking(move |db| db.remove_rank_member(guild_id, rank, target_id))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Ranks);
        if let Some(ranks) = record.ranks.as_mut() {
            ranks.remove(rank, target_id);
        }
        Ok(removed)
    }

    pub async fn set_command_settings(&self, command: &str, enabled: Option<bool>, data: Value) -> Result<()> {
        let guild_id = self.guild_id;
        let name = command.to_string();
        let stored = data.clone();
        self.db
            .run_blocking(move |db| db.set_command_settings(guild_id, &name, enabled, &stored))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Commands);
        if let Some(commands) = record.commands.as_mut() {
            commands.insert(command.to_string(), CommandSettings { enabled, data });
        }
        Ok(())
    }

    pub async fn toggle_command(&self, command: &CommandInfo, enabled: bool) -> Result<ToggleResult> {
        if !command.togglable {
            return Ok(ToggleResult::NotApplicable);
        }
        self.set_enabled_flag(command.name, enabled).await?;
        Ok(ToggleResult::Applied)
    }

    pub async fn set_filter_enabled(&self, filter: &str, enabled: bool) -> Result<()> {
        self.set_enabled_flag(filter, enabled).await
    }

    async fn set_enabled_flag(&self, name: &str, enabled: bool) -> Result<()> {
        let guild_id = self.guild_id;
        let stored = name.to_string();
        self.db
            .run_blocking(move |db| db.set_command_enabled(guild_id, &stored, enabled))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Commands);
        if let Some(commands) = record.commands.as_mut() {
            commands.entry(name.to_string()).or_default().enabled = Some(enabled);
        }
        Ok(())
    }

    pub async fn set_channel(&self, kind: ChannelKind, channel: Option<u64>) -> Result<()> {
        let guild_id = self.guild_id;
        self.db
            .run_blocking(move |db| db.set_guild_channel(guild_id, kind, channel))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Channels);
        if let Some(channels) = record.channels.as_mut() {
            channels.set(kind, channel);
        }
        Ok(())
    }

    pub async fn set_usage_limit(&self, command: &str, limits: UsageLimits) -> Result<()> {
        let guild_id = self.guild_id;
        let name = command.to_string();
        self.db
            .run_blocking(move |db| db.set_usage_limit(guild_id, &name, &limits))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::UsageLimits);
        if let Some(all) = record.usage_limits.as_mut() {
            all.insert(command.to_string(), limits);
        }
        Ok(())
    }

    pub async fn clear_usage_limit(&self, command: &str) -> Result<bool> {
        let guild_id = self.guild_id;
        let name = command.to_string();
        let removed = self
            .db
            .run_blocking(move |db| db.delete_usage_limit(guild_id, &name))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::UsageLimits);
        if let Some(all) = record.usage_limits.as_mut() {
            all.remove(command);
        }
        Ok(removed)
    }

    pub async fn set_megalog_channel(&self, function: MegalogFunction, channel: u64) -> Result<()> {
        let guild_id = self.guild_id;
        self.db
            .run_blocking(move |db| db.set_megalog_channel(guild_id, function, channel))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Megalog);
        if let Some(megalog) = record.megalog.as_mut() {
            megalog.channels.insert(function, channel);
        }
        Ok(())
    }

    pub async fn disable_megalog_function(&self, function: MegalogFunction) -> Result<bool> {
        let guild_id = self.guild_id;
        let removed = self
            .db
            .run_blocking(move |db| db.delete_megalog_channel(guild_id, function))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Megalog);
        if let Some(megalog) = record.megalog.as_mut() {
            megalog.channels.remove(&function);
        }
        Ok(removed)
    }

    pub async fn add_megalog_ignore(&self, channel: u64) -> Result<bool> {
        let guild_id = self.guild_id;
        let inserted = self
            .db
            .run_blocking(move |db| db.add_megalog_ignore(guild_id, channel))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Megalog);
        if let Some(megalog) = record.megalog.as_mut() {
            if !megalog.ignored.contains(&channel) {
                megalog.ignored.push(channel);
            }
        }
        Ok(inserted)
    }

    pub async fn remove_megalog_ignore(&self, channel: u64) -> Result<bool> {
        let guild_id = self.guild_id;
        let removed = self
            .db
            .run_blocking(move |db| db.remove_megalog_ignore(guild_id, channel))
            .await?;
        let mut record = self.lock();
        record.touch(GuildField::Megalog);
        if let Some(megalog) = record.megalog.as_mut() {
            megalog.ignored.retain(|c| *c != channel);
        }
        Ok(removed)
    }
}

/// Outcome of a best-effort guild removal cascade.
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub rows_deleted: usize,
    pub failed_tables: Vec<&'static str>,
}

pub struct GuildStore {
    db: Database,
    default_prefix: Arc<str>,
    guilds: Mutex<HashMap<u64, Arc<GuildHandle>>>,
}

impl GuildStore {
    pub fn new(db: Database, default_prefix: &str) -> Self {
        Self {
            db,
            default_prefix: Arc::from(default_prefix),
            guilds: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<GuildHandle>>> {
        self.guilds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached handle, creating an unloaded one if needed.
    pub fn get(&self, guild_id: u64) -> Arc<GuildHandle> {
        self.lock()
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(GuildHandle::new(
                    guild_id,
                    self.db.clone(),
                    self.default_prefix.clone(),
                ))
            })
            .clone()
    }

    pub async fn get_guild_wrapper(&self, guild_id: u64, fields: &[GuildField]) -> Result<Arc<GuildHandle>> {
        let handle = self.get(guild_id);
        handle.load(fields).await?;
        Ok(handle)
    }

    pub async fn add_guild(&self, guild_id: u64) -> Result<Arc<GuildHandle>> {
        let created = self
            .db
            .run_blocking(move |db| db.insert_guild(guild_id))
            .await?;
        if created {
            info!("Guild {} registered", guild_id);
        }
        Ok(self.get(guild_id))
    }

    /// Evicts the handle and deletes every record the guild owns.
    /// A failing table is logged and skipped; the remaining tables are still cleared.
    pub async fn remove_guild(&self, guild_id: u64) -> CascadeReport {
        self.lock().remove(&guild_id);

        let mut report = CascadeReport::default();
        for table in crate::db::guild::GUILD_OWNED_TABLES {
            match self
                .db
                .run_blocking(move |db| db.delete_guild_rows(table, guild_id))
                .await
            {
                Ok(count) => {
                    debug!("Guild {}: removed {} rows from {}", guild_id, count, table);
                    report.rows_deleted += count;
                }
                Err(e) => {
                    error!("Guild {}: failed to clear {}: {}", guild_id, table, e);
                    report.failed_tables.push(table);
                }
            }
        }
        info!(
            "Guild {} removed ({} rows deleted, {} failures)",
            guild_id,
            report.rows_deleted,
            report.failed_tables.len()
        );
        report
    }

    pub fn cached_count(&self) -> usize {
        self.lock().len()
    }
}
