use super::Database;
use crate::error::Result;
use crate::guild::{
    ChannelKind, CommandSettings, GuildChannels, GuildField, GuildRecord, MegalogFunction,
    MegalogSettings,
};
use crate::permissions::{Rank, Ranks};
use crate::usage::UsageLimits;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Every table holding rows owned by a guild, cleared when the bot leaves it.
pub const GUILD_OWNED_TABLES: [&str; 11] = [
    "guilds",
    "guild_ranks",
    "guild_commands",
    "guild_usage_limits",
    "guild_megalog",
    "guild_megalog_ignore",
    "cases",
    "log_entries",
    "timed_actions",
    "webhook_subscriptions",
    "command_caches",
];

impl Database {
    /// Returns true if the guild row was created.
    pub fn insert_guild(&self, guild_id: u64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO guilds (guild_id) VALUES (?1)",
            params![guild_id],
        )?;
        Ok(changed > 0)
    }

    /// Reads only the requested fields. Fields not requested stay unloaded in the result.
    pub fn load_guild_fields(&self, guild_id: u64, fields: &[GuildField]) -> Result<GuildRecord> {
        let conn = self.conn();
        let mut record = GuildRecord::default();

        for field in fields {
            match field {
                GuildField::Prefix => {
                    let prefix: Option<String> = conn
                        .query_row(
                            "SELECT prefix FROM guilds WHERE guild_id = ?1",
                            params![guild_id],
                            |row| row.get(0),
                        )
                        .optional()?
                        .flatten();
                    record.prefix = Some(prefix);
                }
                GuildField::Channels => {
                    let channels = conn
                        .query_row(
                            "SELECT log_channel, case_channel, modmail_channel FROM guilds WHERE guild_id = ?1",
                            params![guild_id],
                            |row| {
                                Ok(GuildChannels {
                                    log: row.get(0)?,
                                    case: row.get(1)?,
                                    modmail: row.get(2)?,
                                })
                            },
                        )
                        .optional()?;
                    record.channels = Some(channels.unwrap_or_default());
                }
                GuildField::Ranks => record.ranks = Some(load_ranks(&conn, guild_id)?),
                GuildField::Commands => record.commands = Some(load_commands(&conn, guild_id)?),
                GuildField::UsageLimits => {
                    record.usage_limits = Some(load_usage_limits(&conn, guild_id)?)
                }
                GuildField::Megalog => record.megalog = Some(load_megalog(&conn, guild_id)?),
            }
        }

        Ok(record)
    }

    pub fn set_guild_prefix(&self, guild_id: u64, prefix: Option<&str>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO guilds (guild_id, prefix) VALUES (?1, ?2)
             ON CONFLICT(guild_id) DO UPDATE SET prefix = excluded.prefix",
            params![guild_id, prefix],
        )?;
        Ok(())
    }

    pub fn set_guild_channel(&self, guild_id: u64, kind: ChannelKind, channel: Option<u64>) -> Result<()> {
        let conn = self.conn();
        let column = kind.column();
        conn.execute(
            &format!(
                "INSERT INTO guilds (guild_id, {column}) VALUES (?1, ?2)
                 ON CONFLICT(guild_id) DO UPDATE SET {column} = excluded.{column}"
            ),
            params![guild_id, channel],
        )?;
        Ok(())
    }

    pub fn add_rank_member(&self, guild_id: u64, rank: Rank, target_id: u64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO guild_ranks (guild_id, rank, target_id) VALUES (?1, ?2, ?3)",
            params![guild_id, rank.as_str(), target_id],
        )?;
        Ok(changed > 0)
    }

    pub fn remove_rank_member(&self, guild_id: u64, rank: Rank, target_id: u64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM guild_ranks WHERE guild_id = ?1 AND rank = ?2 AND target_id = ?3",
            params![guild_id, rank.as_str(), target_id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_command_settings(
        &self,
        guild_id: u64,
        command: &str,
        enabled: Option<bool>,
        data: &Value,
    ) -> Result<()> {
        let data = if data.is_null() {
            None
        } else {
            Some(serde_json::to_string(data)?)
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO guild_commands (guild_id, command, enabled, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(guild_id, command) DO UPDATE SET enabled = excluded.enabled, data = excluded.data",
            params![guild_id, command, enabled, data],
        )?;
        Ok(())
    }

    /// Updates only the enabled flag, keeping command-specific data.
    pub fn set_command_enabled(&self, guild_id: u64, command: &str, enabled: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO guild_commands (guild_id, command, enabled) VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, command) DO UPDATE SET enabled = excluded.enabled",
            params![guild_id, command, enabled],
        )?;
        Ok(())
    }

    pub fn set_usage_limit(&self, guild_id: u64, command: &str, limits: &UsageLimits) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO guild_usage_limits (guild_id, command, global_cooldown_ms, local_cooldown_ms, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(guild_id, command) DO UPDATE SET
                global_cooldown_ms = excluded.global_cooldown_ms,
                local_cooldown_ms = excluded.local_cooldown_ms,
                enabled = excluded.enabled",
            params![
                guild_id,
                command,
                limits.global_cooldown_ms,
                limits.local_cooldown_ms,
                limits.enabled
            ],
        )?;
        Ok(())
    }

    pub fn delete_usage_limit(&self, guild_id: u64, command: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM guild_usage_limits WHERE guild_id = ?1 AND command = ?2",
            params![guild_id, command],
        )?;
        Ok(changed > 0)
    }

    pub fn set_megalog_channel(&self, guild_id: u64, function: MegalogFunction, channel: u64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO guild_megalog (guild_id, function, channel_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, function) DO UPDATE SET channel_id = excluded.channel_id",
            params![guild_id, function.as_str(), channel],
        )?;
        Ok(())
    }

    pub fn delete_megalog_channel(&self, guild_id: u64, function: MegalogFunction) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM guild_megalog WHERE guild_id = ?1 AND function = ?2",
            params![guild_id, function.as_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn add_megalog_ignore(&self, guild_id: u64, channel: u64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO guild_megalog_ignore (guild_id, channel_id) VALUES (?1, ?2)",
            params![guild_id, channel],
        )?;
        Ok(changed > 0)
    }

    pub fn remove_megalog_ignore(&self, guild_id: u64, channel: u64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM guild_megalog_ignore WHERE guild_id = ?1 AND channel_id = ?2",
            params![guild_id, channel],
        )?;
        Ok(changed > 0)
    }

    /// `table` must come from [`GUILD_OWNED_TABLES`].
    pub fn delete_guild_rows(&self, table: &'static str, guild_id: u64) -> Result<usize> {
        let conn = self.conn();
        let count = conn.execute(
            &format!("DELETE FROM {} WHERE guild_id = ?1", table),
            params![guild_id],
        )?;
        Ok(count)
    }
}

fn load_ranks(conn: &Connection, guild_id: u64) -> Result<Ranks> {
    let mut stmt =
        conn.prepare("SELECT rank, target_id FROM guild_ranks WHERE guild_id = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map(params![guild_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
    })?;

    let mut ranks = Ranks::default();
    for row in rows {
        let (rank, target_id) = row?;
        match rank.parse::<Rank>() {
            Ok(rank) => {
                ranks.insert(rank, target_id);
            }
            Err(e) => warn!("Guild {}: skipping rank row: {}", guild_id, e),
        }
    }
    Ok(ranks)
}

fn load_commands(conn: &Connection, guild_id: u64) -> Result<HashMap<String, CommandSettings>> {
    let mut stmt =
        conn.prepare("SELECT command, enabled, data FROM guild_commands WHERE guild_id = ?1")?;
    let rows = stmt.query_map(params![guild_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<bool>>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut commands = HashMap::new();
    for row in rows {
        let (command, enabled, data) = row?;
        let data = match data {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Guild {}: discarding unreadable settings for {}: {}", guild_id, command, e);
                Value::Null
            }),
            None => Value::Null,
        };
        commands.insert(command, CommandSettings { enabled, data });
    }
    Ok(commands)
}

fn load_usage_limits(conn: &Connection, guild_id: u64) -> Result<HashMap<String, UsageLimits>> {
    let mut stmt = conn.prepare(
        "SELECT command, global_cooldown_ms, local_cooldown_ms, enabled
         FROM guild_usage_limits WHERE guild_id = ?1",
    )?;
    let rows = stmt.query_map(params![guild_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            UsageLimits {
                global_cooldown_ms: row.get(1)?,
                local_cooldown_ms: row.get(2)?,
                enabled: row.get(3)?,
            },
        ))
    })?;

    let mut limits = HashMap::new();
    for row in rows {
        let (command, limit) = row?;
        limits.insert(command, limit);
    }
    Ok(limits)
}

fn load_megalog(conn: &Connection, guild_id: u64) -> Result<MegalogSettings> {
    let mut settings = MegalogSettings::default();

    let mut stmt = conn.prepare("SELECT function, channel_id FROM guild_megalog WHERE guild_id = ?1")?;
    let rows = stmt.query_map(params![guild_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
    })?;
    for row in rows {
        let (function, channel) = row?;
        match function.parse::<MegalogFunction>() {
            Ok(function) => {
                settings.channels.insert(function, channel);
            }
            Err(e) => warn!("Guild {}: skipping megalog row: {}", guild_id, e),
        }
    }

    let mut stmt = conn.prepare(
        "SELECT channel_id FROM guild_megalog_ignore WHERE guild_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![guild_id], |row| row.get::<_, u64>(0))?;
    for row in rows {
        settings.ignored.push(row?);
    }

    Ok(settings)
}
