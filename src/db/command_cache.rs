use super::Database;
use crate::error::Result;
use rusqlite::params;

/// Persisted form of a command cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCacheRow {
    pub channel_id: u64,
    pub user_id: u64,
    pub guild_id: Option<u64>,
    pub command: String,
    pub perm_level: i64,
    pub expires_at: i64,
    pub payload: String,
}

impl Database {
    pub fn upsert_command_cache(&self, row: &CommandCacheRow) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO command_caches (channel_id, user_id, guild_id, command, perm_level, expires_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(channel_id, user_id) DO UPDATE SET
                guild_id = excluded.guild_id,
                command = excluded.command,
                perm_level = excluded.perm_level,
                expires_at = excluded.expires_at,
                payload = excluded.payload",
            params![
                row.channel_id,
                row.user_id,
                row.guild_id,
                row.command,
                row.perm_level,
                row.expires_at,
                row.payload
            ],
        )?;
        Ok(())
    }

    pub fn delete_command_cache(&self, channel_id: u64, user_id: u64) -> Result<usize> {
        let conn = self.conn();
        let count = conn.execute(
            "DELETE FROM command_caches WHERE channel_id = ?1 AND user_id = ?2",
            params![channel_id, user_id],
        )?;
        Ok(count)
    }

    pub fn get_command_cache(&self, channel_id: u64, user_id: u64) -> Result<Option<CommandCacheRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, user_id, guild_id, command, perm_level, expires_at, payload
             FROM command_caches WHERE channel_id = ?1 AND user_id = ?2",
        )?;
        let mut rows = stmt.query(params![channel_id, user_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(read_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Rows whose expiration is still in the future.
    pub fn load_live_command_caches(&self, now: i64) -> Result<Vec<CommandCacheRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT channel_id, user_id, guild_id, command, perm_level, expires_at, payload
             FROM command_caches WHERE expires_at > ?1",
        )?;
        let rows = stmt.query_map(params![now], |row| read_row(row))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn delete_expired_command_caches(&self, now: i64) -> Result<usize> {
        let conn = self.conn();
        let count = conn.execute(
            "DELETE FROM command_caches WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(count)
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommandCacheRow> {
    Ok(CommandCacheRow {
        channel_id: row.get(0)?,
        user_id: row.get(1)?,
        guild_id: row.get(2)?,
        command: row.get(3)?,
        perm_level: row.get(4)?,
        expires_at: row.get(5)?,
        payload: row.get(6)?,
    })
}
