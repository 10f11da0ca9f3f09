//! Moderation records owned by a guild: cases and log entries.

use super::Database;
use crate::error::Result;
use rusqlite::params;

impl Database {
    pub fn add_case(
        &self,
        guild_id: u64,
        action: &str,
        target_id: u64,
        moderator_id: u64,
        reason: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO cases (guild_id, action, target_id, moderator_id, reason)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![guild_id, action, target_id, moderator_id, reason],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_log_entry(&self, guild_id: u64, kind: &str, content: &str) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO log_entries (guild_id, kind, content) VALUES (?1, ?2, ?3)",
            params![guild_id, kind, content],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[cfg(test)]
    pub(crate) fn count_guild_rows(&self, table: &str, guild_id: u64) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE guild_id = ?1", table),
            params![guild_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
