use super::Database;
use crate::error::Result;
use crate::usage::{Scope, UsageRecord, GLOBAL_SCOPE};
use rusqlite::params;

impl Database {
    pub fn load_user_usage(&self, user_id: u64) -> Result<UsageRecord> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT scope, command, last_used FROM user_usage WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut record = UsageRecord::default();
        for row in rows {
            let (scope, command, last_used) = row?;
            record.insert_raw(scope, command, last_used);
        }
        Ok(record)
    }

    /// Writes `scope` and the global scope in one transaction.
    pub fn record_user_usage(&self, user_id: u64, scope: Scope, command: &str, timestamp: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let upsert = "INSERT INTO user_usage (user_id, scope, command, last_used) VALUES (?1, ?2, ?3, ?4)
                      ON CONFLICT(user_id, scope, command) DO UPDATE SET last_used = excluded.last_used";
        tx.execute(upsert, params![user_id, scope.key(), command, timestamp])?;
        if scope != Scope::Global {
            tx.execute(upsert, params![user_id, GLOBAL_SCOPE, command, timestamp])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_usage_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn();
        let count = conn.execute("DELETE FROM user_usage WHERE last_used < ?1", params![cutoff])?;
        Ok(count)
    }
}
