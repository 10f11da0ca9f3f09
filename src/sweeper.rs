use crate::Data;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Periodically reaps expired command caches.
pub async fn start_session_sweep(data: Arc<Data>) {
    let period = Duration::from_secs(data.config.command_cache_sweep_secs.max(1));
    info!("Starting command cache sweep every {:?}", period);
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        sweep_sessions(&data).await;
    }
}

pub async fn sweep_sessions(data: &Data) {
    match data.sessions.clean_command_caches().await {
        Ok(report) if report.index_evicted > 0 || report.rows_deleted > 0 => {
            debug!(
                "Command cache sweep: {} evicted, {} rows deleted",
                report.index_evicted, report.rows_deleted
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Command cache sweep error: {}", e),
    }
}

/// Periodically drops usage entries older than the retention window.
pub async fn start_usage_purge(data: Arc<Data>) {
    let period = Duration::from_secs(data.config.usage_purge_interval_secs.max(1));
    info!("Starting usage purge every {:?}", period);
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        if let Err(e) = data.usage.purge_stale().await {
            warn!("Usage purge error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::permissions::PermLevel;
    use crate::session::{CachePayload, NewCommandCache};
    use crate::testing::test_data;

    #[tokio::test]
    async fn test_sweep_tolerates_repeats() {
        let clock = MockClock::default();
        let data = test_data(&clock, crate::commands::builtin().unwrap());
        data.sessions
            .create(
                NewCommandCache {
                    channel_id: 1,
                    user_id: 2,
                    guild_id: None,
                    command: "setup".to_string(),
                    perm_level: PermLevel::Member,
                    expires_at: clock.now_millis() + 1_000,
                    payload: CachePayload::new(),
                },
                false,
            )
            .await
            .unwrap();

        clock.advance(Duration::from_secs(2));
        sweep_sessions(&data).await;
        sweep_sessions(&data).await;
        assert!(data.sessions.is_empty());
        assert!(data.db.get_command_cache(1, 2).unwrap().is_none());
    }
}
