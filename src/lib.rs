pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod discord;
pub mod dispatch;
pub mod error;
pub mod filters;
pub mod guild;
pub mod permissions;
pub mod registry;
pub mod session;
pub mod sweeper;
pub mod text;
pub mod usage;

use std::sync::Arc;

/// Application context shared by the event handler, commands and background tasks.
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub clock: Arc<dyn clock::Clock>,
    pub registry: Arc<registry::CommandRegistry>,
    pub filters: filters::FilterChain,
    pub guilds: guild::GuildStore,
    pub sessions: session::SessionStore,
    pub usage: usage::UsageStore,
    /// Bot's own user ID, used for mention handling
    pub bot_id: u64,
}

impl Data {
    pub fn new(
        config: config::Config,
        db: db::Database,
        clock: Arc<dyn clock::Clock>,
        registry: registry::CommandRegistry,
        bot_id: u64,
    ) -> Self {
        let guilds = guild::GuildStore::new(db.clone(), &config.default_prefix);
        let sessions = session::SessionStore::new(db.clone(), clock.clone());
        let usage = usage::UsageStore::new(
            db.clone(),
            clock.clone(),
            config.usage_limits.clone(),
            config.usage_cache_capacity,
            config.usage_retention_secs,
        );
        Self {
            config,
            db,
            clock,
            registry: Arc::new(registry),
            filters: filters::FilterChain::builtin(),
            guilds,
            sessions,
            usage,
            bot_id,
        }
    }

    /// Called when the bot leaves a guild: drops its sessions and cascades its records.
    pub async fn remove_guild(&self, guild_id: u64) -> guild::CascadeReport {
        let dropped = self.sessions.forget_guild(guild_id);
        if dropped > 0 {
            tracing::debug!("Guild {}: dropped {} live command caches", guild_id, dropped);
        }
        self.guilds.remove_guild(guild_id).await
    }
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
