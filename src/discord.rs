//! Serenity event handler and the outbound sink over the HTTP client.

use crate::dispatch::{self, ChatSink, IncomingMessage};
use crate::guild::{GuildField, MegalogFunction};
use crate::{text, Data, Error};
use serenity::all::{ActivityData, ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::guild::{Guild, UnavailableGuild};
use serenity::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct SerenitySink {
    http: Arc<Http>,
}

impl SerenitySink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatSink for SerenitySink {
    async fn send(&self, channel_id: u64, content: &str) -> Result<(), Error> {
        ChannelId::new(channel_id)
            .say(&self.http, content)
            .await?;
        Ok(())
    }

    async fn send_dm(&self, user_id: u64, content: &str) -> Result<(), Error> {
        let channel = UserId::new(user_id)
            .create_dm_channel(&self.http)
            .await?;
        channel.say(&self.http, content).await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), Error> {
        ChannelId::new(channel_id)
            .delete_message(&self.http, MessageId::new(message_id))
            .await?;
        Ok(())
    }
}

/// Guild owner, or any held role (including @everyone) with the administrator permission.
fn is_platform_admin(ctx: &Context, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) -> bool {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return false;
    };
    if guild.owner_id == user_id {
        return true;
    }
    let everyone = RoleId::new(guild_id.get());
    roles
        .iter()
        .chain(std::iter::once(&everyone))
        .filter_map(|id| guild.roles.get(id))
        .any(|role| role.permissions.administrator())
}

fn to_incoming(ctx: &Context, msg: &Message) -> IncomingMessage {
    let roles: Vec<RoleId> = msg
        .member
        .as_ref()
        .map(|m| m.roles.clone())
        .unwrap_or_default();
    let author_is_admin = msg
        .guild_id
        .is_some_and(|gid| is_platform_admin(ctx, gid, msg.author.id, &roles));

    IncomingMessage {
        id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        guild_id: msg.guild_id.map(|id| id.get()),
        author_id: msg.author.id.get(),
        author_is_bot: msg.author.bot,
        author_roles: roles.iter().map(|r| r.get()).collect(),
        author_is_admin,
        content: msg.content.clone(),
        mentions: msg.mentions.iter().map(|u| u.id.get()).collect(),
    }
}

/// Records a deleted message and forwards it to the guild's megalog channel.
pub async fn relay_message_delete(
    data: &Data,
    sink: &dyn ChatSink,
    guild_id: u64,
    channel_id: u64,
    content: Option<String>,
) -> crate::error::Result<bool> {
    let guild = data
        .guilds
        .get_guild_wrapper(guild_id, &[GuildField::Megalog])
        .await?;
    let Some(target) = guild.megalog_target(MegalogFunction::MessageDelete, channel_id)? else {
        return Ok(false);
    };

    let entry = format!(
        "Message deleted in <#{}>: {}",
        channel_id,
        content.as_deref().unwrap_or("*content unavailable*")
    );
    let logged = entry.clone();
    data.db
        .run_blocking(move |db| db.add_log_entry(guild_id, MegalogFunction::MessageDelete.as_str(), &logged))
        .await?;
    if let Err(e) = sink.send(target, &text::truncate(&entry)).await {
        warn!("Guild {}: failed to relay deleted message: {}", guild_id, e);
    }
    Ok(true)
}

pub struct Handler {
    data: Arc<Data>,
}

impl Handler {
    pub fn new(data: Arc<Data>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Connected as {} ({} guilds)", ready.user.name, ready.guilds.len());
        ctx.set_activity(Some(ActivityData::custom(&self.data.config.status_message)));
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let incoming = to_incoming(&ctx, &msg);
        let sink = SerenitySink::new(ctx.http.clone());
        let outcome = dispatch::handle_message(&self.data, &sink, &incoming).await;
        debug!(
            channel_id = incoming.channel_id,
            user_id = incoming.author_id,
            "Dispatch: {:?}",
            outcome
        );
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(e) = self.data.guilds.add_guild(guild.id.get()).await {
            error!("Failed to register guild {}: {}", guild.id, e);
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An unavailable guild is an outage, not a removal
        if incomplete.unavailable {
            return;
        }
        let report = self.data.remove_guild(incomplete.id.get()).await;
        if !report.failed_tables.is_empty() {
            warn!(
                "Guild {} removal incomplete: {:?}",
                incomplete.id, report.failed_tables
            );
        }
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let Some(guild_id) = guild_id else {
            return;
        };
        let content = ctx
            .cache
            .message(channel_id, deleted_message_id)
            .map(|m| m.content.clone());
        let sink = SerenitySink::new(ctx.http.clone());
        if let Err(e) = relay_message_delete(&self.data, &sink, guild_id.get(), channel_id.get(), content).await {
            error!("Failed to relay message delete in guild {}: {}", guild_id, e);
        }
    }
}
