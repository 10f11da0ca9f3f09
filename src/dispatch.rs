//! Routes inbound messages to command handlers.
//!
//! A message from a (channel, user) pair with a live command cache always
//! continues that session. Otherwise the text is parsed against the guild
//! prefix and run through the gates in order: lookup, dm capability,
//! permission level, usage limits, guild toggle. Gate failures are silent;
//! a failing store call gets the generic failure notice, except on the filter
//! path where the author never invoked anything.

use crate::error::Result;
use crate::guild::{GuildField, GuildHandle};
use crate::permissions::{self, MemberIdentity, PermLevel, Ranks};
use crate::registry::{Command, CommandOutcome};
use crate::session::{CachePayload, CommandCache, NewCommandCache};
use crate::usage::Scope;
use crate::{text, Data, Error};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const FAILURE_NOTICE: &str = "Something went wrong while running that command.";
pub const CANCELLED_NOTICE: &str = "Your previous action was cancelled.";

/// A chat message as seen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    pub author_is_bot: bool,
    /// Roles the author holds in the guild. Empty in direct messages.
    pub author_roles: Vec<u64>,
    /// Platform administrator permission or guild ownership.
    pub author_is_admin: bool,
    pub content: String,
    /// Users mentioned in the message.
    pub mentions: Vec<u64>,
}

#[cfg(test)]
impl IncomingMessage {
    pub(crate) fn test(guild_id: u64, channel_id: u64, author_id: u64) -> Self {
        Self {
            id: 1,
            channel_id,
            guild_id: Some(guild_id),
            author_id,
            ..Default::default()
        }
    }
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send(&self, channel_id: u64, content: &str) -> std::result::Result<(), Error>;

    async fn send_dm(&self, user_id: u64, content: &str) -> std::result::Result<(), Error>;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> std::result::Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    Channel(u64),
    Dm(u64),
}

async fn send_to(sink: &dyn ChatSink, target: ReplyTarget, content: &str) -> std::result::Result<(), Error> {
    let content = text::truncate(content);
    match target {
        ReplyTarget::Channel(channel_id) => sink.send(channel_id, &content).await,
        ReplyTarget::Dm(user_id) => sink.send_dm(user_id, &content).await,
    }
}

/// Everything a handler receives for one invocation.
pub struct CommandContext<'a> {
    pub data: &'a Data,
    pub sink: &'a dyn ChatSink,
    pub message: &'a IncomingMessage,
    pub command: &'static str,
    /// Text after the command name, or the whole message when continuing a session.
    pub args: &'a str,
    pub perm_level: PermLevel,
    pub is_dm: bool,
    pub guild: Option<Arc<GuildHandle>>,
    pub started_at: Instant,
    /// Present only when this invocation continues a session.
    pub session: Option<Arc<CommandCache>>,
    pub reply_target: ReplyTarget,
}

impl CommandContext<'_> {
    pub async fn reply(&self, content: &str) -> std::result::Result<(), Error> {
        send_to(self.sink, self.reply_target, content).await
    }

    pub fn guild_id(&self) -> Option<u64> {
        self.guild.as_ref().map(|g| g.id())
    }

    pub fn author_id(&self) -> u64 {
        self.message.author_id
    }

    pub async fn prefix(&self) -> Result<String> {
        match &self.guild {
            Some(guild) => {
                guild.load(&[GuildField::Prefix]).await?;
                guild.prefix()
            }
            None => Ok(self.data.config.default_prefix.clone()),
        }
    }

    /// Opens a session for this command that expires after the configured TTL.
    pub async fn open_session(&self, payload: CachePayload) -> Result<Arc<CommandCache>> {
        let ttl_ms = (self.data.config.session_ttl_secs as i64).saturating_mul(1000);
        self.data
            .sessions
            .create(
                NewCommandCache {
                    channel_id: self.message.channel_id,
                    user_id: self.message.author_id,
                    guild_id: self.message.guild_id,
                    command: self.command.to_string(),
                    perm_level: self.perm_level,
                    expires_at: self.data.clock.now_millis() + ttl_ms,
                    payload,
                },
                false,
            )
            .await
    }

    /// Pushes the session's expiration forward by the configured TTL and saves it.
    pub async fn keep_session(&self, session: &CommandCache) -> Result<()> {
        let ttl = std::time::Duration::from_secs(self.data.config.session_ttl_secs);
        session.save(Some(ttl)).await
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    Filtered(&'static str),
    MentionHelp,
    NotFound,
    /// The command cannot run in direct messages; its usage was sent instead.
    DmUnsupported,
    Forbidden,
    /// Cooldown active or the command is disabled by usage limits.
    Limited,
    Disabled,
    Ran {
        command: &'static str,
        outcome: CommandOutcome,
    },
    Continued {
        command: &'static str,
        outcome: CommandOutcome,
    },
    /// The session pointed at an unknown command or carried an unreadable payload.
    SessionDiscarded,
    Failed {
        command: &'static str,
    },
    /// A store call failed before a handler ran.
    StoreError,
}

pub async fn handle_message(data: &Data, sink: &dyn ChatSink, message: &IncomingMessage) -> Dispatch {
    if message.author_is_bot || message.author_id == data.bot_id {
        return Dispatch::Ignored;
    }

    let result = match data.sessions.find(message.channel_id, message.author_id) {
        Some(session) => continue_session(data, sink, message, session).await,
        None => dispatch_fresh(data, sink, message).await,
    };
    match result {
        Ok(dispatch) => dispatch,
        Err(e) => {
            error!(
                channel_id = message.channel_id,
                user_id = message.author_id,
                "Dispatch failed: {}",
                e
            );
            if let Err(e) = sink.send(message.channel_id, FAILURE_NOTICE).await {
                warn!("Failed to send failure notice: {}", e);
            }
            Dispatch::StoreError
        }
    }
}

async fn continue_session(
    data: &Data,
    sink: &dyn ChatSink,
    message: &IncomingMessage,
    session: Arc<CommandCache>,
) -> Result<Dispatch> {
    let command = data
        .registry
        .lookup(session.command())
        .filter(|c| c.accepts_cache(&session.payload()))
        .cloned();
    let Some(command) = command else {
        warn!(
            command = session.command(),
            channel_id = message.channel_id,
            user_id = message.author_id,
            "Discarding unusable command cache"
        );
        session.remove().await?;
        if let Err(e) = sink.send(message.channel_id, CANCELLED_NOTICE).await {
            warn!("Failed to send cancellation notice: {}", e);
        }
        return Ok(Dispatch::SessionDiscarded);
    };

    let name = command.info().name;
    debug!(command = name, user_id = message.author_id, "Continuing session");
    let ctx = CommandContext {
        data,
        sink,
        message,
        command: name,
        args: message.content.trim(),
        perm_level: session.perm_level(),
        is_dm: message.guild_id.is_none(),
        guild: message.guild_id.map(|id| data.guilds.get(id)),
        started_at: Instant::now(),
        session: Some(session),
        reply_target: ReplyTarget::Channel(message.channel_id),
    };
    Ok(match invoke(command.as_ref(), ctx).await {
        Some(outcome) => Dispatch::Continued { command: name, outcome },
        None => Dispatch::Failed { command: name },
    })
}

async fn dispatch_fresh(data: &Data, sink: &dyn ChatSink, message: &IncomingMessage) -> Result<Dispatch> {
    let is_dm = message.guild_id.is_none();
    let guild = match message.guild_id {
        Some(id) => Some(
            data.guilds
                .get_guild_wrapper(id, &[GuildField::Prefix, GuildField::Ranks])
                .await?,
        ),
        None => None,
    };

    let member = MemberIdentity {
        user_id: message.author_id,
        role_ids: &message.author_roles,
        is_platform_admin: message.author_is_admin && !is_dm,
    };
    let (perm_level, prefix) = match &guild {
        Some(guild) => (guild.perm_level(&member, &data.config.bot_masters)?, guild.prefix()?),
        None => (
            permissions::resolve(&member, &Ranks::default(), &data.config.bot_masters),
            data.config.default_prefix.clone(),
        ),
    };

    if text::is_bare_mention(&message.content, data.bot_id) {
        return Ok(mention_help(data, sink, message, guild, perm_level).await);
    }

    let Some((name, args)) = text::split_command(&message.content, &prefix) else {
        if perm_level == PermLevel::Member {
            if let Some(guild) = &guild {
                return Ok(run_filters(data, sink, message, guild).await.unwrap_or_else(|e| {
                    error!(guild_id = guild.id(), user_id = message.author_id, "Filter pass failed: {}", e);
                    Dispatch::StoreError
                }));
            }
        }
        return Ok(Dispatch::Ignored);
    };

    let Some(command) = data.registry.lookup(&name).cloned() else {
        return Ok(Dispatch::NotFound);
    };
    let info = command.info();

    if is_dm && !info.dm {
        if let Err(e) = sink.send(message.channel_id, &text::truncate(&info.help_text(&prefix))).await {
            warn!(command = info.name, "Failed to send usage: {}", e);
        }
        return Ok(Dispatch::DmUnsupported);
    }

    if perm_level < info.perm_level {
        debug!(command = info.name, user_id = message.author_id, "Permission gate failed");
        return Ok(Dispatch::Forbidden);
    }

    if let Some(guild) = &guild {
        guild.load(&[GuildField::UsageLimits]).await?;
    }
    let limits = data.usage.effective_limits(info, guild.as_deref())?;
    if limits.enabled == Some(false) {
        return Ok(Dispatch::Limited);
    }
    let scope = Scope::for_guild(message.guild_id);
    let usage = if limits.has_cooldown() {
        let usage = data.usage.load(message.author_id).await?;
        if !data.usage.can_use(&usage, scope, info.name, &limits) {
            debug!(command = info.name, user_id = message.author_id, "On cooldown");
            return Ok(Dispatch::Limited);
        }
        Some(usage)
    } else {
        None
    };

    if info.togglable {
        if let Some(guild) = &guild {
            guild.load(&[GuildField::Commands]).await?;
            if !guild.command_is_enabled(info.name)? {
                return Ok(Dispatch::Disabled);
            }
        }
    }

    let ctx = CommandContext {
        data,
        sink,
        message,
        command: info.name,
        args,
        perm_level,
        is_dm,
        guild,
        started_at: Instant::now(),
        session: None,
        reply_target: ReplyTarget::Channel(message.channel_id),
    };
    let Some(outcome) = invoke(command.as_ref(), ctx).await else {
        return Ok(Dispatch::Failed { command: info.name });
    };

    if outcome == CommandOutcome::Success {
        if let Some(usage) = usage {
            let now = data.clock.now_millis();
            if let Err(e) = data.usage.record_use(&usage, scope, info.name, now).await {
                error!(command = info.name, "Failed to record usage: {}", e);
            }
        }
    }
    Ok(Dispatch::Ran {
        command: info.name,
        outcome,
    })
}

async fn mention_help(
    data: &Data,
    sink: &dyn ChatSink,
    message: &IncomingMessage,
    guild: Option<Arc<GuildHandle>>,
    perm_level: PermLevel,
) -> Dispatch {
    let Some(help) = data.registry.lookup("help").cloned() else {
        return Dispatch::Ignored;
    };
    let ctx = CommandContext {
        data,
        sink,
        message,
        command: help.info().name,
        args: "",
        perm_level,
        is_dm: true,
        guild,
        started_at: Instant::now(),
        session: None,
        reply_target: ReplyTarget::Dm(message.author_id),
    };
    match invoke(help.as_ref(), ctx).await {
        Some(_) => Dispatch::MentionHelp,
        None => Dispatch::Failed {
            command: help.info().name,
        },
    }
}

async fn invoke(command: &dyn Command, ctx: CommandContext<'_>) -> Option<CommandOutcome> {
    let name = command.info().name;
    let sink = ctx.sink;
    let target = ctx.reply_target;
    match command.run(ctx).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(command = %name, "Command failed: {}", e);
            if let Err(e) = send_to(sink, target, FAILURE_NOTICE).await {
                warn!(command = %name, "Failed to send failure notice: {}", e);
            }
            None
        }
    }
}

async fn run_filters(
    data: &Data,
    sink: &dyn ChatSink,
    message: &IncomingMessage,
    guild: &GuildHandle,
) -> Result<Dispatch> {
    guild.load(&[GuildField::Commands, GuildField::Channels]).await?;
    let Some((name, outcome)) = data.filters.evaluate(guild, message)? else {
        return Ok(Dispatch::Ignored);
    };
    info!(
        filter = name,
        guild_id = guild.id(),
        user_id = message.author_id,
        "Filter matched: {}",
        outcome.report
    );

    for action in &outcome.actions {
        let result = match action {
            crate::filters::FilterAction::Delete => sink.delete_message(message.channel_id, message.id).await,
            crate::filters::FilterAction::Reply(content) => sink.send(message.channel_id, content).await,
            crate::filters::FilterAction::Nothing => Ok(()),
        };
        if let Err(e) = result {
            warn!(filter = name, "Filter action failed: {}", e);
        }
    }

    let (guild_id, target_id, moderator_id) = (guild.id(), message.author_id, data.bot_id);
    let action = format!("filter:{}", name);
    let report = outcome.report.clone();
    let case_id = data
        .db
        .run_blocking(move |db| db.add_case(guild_id, &action, target_id, moderator_id, Some(&report)))
        .await?;

    if let Some(case_channel) = guild.channels()?.case {
        let entry = format!(
            "Case #{} | filter `{}` | <@{}>\n{}",
            case_id, name, message.author_id, outcome.report
        );
        if let Err(e) = sink.send(case_channel, &text::truncate(&entry)).await {
            warn!(filter = name, "Failed to post case: {}", e);
        }
    }
    Ok(Dispatch::Filtered(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::guild::ChannelKind;
    use crate::registry::{CommandInfo, CommandRegistry, RegistryBuilder};
    use crate::testing::{test_data, RecordingSink, Sent};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const GUILD: u64 = 1;
    const CHANNEL: u64 = 10;
    const USER: u64 = 20;

    /// Replies "<name> <args>" and returns a fixed outcome.
    struct Probe {
        info: CommandInfo,
        outcome: CommandOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Command for Probe {
        fn info(&self) -> &CommandInfo {
            &self.info
        }

        async fn run(&self, ctx: CommandContext<'_>) -> std::result::Result<CommandOutcome, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.reply(&format!("{} {}", self.info.name, ctx.args).trim().to_string()).await?;
            Ok(self.outcome)
        }
    }

    /// Opens a session, counts turns, and closes on "done".
    struct Wizard;

    static WIZARD: CommandInfo = CommandInfo::new("wizard", "test");

    #[async_trait]
    impl Command for Wizard {
        fn info(&self) -> &CommandInfo {
            &WIZARD
        }

        async fn run(&self, ctx: CommandContext<'_>) -> std::result::Result<CommandOutcome, Error> {
            let Some(session) = &ctx.session else {
                let mut payload = CachePayload::new();
                payload.insert("step".to_string(), json!(0));
                ctx.open_session(payload).await?;
                return Ok(CommandOutcome::Success);
            };
            if ctx.args == "done" {
                session.remove().await?;
                return Ok(CommandOutcome::Success);
            }
            if ctx.args == "explode" {
                return Err("wizard exploded".into());
            }
            let step = session.get::<u64>("step").unwrap_or(0) + 1;
            session.set("step", &step)?;
            session.save(None).await?;
            ctx.reply(&format!("step {}", step)).await?;
            Ok(CommandOutcome::Success)
        }

        fn accepts_cache(&self, payload: &CachePayload) -> bool {
            payload.get("step").is_some_and(|v| v.is_u64())
        }
    }

    struct Boom;

    static BOOM: CommandInfo = CommandInfo::new("boom", "test");

    #[async_trait]
    impl Command for Boom {
        fn info(&self) -> &CommandInfo {
            &BOOM
        }

        async fn run(&self, _ctx: CommandContext<'_>) -> std::result::Result<CommandOutcome, Error> {
            Err("exploded".into())
        }
    }

    struct Harness {
        data: Data,
        sink: RecordingSink,
        clock: MockClock,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            let calls = Arc::new(AtomicUsize::new(0));
            let probe = |info: CommandInfo, outcome| -> Arc<dyn Command> {
                Arc::new(Probe {
                    info,
                    outcome,
                    calls: calls.clone(),
                })
            };
            let registry: CommandRegistry = RegistryBuilder::new()
                .register(probe(CommandInfo::new("ping", "utility").dm(true), CommandOutcome::Success))
                .register(probe(CommandInfo::new("help", "utility").dm(true), CommandOutcome::Success))
                .register(probe(
                    CommandInfo::new("admin", "settings").perm_level(PermLevel::Admin),
                    CommandOutcome::Success,
                ))
                .register(probe(
                    CommandInfo::new("slow", "fun").local_cooldown(Duration::from_secs(10)),
                    CommandOutcome::Success,
                ))
                .register(probe(
                    CommandInfo::new("picky", "fun").local_cooldown(Duration::from_secs(10)),
                    CommandOutcome::Unsuccessful,
                ))
                .register(probe(
                    CommandInfo::new("guildonly", "fun").usage("<thing>"),
                    CommandOutcome::Success,
                ))
                .register(probe(CommandInfo::new("toggly", "fun").togglable(true), CommandOutcome::Success))
                .register(probe(
                    CommandInfo::new("daily", "fun").dm(true).global_cooldown(Duration::from_secs(60)),
                    CommandOutcome::Success,
                ))
                .register(probe(
                    CommandInfo::new("dmslow", "fun").dm(true).local_cooldown(Duration::from_secs(10)),
                    CommandOutcome::Success,
                ))
                .register(Arc::new(Wizard))
                .register(Arc::new(Boom))
                .build()
                .unwrap();
            let clock = MockClock::default();
            Self {
                data: test_data(&clock, registry),
                sink: RecordingSink::new(),
                clock,
                calls,
            }
        }

        async fn send(&self, message: &IncomingMessage) -> Dispatch {
            handle_message(&self.data, &self.sink, message).await
        }

        async fn say(&self, content: &str) -> Dispatch {
            let message = IncomingMessage {
                content: content.to_string(),
                ..IncomingMessage::test(GUILD, CHANNEL, USER)
            };
            self.send(&message).await
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn ran(command: &'static str) -> Dispatch {
        Dispatch::Ran {
            command,
            outcome: CommandOutcome::Success,
        }
    }

    #[tokio::test]
    async fn test_member_runs_ping_without_recording_usage() {
        let h = Harness::new();
        assert_eq!(h.say("!ping").await, ran("ping"));
        assert_eq!(h.calls(), 1);
        assert_eq!(h.sink.sent(), vec![Sent::Channel(CHANNEL, "ping".to_string())]);

        let usage = h.data.usage.load(USER).await.unwrap();
        assert!(usage.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_command_names_are_case_insensitive_and_args_passed() {
        let h = Harness::new();
        assert_eq!(h.say("!PING  a b").await, ran("ping"));
        assert_eq!(h.sink.sent(), vec![Sent::Channel(CHANNEL, "ping a b".to_string())]);
    }

    #[tokio::test]
    async fn test_unknown_command_and_plain_text_are_silent() {
        let h = Harness::new();
        assert_eq!(h.say("!nope").await, Dispatch::NotFound);
        assert_eq!(h.say("just chatting").await, Dispatch::Ignored);
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bots_are_ignored() {
        let h = Harness::new();
        let mut message = IncomingMessage::test(GUILD, CHANNEL, USER);
        message.content = "!ping".to_string();
        message.author_is_bot = true;
        assert_eq!(h.send(&message).await, Dispatch::Ignored);
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn test_member_cannot_run_admin_command() {
        let h = Harness::new();
        assert_eq!(h.say("!admin add <@&5>").await, Dispatch::Forbidden);
        assert_eq!(h.calls(), 0);
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_admin_rank_and_platform_admin_pass() {
        let h = Harness::new();
        let guild = h.data.guilds.get_guild_wrapper(GUILD, &[]).await.unwrap();
        guild.add_to_rank(crate::permissions::Rank::Admin, 77).await.unwrap();

        let mut message = IncomingMessage::test(GUILD, CHANNEL, USER);
        message.content = "!admin".to_string();
        message.author_roles = vec![77];
        assert_eq!(h.send(&message).await, ran("admin"));

        message.author_roles.clear();
        message.author_is_admin = true;
        assert_eq!(h.send(&message).await, ran("admin"));
    }

    #[tokio::test]
    async fn test_bot_masters_pass_everywhere() {
        let h = Harness::new();
        let mut message = IncomingMessage::test(GUILD, CHANNEL, 999);
        message.content = "!admin".to_string();
        assert_eq!(h.send(&message).await, ran("admin"));
    }

    #[tokio::test]
    async fn test_local_cooldown() {
        let h = Harness::new();
        assert_eq!(h.say("!slow").await, ran("slow"));
        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.say("!slow").await, Dispatch::Limited);
        h.clock.advance(Duration::from_secs(6));
        assert_eq!(h.say("!slow").await, ran("slow"));
        assert_eq!(h.calls(), 2);
        // Rejected attempts send nothing
        assert_eq!(h.sink.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_cooldown_recorded_in_scope_and_global() {
        let h = Harness::new();
        let started = h.clock.now_millis();
        h.say("!slow").await;

        let usage = h.data.usage.load(USER).await.unwrap();
        assert_eq!(usage.last_used(Scope::Guild(GUILD), "slow"), Some(started));
        assert_eq!(usage.last_used(Scope::Global, "slow"), Some(started));

        // Local cooldowns are per scope
        let mut elsewhere = IncomingMessage::test(2, 11, USER);
        elsewhere.content = "!slow".to_string();
        assert_eq!(h.send(&elsewhere).await, ran("slow"));
    }

    #[tokio::test]
    async fn test_unsuccessful_run_does_not_consume_cooldown() {
        let h = Harness::new();
        let unsuccessful = Dispatch::Ran {
            command: "picky",
            outcome: CommandOutcome::Unsuccessful,
        };
        assert_eq!(h.say("!picky").await, unsuccessful);
        assert_eq!(h.say("!picky").await, unsuccessful);
        let usage = h.data.usage.load(USER).await.unwrap();
        assert!(usage.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_guild_usage_override_applies() {
        let h = Harness::new();
        let guild = h.data.guilds.get(GUILD);
        guild
            .set_usage_limit(
                "ping",
                crate::usage::UsageLimits {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(h.say("!ping").await, Dispatch::Limited);
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_togglable_command_is_dropped() {
        let h = Harness::new();
        assert_eq!(h.say("!toggly").await, ran("toggly"));

        let guild = h.data.guilds.get(GUILD);
        let info = h.data.registry.lookup("toggly").unwrap().info().clone();
        guild.toggle_command(&info, false).await.unwrap();
        assert_eq!(h.say("!toggly").await, Dispatch::Disabled);
    }

    #[tokio::test]
    async fn test_dm_only_commands_reply_with_usage() {
        let h = Harness::new();
        let mut message = IncomingMessage::test(GUILD, 55, USER);
        message.guild_id = None;
        message.content = "!guildonly".to_string();
        assert_eq!(h.send(&message).await, Dispatch::DmUnsupported);
        assert_eq!(h.calls(), 0);
        let sent = h.sink.sent();
        assert!(matches!(&sent[0], Sent::Channel(55, text) if text.contains("!guildonly <thing>")));

        message.content = "!ping".to_string();
        assert_eq!(h.send(&message).await, ran("ping"));
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let h = Harness::new();
        h.data.guilds.get(GUILD).set_prefix(Some("??")).await.unwrap();
        assert_eq!(h.say("!ping").await, Dispatch::Ignored);
        assert_eq!(h.say("??ping").await, ran("ping"));
    }

    #[tokio::test]
    async fn test_bare_mention_runs_help_in_dm() {
        let h = Harness::new();
        let mention = format!("<@{}>", h.data.bot_id);
        assert_eq!(h.say(&mention).await, Dispatch::MentionHelp);
        assert_eq!(h.sink.sent(), vec![Sent::Dm(USER, "help".to_string())]);
    }

    #[tokio::test]
    async fn test_handler_error_is_reported() {
        let h = Harness::new();
        assert_eq!(h.say("!boom").await, Dispatch::Failed { command: "boom" });
        assert_eq!(h.sink.sent(), vec![Sent::Channel(CHANNEL, FAILURE_NOTICE.to_string())]);
        // The loop keeps working
        assert_eq!(h.say("!ping").await, ran("ping"));
    }

    #[tokio::test]
    async fn test_session_continues_with_full_text() {
        let h = Harness::new();
        assert_eq!(h.say("!wizard").await, ran("wizard"));
        let continued = Dispatch::Continued {
            command: "wizard",
            outcome: CommandOutcome::Success,
        };
        // Even prefixed text goes to the session
        assert_eq!(h.say("!ping").await, continued);
        assert_eq!(h.say("hello").await, continued);
        assert_eq!(
            h.sink.sent(),
            vec![
                Sent::Channel(CHANNEL, "step 1".to_string()),
                Sent::Channel(CHANNEL, "step 2".to_string())
            ]
        );

        assert_eq!(h.say("done").await, continued);
        assert!(h.data.sessions.find(CHANNEL, USER).is_none());
        assert_eq!(h.say("!ping").await, ran("ping"));
    }

    #[tokio::test]
    async fn test_sessions_are_per_channel_and_user() {
        let h = Harness::new();
        h.say("!wizard").await;
        let mut other = IncomingMessage::test(GUILD, CHANNEL, 21);
        other.content = "!ping".to_string();
        assert_eq!(h.send(&other).await, ran("ping"));
    }

    #[tokio::test]
    async fn test_expired_session_falls_back_to_parsing() {
        let h = Harness::new();
        h.say("!wizard").await;
        let session = h.data.sessions.find(CHANNEL, USER).unwrap();
        assert_eq!(session.get::<u64>("step"), Some(0));
        assert_eq!(session.expires_at(), h.clock.now_millis() + 100_000);

        h.clock.advance(Duration::from_secs(150));
        assert_eq!(h.say("!ping").await, ran("ping"));
    }

    #[tokio::test]
    async fn test_orphaned_session_is_discarded() {
        let h = Harness::new();
        h.data
            .sessions
            .create(
                NewCommandCache {
                    channel_id: CHANNEL,
                    user_id: USER,
                    guild_id: Some(GUILD),
                    command: "retired".to_string(),
                    perm_level: PermLevel::Member,
                    expires_at: h.clock.now_millis() + 60_000,
                    payload: CachePayload::new(),
                },
                false,
            )
            .await
            .unwrap();

        assert_eq!(h.say("anything").await, Dispatch::SessionDiscarded);
        assert_eq!(h.sink.sent(), vec![Sent::Channel(CHANNEL, CANCELLED_NOTICE.to_string())]);
        assert!(h.data.db.get_command_cache(CHANNEL, USER).unwrap().is_none());
        assert_eq!(h.say("!ping").await, ran("ping"));
    }

    #[tokio::test]
    async fn test_rejected_payload_is_discarded() {
        let h = Harness::new();
        let mut payload = CachePayload::new();
        payload.insert("step".to_string(), json!("three"));
        h.data
            .sessions
            .create(
                NewCommandCache {
                    channel_id: CHANNEL,
                    user_id: USER,
                    guild_id: Some(GUILD),
                    command: "wizard".to_string(),
                    perm_level: PermLevel::Member,
                    expires_at: h.clock.now_millis() + 60_000,
                    payload,
                },
                false,
            )
            .await
            .unwrap();
        assert_eq!(h.say("next").await, Dispatch::SessionDiscarded);
    }

    #[tokio::test]
    async fn test_filters_run_for_members_only() {
        let h = Harness::new();
        let guild = h.data.guilds.get(GUILD);
        guild.set_filter_enabled("invites", true).await.unwrap();
        guild.set_channel(ChannelKind::Case, Some(300)).await.unwrap();

        assert_eq!(h.say("join discord.gg/abc").await, Dispatch::Filtered("invites"));
        let sent = h.sink.sent();
        assert_eq!(sent[0], Sent::Deleted(CHANNEL, 1));
        assert!(matches!(&sent[1], Sent::Channel(CHANNEL, _)));
        assert!(matches!(&sent[2], Sent::Channel(300, text) if text.contains("filter `invites`")));
        assert_eq!(h.data.db.count_guild_rows("cases", GUILD).unwrap(), 1);

        let mut moderator = IncomingMessage::test(GUILD, CHANNEL, USER);
        moderator.content = "join discord.gg/abc".to_string();
        moderator.author_is_admin = true;
        assert_eq!(h.send(&moderator).await, Dispatch::Ignored);
    }

    #[tokio::test]
    async fn test_store_errors_send_failure_notice() {
        let h = Harness::new();
        h.data.db.conn().execute("DROP TABLE guild_ranks", []).unwrap();
        assert_eq!(h.say("!ping").await, Dispatch::StoreError);
        assert_eq!(h.sink.sent(), vec![Sent::Channel(CHANNEL, FAILURE_NOTICE.to_string())]);
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn test_filter_store_error_is_silent() {
        let h = Harness::new();
        h.data.guilds.get(GUILD).set_filter_enabled("invites", true).await.unwrap();
        h.data.db.conn().execute("DROP TABLE cases", []).unwrap();

        assert_eq!(h.say("join discord.gg/abc").await, Dispatch::StoreError);
        let sent = h.sink.sent();
        assert_eq!(sent[0], Sent::Deleted(CHANNEL, 1));
        assert!(!sent.contains(&Sent::Channel(CHANNEL, FAILURE_NOTICE.to_string())));
    }

    #[tokio::test]
    async fn test_global_cooldown_crosses_scopes() {
        let h = Harness::new();
        assert_eq!(h.say("!daily").await, ran("daily"));

        let mut elsewhere = IncomingMessage::test(2, 11, USER);
        elsewhere.content = "!daily".to_string();
        assert_eq!(h.send(&elsewhere).await, Dispatch::Limited);

        let mut dm = IncomingMessage::test(GUILD, 55, USER);
        dm.guild_id = None;
        dm.content = "!daily".to_string();
        assert_eq!(h.send(&dm).await, Dispatch::Limited);

        h.clock.advance(Duration::from_secs(61));
        assert_eq!(h.send(&elsewhere).await, ran("daily"));
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_dm_cooldown_is_its_own_scope() {
        let h = Harness::new();
        let mut dm = IncomingMessage::test(GUILD, 55, USER);
        dm.guild_id = None;
        dm.content = "!dmslow".to_string();

        let started = h.clock.now_millis();
        assert_eq!(h.send(&dm).await, ran("dmslow"));
        let usage = h.data.usage.load(USER).await.unwrap();
        assert_eq!(usage.last_used(Scope::Dm, "dmslow"), Some(started));
        assert_eq!(usage.last_used(Scope::Global, "dmslow"), Some(started));

        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.send(&dm).await, Dispatch::Limited);
        // The guild scope has its own local window
        assert_eq!(h.say("!dmslow").await, ran("dmslow"));

        h.clock.advance(Duration::from_secs(6));
        assert_eq!(h.send(&dm).await, ran("dmslow"));
    }

    #[tokio::test]
    async fn test_handler_error_in_session_keeps_session() {
        let h = Harness::new();
        h.say("!wizard").await;
        assert_eq!(h.say("explode").await, Dispatch::Failed { command: "wizard" });
        assert_eq!(h.sink.sent(), vec![Sent::Channel(CHANNEL, FAILURE_NOTICE.to_string())]);

        let session = h.data.sessions.find(CHANNEL, USER).unwrap();
        assert_eq!(session.get::<u64>("step"), Some(0));
        assert_eq!(
            h.say("next").await,
            Dispatch::Continued {
                command: "wizard",
                outcome: CommandOutcome::Success,
            }
        );
        assert_eq!(h.sink.last_text().unwrap(), "step 1");
    }
}
