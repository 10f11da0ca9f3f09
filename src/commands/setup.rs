//! Multi-turn server setup. Each reply from the admin answers one step; the
//! wizard state lives in a command cache under the `step` key.

use crate::dispatch::CommandContext;
use crate::guild::ChannelKind;
use crate::permissions::PermLevel;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::session::CachePayload;
use crate::text;
use crate::Error;
use async_trait::async_trait;
use serde_json::json;

static INFO: CommandInfo = CommandInfo::new("setup", "settings")
    .description("Walks through choosing the log, case and modmail channels")
    .examples(&["setup"])
    .perm_level(PermLevel::Admin);

const STEPS: [(ChannelKind, &str); 3] = [
    (ChannelKind::Log, "log"),
    (ChannelKind::Case, "case"),
    (ChannelKind::Modmail, "modmail"),
];

pub struct Setup;

fn prompt(step: usize) -> String {
    format!(
        "Step {}/{}: which channel should be the **{}** channel? Mention it, or say `skip` or `cancel`.",
        step + 1,
        STEPS.len(),
        STEPS[step].1
    )
}

#[async_trait]
impl Command for Setup {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;

        let Some(session) = &ctx.session else {
            let mut payload = CachePayload::new();
            payload.insert("step".to_string(), json!(0));
            ctx.open_session(payload).await?;
            ctx.reply(&prompt(0)).await?;
            return Ok(CommandOutcome::Success);
        };

        let step = session.get::<usize>("step").unwrap_or(0);
        let answer = ctx.args.trim();
        if answer.eq_ignore_ascii_case("cancel") {
            session.remove().await?;
            ctx.reply("Setup cancelled.").await?;
            return Ok(CommandOutcome::Success);
        }

        if !answer.eq_ignore_ascii_case("skip") {
            let Some(channel) = text::parse_id(text::next_word(answer).0) else {
                ctx.keep_session(session).await?;
                ctx.reply("Please mention a channel, or say `skip` or `cancel`.").await?;
                return Ok(CommandOutcome::Unsuccessful);
            };
            guild.set_channel(STEPS[step].0, Some(channel)).await?;
        }

        let next = step + 1;
        if next >= STEPS.len() {
            session.remove().await?;
            ctx.reply("Setup complete.").await?;
            return Ok(CommandOutcome::Success);
        }
        session.set("step", &next)?;
        ctx.keep_session(session).await?;
        ctx.reply(&prompt(next)).await?;
        Ok(CommandOutcome::Success)
    }

    fn accepts_cache(&self, payload: &CachePayload) -> bool {
        payload
            .get("step")
            .and_then(|v| v.as_u64())
            .is_some_and(|step| (step as usize) < STEPS.len())
    }
}
