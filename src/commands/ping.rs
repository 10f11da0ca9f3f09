use crate::dispatch::CommandContext;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::Error;
use async_trait::async_trait;

static INFO: CommandInfo = CommandInfo::new("ping", "utility")
    .description("Checks that the bot is responding")
    .dm(true)
    .togglable(true);

pub struct Ping;

#[async_trait]
impl Command for Ping {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let elapsed = ctx.started_at.elapsed().as_millis();
        ctx.reply(&format!("Pong! `{}ms`", elapsed)).await?;
        Ok(CommandOutcome::Success)
    }
}
