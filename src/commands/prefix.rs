use crate::dispatch::CommandContext;
use crate::permissions::PermLevel;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::Error;
use async_trait::async_trait;

static INFO: CommandInfo = CommandInfo::new("prefix", "settings")
    .description("Shows or changes the command prefix for this server")
    .usage("[new prefix | reset]")
    .examples(&["prefix", "prefix ?", "prefix reset"])
    .perm_level(PermLevel::Admin);

const MAX_PREFIX_LEN: usize = 5;

pub struct Prefix;

#[async_trait]
impl Command for Prefix {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;
        let arg = ctx.args.trim();

        if arg.is_empty() {
            ctx.reply(&format!("The prefix here is `{}`.", ctx.prefix().await?))
                .await?;
            return Ok(CommandOutcome::Success);
        }

        if arg.eq_ignore_ascii_case("reset") {
            guild.set_prefix(None).await?;
            ctx.reply(&format!(
                "Prefix reset to `{}`.",
                ctx.data.config.default_prefix
            ))
            .await?;
            return Ok(CommandOutcome::Success);
        }

        if arg.chars().count() > MAX_PREFIX_LEN || arg.contains(char::is_whitespace) {
            ctx.reply(&format!(
                "A prefix must be at most {} characters with no spaces.",
                MAX_PREFIX_LEN
            ))
            .await?;
            return Ok(CommandOutcome::Unsuccessful);
        }

        guild.set_prefix(Some(arg)).await?;
        ctx.reply(&format!("Prefix set to `{}`.", arg)).await?;
        Ok(CommandOutcome::Success)
    }
}
