use crate::dispatch::CommandContext;
use crate::guild::{GuildField, ToggleResult};
use crate::permissions::PermLevel;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::text;
use crate::Error;
use async_trait::async_trait;

static INFO: CommandInfo = CommandInfo::new("command", "settings")
    .description("Enables or disables a command in this server")
    .usage("<enable | disable> <command> | list")
    .examples(&["command disable ping", "command list"])
    .perm_level(PermLevel::Admin);

pub struct Toggle;

#[async_trait]
impl Command for Toggle {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;
        let (action, rest) = text::next_word(ctx.args);
        let action = action.to_lowercase();

        if action == "list" {
            guild.load(&[GuildField::Commands]).await?;
            let mut disabled = Vec::new();
            for command in ctx.data.registry.commands() {
                let name = command.info().name;
                if command.info().togglable && !guild.command_is_enabled(name)? {
                    disabled.push(format!("`{}`", name));
                }
            }
            if disabled.is_empty() {
                ctx.reply("No commands are disabled.").await?;
            } else {
                disabled.sort();
                ctx.reply(&format!("Disabled: {}", disabled.join(", "))).await?;
            }
            return Ok(CommandOutcome::Success);
        }

        let enabled = match action.as_str() {
            "enable" | "on" => true,
            "disable" | "off" => false,
            _ => {
                ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                return Ok(CommandOutcome::Unsuccessful);
            }
        };
        let name = rest.to_lowercase();
        let Some(target) = ctx.data.registry.lookup(&name) else {
            ctx.reply(&format!("There is no command named `{}`.", name)).await?;
            return Ok(CommandOutcome::Unsuccessful);
        };

        match guild.toggle_command(target.info(), enabled).await? {
            ToggleResult::Applied => {
                let state = if enabled { "enabled" } else { "disabled" };
                ctx.reply(&format!("`{}` is now {}.", name, state)).await?;
                Ok(CommandOutcome::Success)
            }
            ToggleResult::NotApplicable => {
                ctx.reply(&format!("`{}` cannot be toggled.", name)).await?;
                Ok(CommandOutcome::Unsuccessful)
            }
        }
    }
}
