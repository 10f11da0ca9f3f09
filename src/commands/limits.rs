use crate::dispatch::CommandContext;
use crate::guild::GuildField;
use crate::permissions::PermLevel;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::text;
use crate::usage::{self, UsageLimits};
use crate::Error;
use async_trait::async_trait;
use std::time::Duration;

static INFO: CommandInfo = CommandInfo::new("limits", "settings")
    .description("Shows or overrides a command's usage limits in this server")
    .usage("<command> [local <duration | inherit> | global <duration | inherit> | enable | disable | reset]")
    .examples(&["limits ping", "limits ping local 30s", "limits ping global inherit", "limits ping reset"])
    .perm_level(PermLevel::Admin);

pub struct Limits;

fn format_ms(ms: Option<i64>) -> String {
    match ms {
        Some(ms) => humantime::format_duration(Duration::from_millis(ms.max(0) as u64)).to_string(),
        None => "none".to_string(),
    }
}

fn describe(name: &str, limits: &UsageLimits) -> String {
    format!(
        "**{}**: local cooldown {}, global cooldown {}, {}",
        name,
        format_ms(limits.local_cooldown_ms),
        format_ms(limits.global_cooldown_ms),
        if limits.enabled == Some(false) { "disabled" } else { "enabled" }
    )
}

/// `None` for "inherit", otherwise a humantime duration in millis, at most `max_ms`.
fn parse_cooldown(raw: &str, max_ms: i64) -> Result<Option<i64>, Error> {
    if raw.eq_ignore_ascii_case("inherit") {
        return Ok(None);
    }
    let duration = humantime::parse_duration(raw)?;
    Ok(Some(usage::cooldown_millis(duration, max_ms)?))
}

#[async_trait]
impl Command for Limits {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;
        let (name, rest) = text::next_word(ctx.args);
        let name = name.to_lowercase();
        let Some(command) = ctx.data.registry.lookup(&name) else {
            ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
            return Ok(CommandOutcome::Unsuccessful);
        };
        guild.load(&[GuildField::UsageLimits]).await?;

        let (action, value) = text::next_word(rest);
        let mut over = guild.usage_limit(&name)?.unwrap_or_default();
        match action.to_lowercase().as_str() {
            "" => {
                let effective = ctx.data.usage.effective_limits(command.info(), Some(guild.as_ref()))?;
                ctx.reply(&describe(&name, &effective)).await?;
                return Ok(CommandOutcome::Success);
            }
            "reset" => {
                guild.clear_usage_limit(&name).await?;
                ctx.reply(&format!("Limits for `{}` reset to defaults.", name)).await?;
                return Ok(CommandOutcome::Success);
            }
            "enable" => over.enabled = None,
            "disable" => over.enabled = Some(false),
            "local" | "global" => {
                let parsed = match parse_cooldown(value, ctx.data.usage.retention_ms()) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        ctx.reply(&format!("Invalid duration `{}`: {}", value, e)).await?;
                        return Ok(CommandOutcome::Unsuccessful);
                    }
                };
                if action.eq_ignore_ascii_case("local") {
                    over.local_cooldown_ms = parsed;
                } else {
                    over.global_cooldown_ms = parsed;
                }
            }
            _ => {
                ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                return Ok(CommandOutcome::Unsuccessful);
            }
        }

        if over.is_empty() {
            guild.clear_usage_limit(&name).await?;
        } else {
            guild.set_usage_limit(&name, over).await?;
        }
        let effective = ctx.data.usage.effective_limits(command.info(), Some(guild.as_ref()))?;
        ctx.reply(&describe(&name, &effective)).await?;
        Ok(CommandOutcome::Success)
    }
}
