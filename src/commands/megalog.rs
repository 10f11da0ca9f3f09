use crate::dispatch::CommandContext;
use crate::guild::{GuildField, MegalogFunction};
use crate::permissions::PermLevel;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::text;
use crate::Error;
use async_trait::async_trait;

static INFO: CommandInfo = CommandInfo::new("megalog", "moderation")
    .path("moderation/logs")
    .description("Routes server events to log channels")
    .usage("show | set <function | all> <#channel> | disable <function | all> | ignore <#channel> | unignore <#channel>")
    .examples(&["megalog set messageDelete #logs", "megalog disable all", "megalog ignore #staff"])
    .perm_level(PermLevel::Admin);

pub struct Megalog;

/// `all` expands to every function.
fn parse_functions(raw: &str) -> Option<Vec<MegalogFunction>> {
    if raw.eq_ignore_ascii_case("all") {
        return Some(MegalogFunction::ALL.to_vec());
    }
    raw.parse().ok().map(|f| vec![f])
}

#[async_trait]
impl Command for Megalog {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;
        guild.load(&[GuildField::Megalog]).await?;
        let (action, rest) = text::next_word(ctx.args);
        let (target, extra) = text::next_word(rest);

        let reply = match action.to_lowercase().as_str() {
            "show" | "" => {
                let megalog = guild.megalog()?;
                let mut lines: Vec<String> = MegalogFunction::ALL
                    .iter()
                    .map(|f| match megalog.channels.get(f) {
                        Some(channel) => format!("`{}` → <#{}>", f.as_str(), channel),
                        None => format!("`{}` → off", f.as_str()),
                    })
                    .collect();
                if !megalog.ignored.is_empty() {
                    let ignored: Vec<String> = megalog.ignored.iter().map(|c| format!("<#{}>", c)).collect();
                    lines.push(format!("Ignored: {}", ignored.join(", ")));
                }
                lines.join("\n")
            }
            "set" => {
                let (Some(functions), Some(channel)) = (parse_functions(target), text::parse_id(extra)) else {
                    ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                    return Ok(CommandOutcome::Unsuccessful);
                };
                for function in &functions {
                    guild.set_megalog_channel(*function, channel).await?;
                }
                format!("Logging {} function(s) to <#{}>.", functions.len(), channel)
            }
            "disable" => {
                let Some(functions) = parse_functions(target) else {
                    ctx.reply(&format!("Unknown megalog function `{}`.", target)).await?;
                    return Ok(CommandOutcome::Unsuccessful);
                };
                let mut disabled = 0;
                for function in functions {
                    if guild.disable_megalog_function(function).await? {
                        disabled += 1;
                    }
                }
                format!("Disabled {} function(s).", disabled)
            }
            "ignore" | "unignore" => {
                let Some(channel) = text::parse_id(target) else {
                    ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                    return Ok(CommandOutcome::Unsuccessful);
                };
                if action.eq_ignore_ascii_case("ignore") {
                    guild.add_megalog_ignore(channel).await?;
                    format!("Events from <#{}> will not be logged.", channel)
                } else {
                    guild.remove_megalog_ignore(channel).await?;
                    format!("Events from <#{}> will be logged again.", channel)
                }
            }
            _ => {
                ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                return Ok(CommandOutcome::Unsuccessful);
            }
        };
        ctx.reply(&reply).await?;
        Ok(CommandOutcome::Success)
    }
}
