use crate::dispatch::CommandContext;
use crate::guild::GuildField;
use crate::permissions::PermLevel;
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::text;
use crate::Error;
use async_trait::async_trait;
use serde_json::{json, Value};

static INFO: CommandInfo = CommandInfo::new("filter", "moderation")
    .description("Turns message filters on or off and adjusts their settings")
    .usage("list | <enable | disable> <filter> | set <filter> <key> <value>")
    .examples(&["filter enable invites", "filter set mentions threshold 3"])
    .perm_level(PermLevel::Admin);

pub struct FilterCommand;

#[async_trait]
impl Command for FilterCommand {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;
        guild.load(&[GuildField::Commands]).await?;
        let (action, rest) = text::next_word(ctx.args);
        let (name, rest) = text::next_word(rest);
        let name = name.to_lowercase();
        let filters = &ctx.data.filters;

        let action = action.to_lowercase();
        if action == "list" || action.is_empty() {
            let mut lines = Vec::new();
            for filter in filters.iter() {
                let state = if filter.is_active(guild)? { "on" } else { "off" };
                lines.push(format!("`{}` ({}): {}", filter.name(), state, filter.description()));
            }
            ctx.reply(&lines.join("\n")).await?;
            return Ok(CommandOutcome::Success);
        }

        let Some(filter) = filters.get(&name) else {
            ctx.reply(&format!("There is no filter named `{}`.", name)).await?;
            return Ok(CommandOutcome::Unsuccessful);
        };

        match action.as_str() {
            "enable" | "disable" => {
                let enabled = action == "enable";
                guild.set_filter_enabled(filter.name(), enabled).await?;
                let state = if enabled { "enabled" } else { "disabled" };
                ctx.reply(&format!("Filter `{}` {}.", filter.name(), state)).await?;
            }
            "set" => {
                let (key, value) = text::next_word(rest);
                if key.is_empty() || value.is_empty() {
                    ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                    return Ok(CommandOutcome::Unsuccessful);
                }
                let current = guild.command_settings(filter.name())?.unwrap_or_default();
                let mut data = match current.data {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                let parsed = value
                    .parse::<u64>()
                    .map(|n| json!(n))
                    .unwrap_or_else(|_| json!(value));
                data.insert(key.to_string(), parsed);
                guild
                    .set_command_settings(filter.name(), current.enabled, Value::Object(data))
                    .await?;
                ctx.reply(&format!("Set `{}` = `{}` for `{}`.", key, value, filter.name()))
                    .await?;
            }
            _ => {
                ctx.reply(&INFO.help_text(&ctx.prefix().await?)).await?;
                return Ok(CommandOutcome::Unsuccessful);
            }
        }
        Ok(CommandOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::Bot;
    use crate::dispatch::Dispatch;

    #[tokio::test]
    async fn test_enable_and_tune_mentions() {
        let bot = Bot::new();
        bot.admin("!filter list").await;
        assert!(bot.reply().contains("`mentions` (off)"));

        bot.admin("!filter set mentions threshold 2").await;
        assert_eq!(bot.reply(), "Set `threshold` = `2` for `mentions`.");
        // Still off until enabled
        assert_eq!(bot.member("<@1> <@2> <@3>").await, Dispatch::Ignored);

        bot.admin("!filter enable mentions").await;
        assert_eq!(bot.reply(), "Filter `mentions` enabled.");
        let mut message = crate::dispatch::IncomingMessage::test(1, 10, 21);
        message.content = "<@1> <@2> <@3>".to_string();
        message.mentions = vec![1, 2, 3];
        let result = crate::dispatch::handle_message(&bot.data, &bot.sink, &message).await;
        assert_eq!(result, Dispatch::Filtered("mentions"));
    }

    #[tokio::test]
    async fn test_unknown_filter() {
        let bot = Bot::new();
        bot.admin("!filter enable caps").await;
        assert_eq!(bot.reply(), "There is no filter named `caps`.");
    }
}
