use crate::dispatch::CommandContext;
use crate::permissions::PermLevel;
use crate::registry::{Category, Command, CommandInfo, CommandOutcome};
use crate::Error;
use async_trait::async_trait;
use std::time::Duration;

static INFO: CommandInfo = CommandInfo::new("help", "utility")
    .description("Lists commands or shows how to use one")
    .usage("[command | category]")
    .examples(&["help", "help prefix", "help moderation/logs"])
    .dm(true);

pub struct Help;

fn list_category(category: Category<'_>, level: PermLevel, prefix: &str, out: &mut Vec<String>) {
    let mut names: Vec<String> = category
        .commands()
        .map(|c| c.info())
        .filter(|info| info.perm_level <= level)
        .map(|info| format!("`{}{}`", prefix, info.name))
        .collect();
    if !names.is_empty() {
        names.sort();
        let heading = if category.is_root() { "general" } else { category.path() };
        out.push(format!("**{}**: {}", heading, names.join(", ")));
    }
    for sub in category.subcategories() {
        list_category(sub, level, prefix, out);
    }
}

fn describe(info: &CommandInfo, prefix: &str) -> String {
    let mut out = info.help_text(prefix);
    out.push_str(&format!("\nRequired level: {}", info.perm_level));
    out.push_str(&format!("\nWorks in DMs: {}", if info.dm { "yes" } else { "no" }));
    let fmt = |d: Duration| humantime::format_duration(d).to_string();
    if let Some(local) = info.local_cooldown {
        out.push_str(&format!("\nCooldown: {}", fmt(local)));
    }
    if let Some(global) = info.global_cooldown {
        out.push_str(&format!("\nGlobal cooldown: {}", fmt(global)));
    }
    out
}

#[async_trait]
impl Command for Help {
    fn info(&self) -> &CommandInfo {
        &INFO
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let prefix = ctx.prefix().await?;
        let registry = &ctx.data.registry;
        let query = ctx.args.trim().to_lowercase();

        if query.is_empty() {
            let mut lines = vec![format!(
                "Use `{}help <command>` for details or `{}help <category>` to list a category.",
                prefix, prefix
            )];
            list_category(registry.root(), ctx.perm_level, &prefix, &mut lines);
            ctx.reply(&lines.join("\n")).await?;
            return Ok(CommandOutcome::Success);
        }

        if let Some(command) = registry.lookup(&query) {
            if command.info().perm_level <= ctx.perm_level {
                ctx.reply(&describe(command.info(), &prefix)).await?;
                return Ok(CommandOutcome::Success);
            }
        }

        if let Some(category) = registry.resolve_category(&query) {
            let mut lines = Vec::new();
            list_category(category, ctx.perm_level, &prefix, &mut lines);
            if !lines.is_empty() {
                ctx.reply(&lines.join("\n")).await?;
                return Ok(CommandOutcome::Success);
            }
        }

        ctx.reply(&format!("No command or category named `{}` was found.", query))
            .await?;
        Ok(CommandOutcome::Unsuccessful)
    }
}
