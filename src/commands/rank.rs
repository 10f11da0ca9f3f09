use crate::dispatch::CommandContext;
use crate::guild::GuildField;
use crate::permissions::{PermLevel, Rank};
use crate::registry::{Command, CommandInfo, CommandOutcome};
use crate::text;
use crate::Error;
use async_trait::async_trait;

static ADMINS: CommandInfo = CommandInfo::new("admin", "settings/ranks")
    .description("Manages the roles and users with admin rank")
    .usage("<add | remove> <@role | @user | id> | list")
    .examples(&["admin add @Staff", "admin list"])
    .perm_level(PermLevel::Admin);

static MODS: CommandInfo = CommandInfo::new("mod", "settings/ranks")
    .description("Manages the roles and users with mod rank")
    .usage("<add | remove> <@role | @user | id> | list")
    .examples(&["mod add @Helpers"])
    .perm_level(PermLevel::Admin);

static IMMUNE: CommandInfo = CommandInfo::new("immune", "settings/ranks")
    .description("Manages the roles and users that filters ignore")
    .usage("<add | remove> <@role | @user | id> | list")
    .examples(&["immune add @Bots"])
    .perm_level(PermLevel::Mod);

/// One command per rank, sharing the add/remove/list logic.
pub struct RankCommand {
    rank: Rank,
    info: &'static CommandInfo,
}

impl RankCommand {
    pub fn admins() -> Self {
        Self {
            rank: Rank::Admin,
            info: &ADMINS,
        }
    }

    pub fn mods() -> Self {
        Self {
            rank: Rank::Mod,
            info: &MODS,
        }
    }

    pub fn immune() -> Self {
        Self {
            rank: Rank::Immune,
            info: &IMMUNE,
        }
    }
}

fn format_target(id: u64) -> String {
    format!("`{}`", id)
}

#[async_trait]
impl Command for RankCommand {
    fn info(&self) -> &CommandInfo {
        self.info
    }

    async fn run(&self, ctx: CommandContext<'_>) -> Result<CommandOutcome, Error> {
        let guild = ctx.guild.as_ref().ok_or("Must be run in a guild")?;
        let (action, rest) = text::next_word(ctx.args);
        let rank = self.rank.as_str();

        match action.to_lowercase().as_str() {
            "list" | "" => {
                guild.load(&[GuildField::Ranks]).await?;
                let ranks = guild.ranks()?;
                let members = ranks.get(self.rank);
                if members.is_empty() {
                    ctx.reply(&format!("No {} are configured.", rank)).await?;
                } else {
                    let list: Vec<String> = members.iter().map(|id| format_target(*id)).collect();
                    ctx.reply(&format!("**{}**: {}", rank, list.join(", "))).await?;
                }
                Ok(CommandOutcome::Success)
            }
            "add" | "remove" => {
                let Some(target) = text::parse_id(rest) else {
                    ctx.reply(&self.info.help_text(&ctx.prefix().await?)).await?;
                    return Ok(CommandOutcome::Unsuccessful);
                };
                let changed = if action.eq_ignore_ascii_case("add") {
                    guild.add_to_rank(self.rank, target).await?
                } else {
                    guild.remove_from_rank(self.rank, target).await?
                };
                let message = match (action.eq_ignore_ascii_case("add"), changed) {
                    (true, true) => format!("Added {} to {}.", format_target(target), rank),
                    (true, false) => format!("{} is already in {}.", format_target(target), rank),
                    (false, true) => format!("Removed {} from {}.", format_target(target), rank),
                    (false, false) => format!("{} is not in {}.", format_target(target), rank),
                };
                ctx.reply(&message).await?;
                Ok(CommandOutcome::Success)
            }
            _ => {
                ctx.reply(&self.info.help_text(&ctx.prefix().await?)).await?;
                Ok(CommandOutcome::Unsuccessful)
            }
        }
    }
}
