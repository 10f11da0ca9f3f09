use crate::config::DISCORD_MESSAGE_LIMIT;

pub fn strip_bot_mentions(input: &str, bot_id: u64) -> String {
    let mention = format!("<@{}>", bot_id);
    let mention_nick = format!("<@!{}>", bot_id);

    input
        .replace(&mention, "")
        .replace(&mention_nick, "")
        .trim()
        .to_string()
}

/// True when the message is nothing but a mention of the bot.
pub fn is_bare_mention(input: &str, bot_id: u64) -> bool {
    let trimmed = input.trim();
    trimmed == format!("<@{}>", bot_id) || trimmed == format!("<@!{}>", bot_id)
}

/// Splits prefixed text into a lowercased command name and the remaining arguments.
/// Returns `None` when the text does not start with `prefix` or names no command.
pub fn split_command<'a>(input: &'a str, prefix: &str) -> Option<(String, &'a str)> {
    let rest = input.strip_prefix(prefix)?;
    let rest = rest.trim_start();
    let (name, args) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some((name.to_lowercase(), args))
}

/// First whitespace-separated word and the trimmed remainder.
pub fn next_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.find(char::is_whitespace) {
        Some(idx) => (&input[..idx], input[idx..].trim()),
        None => (input, ""),
    }
}

/// Parses a raw id or a user/role/channel mention (`<@1>`, `<@!1>`, `<@&1>`, `<#1>`).
pub fn parse_id(token: &str) -> Option<u64> {
    let token = token.trim();
    let inner = token
        .strip_prefix("<@&")
        .or_else(|| token.strip_prefix("<@!"))
        .or_else(|| token.strip_prefix("<@"))
        .or_else(|| token.strip_prefix("<#"))
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(token);
    inner.parse().ok()
}

/// User ids mentioned in the text, without duplicates.
pub fn mentioned_users(input: &str) -> Vec<u64> {
    let mut ids = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("<@") {
        rest = &rest[start + 2..];
        if rest.starts_with('&') {
            continue;
        }
        let body = rest.strip_prefix('!').unwrap_or(rest);
        let Some(end) = body.find('>') else {
            break;
        };
        if let Ok(id) = body[..end].parse::<u64>() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

const INVITE_HOSTS: [&str; 4] = [
    "discord.gg/",
    "discord.com/invite/",
    "discordapp.com/invite/",
    "discord.me/",
];

pub fn contains_invite(input: &str) -> bool {
    let lowered = input.to_lowercase();
    INVITE_HOSTS.iter().any(|host| {
        lowered.match_indices(host).any(|(idx, _)| {
            lowered[idx + host.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
        })
    })
}

/// Cuts `content` to fit a single chat message, respecting char boundaries.
pub fn truncate(content: &str) -> String {
    if content.len() <= DISCORD_MESSAGE_LIMIT {
        return content.to_string();
    }
    let mut end = DISCORD_MESSAGE_LIMIT - 3;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_both_mention_forms() {
        assert_eq!(strip_bot_mentions("<@42> hi <@!42>", 42), "hi");
        assert!(is_bare_mention("  <@!42> ", 42));
        assert!(!is_bare_mention("<@42> help", 42));
        assert!(!is_bare_mention("<@43>", 42));
    }

    #[test]
    fn splits_commands() {
        assert_eq!(split_command("!PING", "!"), Some(("ping".to_string(), "")));
        assert_eq!(
            split_command("!admin add <@&5>  now", "!"),
            Some(("admin".to_string(), "add <@&5>  now"))
        );
        assert_eq!(split_command("!! ping", "!!"), Some(("ping".to_string(), "")));
        assert_eq!(split_command("hello", "!"), None);
        assert_eq!(split_command("!", "!"), None);
    }

    #[test]
    fn parses_ids_and_mentions() {
        assert_eq!(parse_id("<@&12>"), Some(12));
        assert_eq!(parse_id("<@!13>"), Some(13));
        assert_eq!(parse_id("<#14>"), Some(14));
        assert_eq!(parse_id("15"), Some(15));
        assert_eq!(parse_id("<@x>"), None);
        assert_eq!(next_word("  add  <@1> "), ("add", "<@1>"));
    }

    #[test]
    fn collects_user_mentions() {
        assert_eq!(mentioned_users("<@1> <@!2> <@&3> <@1> <@oops>"), vec![1, 2]);
    }

    #[test]
    fn detects_invites() {
        assert!(contains_invite("join https://discord.gg/abc123"));
        assert!(contains_invite("DISCORD.COM/INVITE/xyz"));
        assert!(!contains_invite("discord.gg/ is a domain"));
        assert!(!contains_invite("nothing here"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(DISCORD_MESSAGE_LIMIT);
        let out = truncate(&long);
        assert!(out.len() <= DISCORD_MESSAGE_LIMIT);
        assert!(out.ends_with("..."));
        assert_eq!(truncate("short"), "short");
    }
}
