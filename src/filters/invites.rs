use super::{Filter, FilterAction, FilterOutcome};
use crate::dispatch::IncomingMessage;
use crate::guild::CommandSettings;
use crate::text;

/// Removes server invite links.
pub struct InviteFilter;

impl Filter for InviteFilter {
    fn name(&self) -> &'static str {
        "invites"
    }

    fn description(&self) -> &'static str {
        "Deletes messages containing server invite links"
    }

    fn run(&self, message: &IncomingMessage, _settings: Option<&CommandSettings>) -> Option<FilterOutcome> {
        if !text::contains_invite(&message.content) {
            return None;
        }
        Some(FilterOutcome {
            report: format!("Posted an invite link in <#{}>", message.channel_id),
            actions: vec![
                FilterAction::Delete,
                FilterAction::Reply(format!("<@{}>, invite links are not allowed here.", message.author_id)),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_invite_links_only() {
        let mut msg = IncomingMessage::test(1, 10, 20);
        msg.content = "come to discord.gg/abc".to_string();
        let outcome = InviteFilter.run(&msg, None).unwrap();
        assert_eq!(outcome.actions.len(), 2);
        assert!(outcome.report.contains("<#10>"));

        msg.content = "see discord.com for details".to_string();
        assert!(InviteFilter.run(&msg, None).is_none());
    }
}
