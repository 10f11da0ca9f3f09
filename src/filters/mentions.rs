use super::{Filter, FilterAction, FilterOutcome};
use crate::dispatch::IncomingMessage;
use crate::guild::CommandSettings;

pub const DEFAULT_THRESHOLD: u64 = 5;

/// Removes messages that mention more than `threshold` distinct users.
pub struct MentionFilter;

fn threshold(settings: Option<&CommandSettings>) -> u64 {
    settings
        .and_then(|s| s.data.get("threshold"))
        .and_then(|v| v.as_u64())
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_THRESHOLD)
}

impl Filter for MentionFilter {
    fn name(&self) -> &'static str {
        "mentions"
    }

    fn description(&self) -> &'static str {
        "Deletes messages that mention too many users"
    }

    fn run(&self, message: &IncomingMessage, settings: Option<&CommandSettings>) -> Option<FilterOutcome> {
        let limit = threshold(settings);
        let count = message.mentions.len() as u64;
        if count <= limit {
            return None;
        }
        Some(FilterOutcome {
            report: format!("Mentioned {} users (limit {})", count, limit),
            actions: vec![
                FilterAction::Delete,
                FilterAction::Reply(format!("<@{}>, please don't mass mention.", message.author_id)),
            ],
        })
    }
}
