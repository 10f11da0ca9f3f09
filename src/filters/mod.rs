//! Message filters for member-level chat that is not a command.
//!
//! A filter is active in a guild only after `filter enable <name>`. The first
//! active filter that matches wins; its actions are executed by the dispatcher.

use crate::dispatch::IncomingMessage;
use crate::error::Result;
use crate::guild::{CommandSettings, GuildHandle};
use std::sync::Arc;

pub mod invites;
pub mod mentions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    Delete,
    Reply(String),
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Case reason recorded for moderators.
    pub report: String,
    pub actions: Vec<FilterAction>,
}

pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Requires the guild's `Commands` field.
    fn is_active(&self, guild: &GuildHandle) -> Result<bool> {
        guild.filter_is_enabled(self.name())
    }

    fn run(&self, message: &IncomingMessage, settings: Option<&CommandSettings>) -> Option<FilterOutcome>;
}

pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(invites::InviteFilter),
            Arc::new(mentions::MentionFilter),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.iter().find(|f| f.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Filter>> {
        self.filters.iter()
    }

    /// Runs active filters in order and returns the first match.
    pub fn evaluate(
        &self,
        guild: &GuildHandle,
        message: &IncomingMessage,
    ) -> Result<Option<(&'static str, FilterOutcome)>> {
        for filter in &self.filters {
            if !filter.is_active(guild)? {
                continue;
            }
            let settings = guild.command_settings(filter.name())?;
            if let Some(outcome) = filter.run(message, settings.as_ref()) {
                return Ok(Some((filter.name(), outcome)));
            }
        }
        Ok(None)
    }
}
