//! Command definitions and the immutable registry built from them.
//!
//! Registration runs in two passes: commands are collected and checked for
//! duplicate names, then the category tree is laid out as an arena of nodes.
//! Nothing in the registry changes after `build` returns.

use crate::dispatch::CommandContext;
use crate::error::{BotError, Result};
use crate::permissions::PermLevel;
use crate::session::CachePayload;
use crate::Error;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Static metadata for a command.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    /// Unique, lowercase.
    pub name: &'static str,
    /// Category the command is defined in, slash-delimited. Empty is the root.
    pub category: &'static str,
    /// Overrides `category` in the tree when set.
    pub path: Option<&'static str>,
    pub description: &'static str,
    pub usage: &'static str,
    pub examples: &'static [&'static str],
    /// Whether the command may run in direct messages.
    pub dm: bool,
    pub perm_level: PermLevel,
    pub togglable: bool,
    pub local_cooldown: Option<Duration>,
    pub global_cooldown: Option<Duration>,
}

impl CommandInfo {
    pub const fn new(name: &'static str, category: &'static str) -> Self {
        Self {
            name,
            category,
            path: None,
            description: "",
            usage: "",
            examples: &[],
            dm: false,
            perm_level: PermLevel::Member,
            togglable: false,
            local_cooldown: None,
            global_cooldown: None,
        }
    }

    pub const fn description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn usage(mut self, usage: &'static str) -> Self {
        self.usage = usage;
        self
    }

    pub const fn examples(mut self, examples: &'static [&'static str]) -> Self {
        self.examples = examples;
        self
    }

    pub const fn dm(mut self, dm: bool) -> Self {
        self.dm = dm;
        self
    }

    pub const fn perm_level(mut self, level: PermLevel) -> Self {
        self.perm_level = level;
        self
    }

    pub const fn togglable(mut self, togglable: bool) -> Self {
        self.togglable = togglable;
        self
    }

    pub const fn local_cooldown(mut self, cooldown: Duration) -> Self {
        self.local_cooldown = Some(cooldown);
        self
    }

    pub const fn global_cooldown(mut self, cooldown: Duration) -> Self {
        self.global_cooldown = Some(cooldown);
        self
    }

    pub const fn path(mut self, path: &'static str) -> Self {
        self.path = Some(path);
        self
    }

    pub fn resolved_category(&self) -> &'static str {
        self.path.unwrap_or(self.category)
    }

    /// Usage text for help output and wrong-context replies.
    pub fn help_text(&self, prefix: &str) -> String {
        let mut out = format!("**{}{}**", prefix, self.name);
        if !self.description.is_empty() {
            out.push_str(&format!(" - {}", self.description));
        }
        if !self.usage.is_empty() {
            out.push_str(&format!("\nUsage: `{}{} {}`", prefix, self.name, self.usage));
        }
        for example in self.examples {
            out.push_str(&format!("\nExample: `{}{}`", prefix, example));
        }
        out
    }
}

/// What a handler reports back. Only successful runs consume a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Unsuccessful,
}

#[async_trait]
pub trait Command: Send + Sync {
    fn info(&self) -> &CommandInfo;

    async fn run(&self, ctx: CommandContext<'_>) -> std::result::Result<CommandOutcome, Error>;

    /// Whether a stored session payload has a shape this command understands.
    fn accepts_cache(&self, _payload: &CachePayload) -> bool {
        true
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

#[derive(Debug)]
struct CategoryNode {
    name: String,
    path: String,
    children: BTreeMap<String, usize>,
    commands: Vec<usize>,
}

impl CategoryNode {
    fn new(name: String, path: String) -> Self {
        Self {
            name,
            path,
            children: BTreeMap::new(),
            commands: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    commands: Vec<Arc<dyn Command>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, command: Arc<dyn Command>) -> Self {
        self.commands.push(command);
        self
    }

    pub fn build(self) -> Result<CommandRegistry> {
        let mut by_name = HashMap::with_capacity(self.commands.len());
        for (idx, command) in self.commands.iter().enumerate() {
            let name = command.info().name;
            if by_name.insert(name, idx).is_some() {
                return Err(BotError::DuplicateCommand(name.to_string()));
            }
        }

        let mut nodes = vec![CategoryNode::new(String::new(), String::new())];
        for (idx, command) in self.commands.iter().enumerate() {
            let mut current = 0;
            for segment in path_segments(command.info().resolved_category()) {
                current = match nodes[current].children.get(&segment) {
                    Some(&child) => child,
                    None => {
                        let path = if nodes[current].path.is_empty() {
                            segment.clone()
                        } else {
                            format!("{}/{}", nodes[current].path, segment)
                        };
                        nodes.push(CategoryNode::new(segment.clone(), path));
                        let child = nodes.len() - 1;
                        nodes[current].children.insert(segment, child);
                        child
                    }
                };
            }
            nodes[current].commands.push(idx);
        }

        debug!(
            "Command registry built: {} commands, {} categories",
            self.commands.len(),
            nodes.len() - 1
        );
        Ok(CommandRegistry {
            commands: self.commands,
            by_name,
            nodes,
        })
    }
}

pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    by_name: HashMap<&'static str, usize>,
    nodes: Vec<CategoryNode>,
}

impl CommandRegistry {
    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.by_name.get(name).map(|&idx| &self.commands[idx])
    }

    pub fn root(&self) -> Category<'_> {
        Category {
            registry: self,
            node: 0,
        }
    }

    /// The subtree at `path` (e.g. `"moderation/logs"`). An empty path is the root.
    pub fn resolve_category(&self, path: &str) -> Option<Category<'_>> {
        let mut current = 0;
        for segment in path_segments(path) {
            current = *self.nodes[current].children.get(&segment)?;
        }
        Some(Category {
            registry: self,
            node: current,
        })
    }

    pub fn commands(&self) -> impl Iterator<Item = &Arc<dyn Command>> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A read-only view of one category node.
#[derive(Clone, Copy)]
pub struct Category<'a> {
    registry: &'a CommandRegistry,
    node: usize,
}

impl<'a> Category<'a> {
    fn node(&self) -> &'a CategoryNode {
        &self.registry.nodes[self.node]
    }

    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    pub fn path(&self) -> &'a str {
        &self.node().path
    }

    pub fn is_root(&self) -> bool {
        self.node == 0
    }

    pub fn subcategories(&self) -> impl Iterator<Item = Category<'a>> + 'a {
        let registry = self.registry;
        self.node()
            .children
            .values()
            .map(move |&node| Category { registry, node })
    }

    pub fn commands(&self) -> impl Iterator<Item = &'a Arc<dyn Command>> + 'a {
        let registry = self.registry;
        self.node()
            .commands
            .iter()
            .map(move |&idx| &registry.commands[idx])
    }
}
