//! Permission levels and the pure resolver that derives them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered permission tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermLevel {
    Member = 0,
    Immune = 1,
    Mod = 2,
    Admin = 3,
    BotMaster = 4,
}

impl PermLevel {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(PermLevel::Member),
            1 => Some(PermLevel::Immune),
            2 => Some(PermLevel::Mod),
            3 => Some(PermLevel::Admin),
            4 => Some(PermLevel::BotMaster),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermLevel::Member => "member",
            PermLevel::Immune => "immune",
            PermLevel::Mod => "mod",
            PermLevel::Admin => "admin",
            PermLevel::BotMaster => "botMaster",
        }
    }
}

impl fmt::Display for PermLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guild-configurable ranks. Each maps onto the `PermLevel` of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    Admin,
    Mod,
    Immune,
}

impl Rank {
    pub const ALL: [Rank; 3] = [Rank::Admin, Rank::Mod, Rank::Immune];

    /// Storage key, also used in user-facing listings.
    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Admin => "admins",
            Rank::Mod => "mods",
            Rank::Immune => "immune",
        }
    }

    pub fn level(self) -> PermLevel {
        match self {
            Rank::Admin => PermLevel::Admin,
            Rank::Mod => PermLevel::Mod,
            Rank::Immune => PermLevel::Immune,
        }
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" | "admins" => Ok(Rank::Admin),
            "mod" | "mods" => Ok(Rank::Mod),
            "immune" => Ok(Rank::Immune),
            other => Err(format!("unknown rank `{}`", other)),
        }
    }
}

/// Rank membership lists. Entries are role or user ids, never duplicated within a rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranks {
    pub admins: Vec<u64>,
    pub mods: Vec<u64>,
    pub immune: Vec<u64>,
}

impl Ranks {
    pub fn get(&self, rank: Rank) -> &[u64] {
        match rank {
            Rank::Admin => &self.admins,
            Rank::Mod => &self.mods,
            Rank::Immune => &self.immune,
        }
    }

    pub fn get_mut(&mut self, rank: Rank) -> &mut Vec<u64> {
        match rank {
            Rank::Admin => &mut self.admins,
            Rank::Mod => &mut self.mods,
            Rank::Immune => &mut self.immune,
        }
    }

    /// Adds `id` to `rank`. Returns false if it was already present.
    pub fn insert(&mut self, rank: Rank, id: u64) -> bool {
        let list = self.get_mut(rank);
        if list.contains(&id) {
            return false;
        }
        list.push(id);
        true
    }

    pub fn remove(&mut self, rank: Rank, id: u64) -> bool {
        let list = self.get_mut(rank);
        let before = list.len();
        list.retain(|existing| *existing != id);
        list.len() != before
    }
}

/// The requesting identity as seen in one guild at request time.
#[derive(Debug, Clone, Copy)]
pub struct MemberIdentity<'a> {
    pub user_id: u64,
    pub role_ids: &'a [u64],
    /// Platform-native administrator capability (or guild ownership).
    pub is_platform_admin: bool,
}

impl MemberIdentity<'_> {
    fn matches(&self, ids: &[u64]) -> bool {
        ids.contains(&self.user_id) || self.role_ids.iter().any(|role| ids.contains(role))
    }
}

/// Derives a member's permission level, stopping at the highest matching tier.
pub fn resolve(member: &MemberIdentity<'_>, ranks: &Ranks, bot_masters: &[u64]) -> PermLevel {
    if bot_masters.contains(&member.user_id) {
        return PermLevel::BotMaster;
    }
    if member.is_platform_admin {
        return PermLevel::Admin;
    }
    for rank in Rank::ALL {
        if member.matches(ranks.get(rank)) {
            return rank.level();
        }
    }
    PermLevel::Member
}
