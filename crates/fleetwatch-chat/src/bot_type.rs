//! Bot identities the dispatcher can address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One independently-credentialed chat identity. `agent-type -> bot-type`
/// routing and credential fallback (to [`BotType::System`]) both key off
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    System,
    Monitor,
    Orchestrator,
    Build,
    Spec,
    Validation,
    Sia,
    Planning,
    Clarification,
    Human,
}

impl BotType {
    pub const ALL: &'static [BotType] = &[
        BotType::System,
        BotType::Monitor,
        BotType::Orchestrator,
        BotType::Build,
        BotType::Spec,
        BotType::Validation,
        BotType::Sia,
        BotType::Planning,
        BotType::Clarification,
        BotType::Human,
    ];

    /// Upper-snake-case suffix used in `FLEETWATCH_BOT_<TYPE>` and
    /// `[chat.bots]` config keys.
    pub fn env_suffix(self) -> &'static str {
        match self {
            BotType::System => "SYSTEM",
            BotType::Monitor => "MONITOR",
            BotType::Orchestrator => "ORCHESTRATOR",
            BotType::Build => "BUILD",
            BotType::Spec => "SPEC",
            BotType::Validation => "VALIDATION",
            BotType::Sia => "SIA",
            BotType::Planning => "PLANNING",
            BotType::Clarification => "CLARIFICATION",
            BotType::Human => "HUMAN",
        }
    }

    pub fn from_env_suffix(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.env_suffix().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_suffix().to_lowercase().as_str())
    }
}

impl FromStr for BotType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_env_suffix(s).ok_or(())
    }
}
