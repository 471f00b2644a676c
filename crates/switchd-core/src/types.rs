use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a configured switch (the key under `[switches.<id>]`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwitchId(pub String);

impl SwitchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SwitchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SwitchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a switch decides its level.
///
/// Serialized as its integer code so persisted records stay compatible with
/// front-ends that post the raw number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Mode {
    /// Follow the active schedule.
    #[default]
    Auto,
    /// On until the next schedule transition.
    KeepOn,
    /// Off until the next schedule transition.
    KeepOff,
    /// On until the mode is changed by hand.
    AlwaysOn,
    /// Off until the mode is changed by hand.
    AlwaysOff,
    /// Reserved; never accepted by the dispatcher.
    Timer,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Auto,
        Mode::KeepOn,
        Mode::KeepOff,
        Mode::AlwaysOn,
        Mode::AlwaysOff,
        Mode::Timer,
    ];

    pub fn code(self) -> i64 {
        match self {
            Mode::Auto => 0,
            Mode::KeepOn => 1,
            Mode::KeepOff => 2,
            Mode::AlwaysOn => 3,
            Mode::AlwaysOff => 4,
            Mode::Timer => 5,
        }
    }

    /// Human-readable label shown in UIs.
    pub fn name(self) -> &'static str {
        match self {
            Mode::Auto => "Automated schedule",
            Mode::KeepOn => "Keep ON",
            Mode::KeepOff => "Keep OFF",
            Mode::AlwaysOn => "Always ON",
            Mode::AlwaysOff => "Always OFF",
            Mode::Timer => "Timer",
        }
    }

    /// Whether schedule transitions still reach a switch in this mode.
    ///
    /// Temporary overrides stay governed: the next transition releases them.
    pub fn is_schedule_governed(self) -> bool {
        matches!(self, Mode::Auto | Mode::KeepOn | Mode::KeepOff)
    }

    /// Temporary override released by the next schedule transition.
    pub fn is_temporary(self) -> bool {
        matches!(self, Mode::KeepOn | Mode::KeepOff)
    }

    /// Modes that pin the switch at level 0 whatever level is requested.
    pub fn forces_off(self) -> bool {
        matches!(self, Mode::KeepOff | Mode::AlwaysOff)
    }
}

impl TryFrom<i64> for Mode {
    type Error = String;

    fn try_from(code: i64) -> std::result::Result<Self, Self::Error> {
        Mode::ALL
            .into_iter()
            .find(|m| m.code() == code)
            .ok_or_else(|| format!("unknown mode: {code}"))
    }
}

impl From<Mode> for i64 {
    fn from(mode: Mode) -> Self {
        mode.code()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
