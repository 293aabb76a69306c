use hickory_proto::op::Message;
use std::fmt::Debug;

use crate::config::parse_bool_like;

/// Literal configuration value that leaves a flag as the upstream sent it.
pub const UNCHANGED: &str = "unchanged";

/// Edits a response before it is sent back to the client.
///
/// Instances are built once at startup and shared by every exchange.
pub trait Modifier: Send + Sync + Debug {
    /// Name of the modifier, equal to its configuration section.
    fn name(&self) -> &'static str;

    /// Applies the edit. Never fails.
    fn modify(&self, message: Message) -> Message;
}

/// What to do with a single flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagAction {
    Set,
    Clear,
    #[default]
    Unchanged,
}

impl FlagAction {
    /// Parses `unchanged` or a boolean-like value. None on anything else.
    pub fn parse(value: &str) -> Option<Self> {
        if value.trim().eq_ignore_ascii_case(UNCHANGED) {
            return Some(Self::Unchanged);
        }
        parse_bool_like(value).map(|set| if set { Self::Set } else { Self::Clear })
    }

    /// The flag value after applying this action to `current`.
    pub fn apply(self, current: bool) -> bool {
        match self {
            Self::Set => true,
            Self::Clear => false,
            Self::Unchanged => current,
        }
    }
}
