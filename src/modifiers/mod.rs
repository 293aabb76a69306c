//! Response modifiers and the chain that applies them.

mod flags_modifier;
mod modification_chain;
mod modifier;
mod registry;

pub use flags_modifier::{FlagsModifier, HeaderFlag};
pub use modification_chain::ModificationChain;
pub use modifier::{FlagAction, Modifier};
pub use registry::{ModifierKind, ModifierRegistry, ModifierSpec};
