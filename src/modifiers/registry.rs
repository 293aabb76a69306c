use std::{collections::BTreeMap, fmt};

use super::{FlagsModifier, Modifier};
use crate::config::{ConfigError, Configuration};

/// Every modifier the proxy knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKind {
    Flags,
}

impl ModifierKind {
    pub const ALL: [ModifierKind; 1] = [Self::Flags];

    pub fn spec(self) -> ModifierSpec {
        match self {
            Self::Flags => FlagsModifier::spec(),
        }
    }
}

/// Builds a modifier instance from the complete configuration.
pub type BuildModifier = fn(&Configuration) -> Result<Box<dyn Modifier>, ConfigError>;

/// Static declaration of a modifier.
#[derive(Clone, Copy)]
pub struct ModifierSpec {
    pub kind: ModifierKind,
    /// Unique name, also the name of its configuration section.
    pub name: &'static str,
    /// Configuration keys with their defaults.
    pub defaults: &'static [(&'static str, &'static str)],
    pub build: BuildModifier,
}

impl fmt::Debug for ModifierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierSpec")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Case-insensitive name -> modifier mapping.
#[derive(Debug, Clone, Default)]
pub struct ModifierRegistry {
    specs: BTreeMap<String, ModifierSpec>,
}

impl ModifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in modifiers.
    pub fn builtin() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for kind in ModifierKind::ALL {
            registry.register(kind.spec())?;
        }
        Ok(registry)
    }

    /// Adds a modifier. Names must be unique, ignoring case.
    pub fn register(&mut self, spec: ModifierSpec) -> Result<(), ConfigError> {
        let key = spec.name.to_lowercase();
        if self.specs.contains_key(&key) {
            return Err(ConfigError::DuplicateModifier(spec.name.to_string()));
        }
        tracing::trace!("Registered modifier {} ({:?}).", spec.name, spec.kind);
        self.specs.insert(key, spec);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&ModifierSpec> {
        self.specs.get(&name.to_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.specs.values().map(|spec| spec.name).collect()
    }

    /// Fills the defaults of every modifier named in `modifiers`.
    /// Fails on the first name that is not registered.
    pub fn fill_defaults(&self, configuration: &mut Configuration, modifiers: &[String]) -> Result<(), ConfigError> {
        for name in modifiers {
            let spec = self
                .lookup(name)
                .ok_or_else(|| ConfigError::UnknownModifier(name.clone()))?;
            configuration.fill_defaults(spec.name, spec.defaults);
        }
        Ok(())
    }
}
