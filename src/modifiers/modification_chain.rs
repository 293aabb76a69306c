use hickory_proto::op::Message;

use super::{Modifier, ModifierRegistry};
use crate::config::{ConfigError, Configuration, MODIFIERS, PROXY_SECTION};

/// Ordered list of modifiers applied to every response.
#[derive(Debug, Default)]
pub struct ModificationChain {
    modifiers: Vec<Box<dyn Modifier>>,
}

impl ModificationChain {
    /// Builds the chain from `[Proxy] Modifiers`, in the listed order.
    pub fn build(configuration: &Configuration, registry: &ModifierRegistry) -> Result<Self, ConfigError> {
        let mut modifiers = Vec::new();
        for name in configuration.get_list(PROXY_SECTION, MODIFIERS) {
            let spec = registry
                .lookup(name)
                .ok_or_else(|| ConfigError::UnknownModifier(name.to_string()))?;
            modifiers.push((spec.build)(configuration)?);
        }
        Ok(Self { modifiers })
    }

    #[cfg(test)]
    pub fn from_modifiers(modifiers: Vec<Box<dyn Modifier>>) -> Self {
        Self { modifiers }
    }

    /// Runs the message through every modifier. An empty chain returns it as is.
    pub fn apply(&self, message: Message) -> Message {
        self.modifiers
            .iter()
            .fold(message, |message, modifier| modifier.modify(message))
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modifiers.iter().map(|modifier| modifier.name()).collect()
    }
}
