use hickory_proto::op::{Edns, Message};

use super::{modifier::UNCHANGED, FlagAction, Modifier, ModifierKind, ModifierSpec};
use crate::config::{ConfigError, Configuration};

/// Header flags the modifier can edit. QR and opcode are never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFlag {
    /// Authoritative Answer, RFC 1035.
    Aa,
    /// Truncated Response, RFC 1035.
    Tc,
    /// Recursion Desired, RFC 1035.
    Rd,
    /// Recursion Available, RFC 1035.
    Ra,
    /// Authentic Data, RFC 4035.
    Ad,
    /// Checking Disabled, RFC 4035.
    Cd,
}

impl HeaderFlag {
    pub const ALL: [HeaderFlag; 6] = [Self::Aa, Self::Tc, Self::Rd, Self::Ra, Self::Ad, Self::Cd];

    /// Configuration key of the flag.
    pub fn key(self) -> &'static str {
        match self {
            Self::Aa => "AA",
            Self::Tc => "TC",
            Self::Rd => "RD",
            Self::Ra => "RA",
            Self::Ad => "AD",
            Self::Cd => "CD",
        }
    }

    pub fn is_set(self, message: &Message) -> bool {
        match self {
            Self::Aa => message.authoritative(),
            Self::Tc => message.truncated(),
            Self::Rd => message.recursion_desired(),
            Self::Ra => message.recursion_available(),
            Self::Ad => message.authentic_data(),
            Self::Cd => message.checking_disabled(),
        }
    }

    pub fn assign(self, message: &mut Message, value: bool) {
        match self {
            Self::Aa => message.set_authoritative(value),
            Self::Tc => message.set_truncated(value),
            Self::Rd => message.set_recursion_desired(value),
            Self::Ra => message.set_recursion_available(value),
            Self::Ad => message.set_authentic_data(value),
            Self::Cd => message.set_checking_disabled(value),
        };
    }
}

/// Configuration key of the EDNS DNSSEC OK bit, RFC 3225.
const DO_KEY: &str = "DO";

/// Sets, clears or keeps the DNS header flags and the EDNS DO bit.
/// Default for every flag is to keep it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagsModifier {
    header: [(HeaderFlag, FlagAction); 6],
    dnssec_ok: FlagAction,
}

impl Default for FlagsModifier {
    fn default() -> Self {
        Self {
            header: HeaderFlag::ALL.map(|flag| (flag, FlagAction::Unchanged)),
            dnssec_ok: FlagAction::Unchanged,
        }
    }
}

impl FlagsModifier {
    pub const NAME: &'static str = "FlagsModifier";

    pub const DEFAULTS: &'static [(&'static str, &'static str)] = &[
        ("AA", UNCHANGED),
        ("TC", UNCHANGED),
        ("RD", UNCHANGED),
        ("RA", UNCHANGED),
        ("AD", UNCHANGED),
        ("CD", UNCHANGED),
        (DO_KEY, UNCHANGED),
    ];

    pub fn spec() -> ModifierSpec {
        ModifierSpec {
            kind: ModifierKind::Flags,
            name: Self::NAME,
            defaults: Self::DEFAULTS,
            build,
        }
    }

    /// Reads the `[FlagsModifier]` section.
    /// Invalid values are logged and treated as unchanged.
    pub fn from_configuration(configuration: &Configuration) -> Self {
        let mut modifier = Self::default();
        for (flag, action) in modifier.header.iter_mut() {
            *action = Self::read_action(configuration, flag.key());
        }
        modifier.dnssec_ok = Self::read_action(configuration, DO_KEY);
        modifier
    }

    fn read_action(configuration: &Configuration, key: &str) -> FlagAction {
        let value = match configuration.get(Self::NAME, key) {
            Some(value) => value,
            None => return FlagAction::Unchanged,
        };
        match FlagAction::parse(value) {
            Some(action) => action,
            None => {
                tracing::error!("Wrong value '{value}' in configuration for {key}. Keep it unchanged.");
                FlagAction::Unchanged
            }
        }
    }

    #[cfg(test)]
    pub fn with(mut self, flag: HeaderFlag, action: FlagAction) -> Self {
        for (current, current_action) in self.header.iter_mut() {
            if *current == flag {
                *current_action = action;
            }
        }
        self
    }

    #[cfg(test)]
    pub fn with_dnssec_ok(mut self, action: FlagAction) -> Self {
        self.dnssec_ok = action;
        self
    }

    #[cfg(test)]
    pub fn action(&self, flag: HeaderFlag) -> FlagAction {
        self.header
            .iter()
            .find(|(current, _)| *current == flag)
            .map(|(_, action)| *action)
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn dnssec_ok_action(&self) -> FlagAction {
        self.dnssec_ok
    }

    fn modify_dnssec_ok(&self, message: &mut Message) {
        match self.dnssec_ok {
            FlagAction::Unchanged => {}
            FlagAction::Set => {
                if message.extensions().is_none() {
                    tracing::debug!("EDNS not used. Enabling EDNS0.");
                }
                let edns = message.extensions_mut().get_or_insert_with(Edns::new);
                tracing::debug!("Setting DO flag");
                edns.set_dnssec_ok(true);
            }
            FlagAction::Clear => {
                if let Some(edns) = message.extensions_mut() {
                    tracing::debug!("Clearing DO flag");
                    edns.set_dnssec_ok(false);
                }
            }
        }
    }
}

impl Modifier for FlagsModifier {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn modify(&self, mut message: Message) -> Message {
        for (flag, action) in self.header {
            match action {
                FlagAction::Unchanged => continue,
                FlagAction::Set => tracing::debug!("Setting {} flag", flag.key()),
                FlagAction::Clear => tracing::debug!("Clearing {} flag", flag.key()),
            }
            let value = action.apply(flag.is_set(&message));
            flag.assign(&mut message, value);
        }
        self.modify_dnssec_ok(&mut message);
        message
    }
}

fn build(configuration: &Configuration) -> Result<Box<dyn Modifier>, ConfigError> {
    Ok(Box::new(FlagsModifier::from_configuration(configuration)))
}
