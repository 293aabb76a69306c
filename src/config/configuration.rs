//! Layered key/value configuration.
//!
//! Values come from the configuration file and the command line. Compiled-in
//! defaults are layered in last and only fill keys that are still missing, so an
//! explicit value is never overwritten by a default.

use serde::Deserialize;
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use super::ConfigError;

/// A single value as it can appear in the TOML file.
/// Everything is normalized to a string inside the store.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Text(String),
    Flag(bool),
    Integer(i64),
    Float(f64),
    List(Vec<String>),
}

impl From<RawValue> for String {
    fn from(value: RawValue) -> Self {
        match value {
            RawValue::Text(text) => text,
            RawValue::Flag(flag) => flag.to_string(),
            RawValue::Integer(number) => number.to_string(),
            RawValue::Float(number) => number.to_string(),
            RawValue::List(items) => items.join(" "),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Section {
    /// Lowercased key -> value.
    values: BTreeMap<String, String>,
}

/// Sections of key/value pairs. Section names and keys are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    sections: BTreeMap<String, Section>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document where every top-level table is one section.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let raw: BTreeMap<String, BTreeMap<String, RawValue>> = toml::from_str(content)?;
        let mut configuration = Self::new();
        for (section, values) in raw {
            configuration.section_mut(&section);
            for (key, value) in values {
                configuration.set(&section, &key, value);
            }
        }
        Ok(configuration)
    }

    fn section_mut(&mut self, section: &str) -> &mut Section {
        self.sections.entry(section.to_lowercase()).or_default()
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(&section.to_lowercase())
    }

    /// Sets a value, replacing whatever was there before.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.section_mut(section)
            .values
            .insert(key.to_lowercase(), value.into());
    }

    /// Sets a value only if the key is missing. Returns true if the default was used.
    pub fn set_default(&mut self, section: &str, key: &str, value: impl Into<String>) -> bool {
        let values = &mut self.section_mut(section).values;
        let key = key.to_lowercase();
        if values.contains_key(&key) {
            return false;
        }
        values.insert(key, value.into());
        true
    }

    /// Fills all missing keys of a section with the given defaults.
    pub fn fill_defaults(&mut self, section: &str, defaults: &[(&str, &str)]) {
        self.section_mut(section);
        for (key, value) in defaults {
            self.set_default(section, key, *value);
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&section.to_lowercase())
            .and_then(|section| section.values.get(&key.to_lowercase()))
            .map(String::as_str)
    }

    /// Whitespace separated list. A missing key is an empty list.
    pub fn get_list(&self, section: &str, key: &str) -> Vec<&str> {
        self.get(section, key)
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Parses a value with `FromStr`. A missing key is `Ok(None)`.
    pub fn get_parsed<T>(&self, section: &str, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = match self.get(section, key) {
            Some(value) => value,
            None => return Ok(None),
        };
        value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                reason: err.to_string(),
            })
    }
}

/// Interprets `1 yes true on` and `0 no false off`, case-insensitive.
pub fn parse_bool_like(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
