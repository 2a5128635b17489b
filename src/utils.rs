//! Utility helpers shared across the hiltestor crate.
//!
//! File readers for the TOML/YAML inputs, the whitespace-or-list deserializer used by
//! the Zephyr-style YAML files, and small id helpers.

use anyhow::{Context, Result};
use log::error;
use serde::de::{self, DeserializeOwned, Deserializer, SeqAccess, Visitor};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Reads a TOML file into an arbitrary struct.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its content does not deserialize.
pub fn read_toml_from_file<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match toml::de::from_str(&content) {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to parse TOML file {}: {e}", path.display());
            Err(e).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }
}

/// Splits a YAML scalar that may hold several whitespace separated items.
pub fn split_words(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split_whitespace().map(str::to_string)
}

/// Deserializes either a whitespace separated string or a sequence of strings into a set.
///
/// Zephyr-style YAML writes `tags: kernel userspace` and `tags: [kernel, userspace]`
/// interchangeably.
pub fn string_or_set<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer
        .deserialize_any(WordsVisitor)
        .map(|words| words.into_iter().collect())
}

/// Same as [`string_or_set`] but keeps declaration order and duplicates.
pub fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(WordsVisitor)
}

struct WordsVisitor;

impl<'de> Visitor<'de> for WordsVisitor {
    type Value = Vec<String>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a whitespace separated string or a list of strings")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
        Ok(split_words(v).collect())
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut out = Vec::new();
        while let Some(item) = seq.next_element::<serde_yaml::Value>()? {
            match item {
                serde_yaml::Value::String(s) => out.push(s),
                serde_yaml::Value::Number(n) => out.push(n.to_string()),
                serde_yaml::Value::Bool(b) => out.push(b.to_string()),
                other => {
                    return Err(de::Error::custom(format!(
                        "expected a string list item, found {other:?}"
                    )));
                }
            }
        }
        Ok(out)
    }
}

/// Builds the instance id used for build directories and log lines.
pub fn instance_name(platform: &str, scenario: &str) -> String {
    format!("{platform}/{scenario}")
}

/// Turns an instance name into a relative directory name that is safe on every host.
pub fn sanitize_path_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | ' ' => '_',
            other => other,
        })
        .collect()
}
