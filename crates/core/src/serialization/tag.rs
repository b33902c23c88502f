use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::Value as YamlValue;

use super::error::{Result, SerializationError};

/// The version part of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMatch {
    Exact(u32),
    /// Accepts any version without an exact loader.
    Any,
}

impl std::fmt::Display for VersionMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionMatch::Exact(v) => write!(f, "{v}"),
            VersionMatch::Any => f.write_str("any"),
        }
    }
}

pub(crate) fn make_tag(tag: &str, version: u32) -> Tag {
    Tag::new(format!("{tag};{version}"))
}

pub(crate) fn tagged(tag: &str, version: u32, value: YamlValue) -> YamlValue {
    YamlValue::Tagged(Box::new(TaggedValue {
        tag: make_tag(tag, version),
        value,
    }))
}

/// Split `!name;version` into its parts. A tag without a version parses as
/// [`VersionMatch::Any`].
pub(crate) fn parse_tag(raw: &str) -> Result<(String, VersionMatch)> {
    let stripped = raw.trim_start_matches('!');
    if stripped.is_empty() {
        return Err(SerializationError::MalformedTag(raw.to_string()));
    }
    match stripped.rsplit_once(';') {
        Some((name, version)) => {
            let version = version
                .parse::<u32>()
                .map_err(|_| SerializationError::MalformedTag(raw.to_string()))?;
            if name.is_empty() {
                return Err(SerializationError::MalformedTag(raw.to_string()));
            }
            Ok((name.to_string(), VersionMatch::Exact(version)))
        }
        None => Ok((stripped.to_string(), VersionMatch::Any)),
    }
}

fn is_standard(tag: &Tag) -> bool {
    let raw = tag.to_string();
    raw.starts_with("!!") || raw.trim_start_matches('!').starts_with("tag:yaml.org")
}

/// Remove standard YAML tags (`!!python/tuple`, `!!set`, ...) left by
/// other writers, keeping the tagged content.
pub(crate) fn strip_standard_tags(value: YamlValue) -> YamlValue {
    match value {
        YamlValue::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            if is_standard(&tag) {
                strip_standard_tags(value)
            } else {
                YamlValue::Tagged(Box::new(TaggedValue {
                    tag,
                    value: strip_standard_tags(value),
                }))
            }
        }
        YamlValue::Sequence(seq) => {
            YamlValue::Sequence(seq.into_iter().map(strip_standard_tags).collect())
        }
        YamlValue::Mapping(map) => YamlValue::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, strip_standard_tags(v)))
                .collect(),
        ),
        other => other,
    }
}

pub(crate) fn kind_name(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "bool",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged node",
    }
}
