//! Error types for the serialization registry.

use thiserror::Error;

/// Errors raised while dumping or loading tagged documents.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// No loader is registered for this `(tag, version)`.
    #[error("no loader registered for tag '{tag}' version {version}")]
    UnknownTag { tag: String, version: String },

    /// No dumper is registered for the runtime type.
    #[error("no dumper registered for type {type_name}")]
    NoDumper { type_name: String },

    /// A pinned version has no dumper.
    #[error("tag '{tag}' has no dumper for version {version}")]
    NoDumperVersion { tag: String, version: u32 },

    /// A node that must carry a tag does not.
    #[error("expected a tagged node, found an untagged {0}")]
    Untagged(&'static str),

    /// The tag could not be split into a name and a version.
    #[error("malformed tag '{0}'")]
    MalformedTag(String),

    /// The loader produced a different type than the caller asked for.
    #[error("tag '{tag}' does not load as {expected}")]
    UnexpectedType { tag: String, expected: &'static str },

    /// The node's fields did not match the registered shape.
    #[error("failed to decode '{tag}': {message}")]
    Decode { tag: String, message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SerializationError>;
