//! Versioned, tagged serialization.
//!
//! Every persisted node is a YAML value tagged `!name;version`. The
//! [`Registry`] maps runtime types to dumpers (one per version) and tags to
//! loaders (one per version, plus an optional wildcard). Saving picks the
//! newest dumper for a type unless a [`VersionLocks`] entry pins an older
//! one. Loading dispatches on the exact `(tag, version)` pair, so documents
//! written by any released version keep loading after the in-memory shape
//! moves on.
//!
//! ```text
//! - !workflow-item;4
//!   operation: !threshold;1
//!     name: T
//!     channel: Y2-A
//!     threshold: 300.0
//!   views: []
//!   current_view: null
//! ```

mod error;
mod tag;

pub use error::{Result, SerializationError};
pub use tag::VersionMatch;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value as YamlValue;
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use tag::{kind_name, parse_tag, strip_standard_tags, tagged};

pub const TRACING_TARGET: &str = "cf_core::serialization";

type DumpFn = Box<dyn Fn(&dyn Any, &DumpContext<'_>) -> Result<YamlValue> + Send + Sync>;
type LoadFn = Box<dyn Fn(YamlValue, &LoadContext<'_>) -> Result<Box<dyn Any>> + Send + Sync>;

struct Dumpers {
    tag: String,
    versions: BTreeMap<u32, DumpFn>,
}

#[derive(Default)]
struct Loaders {
    exact: BTreeMap<u32, LoadFn>,
    any: Option<LoadFn>,
}

/// Registered versions of one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub tag: String,
    pub dump_versions: Vec<u32>,
    pub load_versions: Vec<u32>,
    pub loads_any_version: bool,
}

/// Per-tag dumper version pins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionLocks(BTreeMap<String, u32>);

impl VersionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `tag` to `version` when saving.
    pub fn lock(mut self, tag: impl Into<String>, version: u32) -> Self {
        self.0.insert(tag.into(), version);
        self
    }

    pub fn get(&self, tag: &str) -> Option<u32> {
        self.0.get(tag).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, u32>> for VersionLocks {
    fn from(map: BTreeMap<String, u32>) -> Self {
        Self(map)
    }
}

/// Tag-to-type mapping with explicit versions.
#[derive(Default)]
pub struct Registry {
    dumpers: HashMap<TypeId, Dumpers>,
    loaders: BTreeMap<String, Loaders>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in subset, operation, view and
    /// workflow item dumper and loader.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::experiment::register_subsets(&mut registry);
        crate::operations::register(&mut registry);
        crate::views::register(&mut registry);
        crate::workflow::register(&mut registry);
        registry
    }

    /// Register `dump` as version `version` of `tag` for values of type `T`.
    ///
    /// A type has exactly one tag; registering under a new tag renames it.
    pub fn register_dumper<T, F>(&mut self, tag: &str, version: u32, dump: F)
    where
        T: Any,
        F: Fn(&T, &DumpContext<'_>) -> Result<YamlValue> + Send + Sync + 'static,
    {
        let entry = self
            .dumpers
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Dumpers {
                tag: tag.to_string(),
                versions: BTreeMap::new(),
            });
        entry.tag = tag.to_string();
        entry.versions.insert(
            version,
            Box::new(move |obj, ctx| {
                let obj = obj
                    .downcast_ref::<T>()
                    .ok_or_else(|| SerializationError::NoDumper {
                        type_name: type_name::<T>().to_string(),
                    })?;
                dump(obj, ctx)
            }),
        );
    }

    /// Register `load` for `tag` at `version`. The loader's output type `T`
    /// is what callers of [`LoadContext::load`] must ask for.
    pub fn register_loader<T, F>(&mut self, tag: &str, version: VersionMatch, load: F)
    where
        T: Any,
        F: Fn(YamlValue, &LoadContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let boxed: LoadFn =
            Box::new(move |value, ctx| load(value, ctx).map(|t| Box::new(t) as Box<dyn Any>));
        let entry = self.loaders.entry(tag.to_string()).or_default();
        match version {
            VersionMatch::Exact(v) => {
                entry.exact.insert(v, boxed);
            }
            VersionMatch::Any => entry.any = Some(boxed),
        }
    }

    /// The tag a value would be saved under.
    pub fn tag_of(&self, obj: &dyn Any) -> Option<&str> {
        self.dumpers
            .get(&<dyn Any>::type_id(obj))
            .map(|d| d.tag.as_str())
    }

    /// The newest dumper version of `tag`.
    pub fn current_version(&self, tag: &str) -> Option<u32> {
        self.dumpers
            .values()
            .filter(|d| d.tag == tag)
            .filter_map(|d| d.versions.keys().next_back().copied())
            .max()
    }

    /// Every registered tag with its dumper and loader versions.
    pub fn tags(&self) -> Vec<TagInfo> {
        let mut infos: BTreeMap<String, TagInfo> = BTreeMap::new();
        let blank = |tag: &str| TagInfo {
            tag: tag.to_string(),
            dump_versions: Vec::new(),
            load_versions: Vec::new(),
            loads_any_version: false,
        };
        for dumpers in self.dumpers.values() {
            let info = infos
                .entry(dumpers.tag.clone())
                .or_insert_with(|| blank(&dumpers.tag));
            info.dump_versions.extend(dumpers.versions.keys().copied());
            info.dump_versions.sort_unstable();
            info.dump_versions.dedup();
        }
        for (tag, loaders) in &self.loaders {
            let info = infos.entry(tag.clone()).or_insert_with(|| blank(tag));
            info.load_versions = loaders.exact.keys().copied().collect();
            info.loads_any_version = loaders.any.is_some();
        }
        infos.into_values().collect()
    }

    /// Dump a value to a tagged YAML node.
    pub fn dump(&self, obj: &dyn Any, locks: &VersionLocks) -> Result<YamlValue> {
        DumpContext {
            registry: self,
            locks,
        }
        .dump(obj)
    }

    /// Load a tagged YAML node as a `T`.
    pub fn load_value<T: Any>(&self, value: YamlValue) -> Result<T> {
        LoadContext { registry: self }.load(strip_standard_tags(value))
    }

    /// Dump values to an untagged sequence of tagged nodes.
    pub fn dump_seq<'b, I>(&self, items: I, locks: &VersionLocks) -> Result<YamlValue>
    where
        I: IntoIterator<Item = &'b dyn Any>,
    {
        DumpContext {
            registry: self,
            locks,
        }
        .dump_seq(items)
    }

    /// Load an untagged sequence of tagged nodes.
    pub fn load_seq<T: Any>(&self, value: YamlValue) -> Result<Vec<T>> {
        LoadContext { registry: self }.load_seq(strip_standard_tags(value))
    }

    pub fn to_yaml_string(&self, obj: &dyn Any, locks: &VersionLocks) -> Result<String> {
        Ok(serde_yaml::to_string(&self.dump(obj, locks)?)?)
    }

    pub fn from_yaml_str<T: Any>(&self, text: &str) -> Result<T> {
        let value: YamlValue = serde_yaml::from_str(text)?;
        self.load_value(value)
    }

    /// Write `obj` to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if a reachable type has no dumper or the file
    /// cannot be written.
    pub fn save(&self, obj: &dyn Any, path: &Path, locks: &VersionLocks) -> Result<()> {
        let text = self.to_yaml_string(obj, locks)?;
        std::fs::write(path, text).map_err(|source| SerializationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(target: TRACING_TARGET, path = %path.display(), "saved document");
        Ok(())
    }

    /// Read a `T` from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or any node's
    /// `(tag, version)` has no registered loader.
    pub fn load<T: Any>(&self, path: &Path) -> Result<T> {
        let text = std::fs::read_to_string(path).map_err(|source| SerializationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let loaded = self.from_yaml_str(&text)?;
        tracing::info!(target: TRACING_TARGET, path = %path.display(), "loaded document");
        Ok(loaded)
    }
}

/// The process-wide registry of built-in types.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::with_builtins)
}

/// Handed to dumpers so they can dump nested tagged values.
pub struct DumpContext<'a> {
    registry: &'a Registry,
    locks: &'a VersionLocks,
}

impl<'a> DumpContext<'a> {
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn dump(&self, obj: &dyn Any) -> Result<YamlValue> {
        let type_id = <dyn Any>::type_id(obj);
        let dumpers = self
            .registry
            .dumpers
            .get(&type_id)
            .ok_or_else(|| SerializationError::NoDumper {
                type_name: format!("{type_id:?}"),
            })?;
        let version = match self.locks.get(&dumpers.tag) {
            Some(version) => version,
            None => dumpers.versions.keys().next_back().copied().ok_or_else(|| {
                SerializationError::NoDumper {
                    type_name: dumpers.tag.clone(),
                }
            })?,
        };
        let dump = dumpers
            .versions
            .get(&version)
            .ok_or_else(|| SerializationError::NoDumperVersion {
                tag: dumpers.tag.clone(),
                version,
            })?;
        let body = dump(obj, self)?;
        Ok(tagged(&dumpers.tag, version, body))
    }

    /// Dump a sequence of values.
    pub fn dump_seq<'b, I>(&self, items: I) -> Result<YamlValue>
    where
        I: IntoIterator<Item = &'b dyn Any>,
    {
        items
            .into_iter()
            .map(|item| self.dump(item))
            .collect::<Result<Vec<_>>>()
            .map(YamlValue::Sequence)
    }
}

/// Handed to loaders so they can load nested tagged values.
pub struct LoadContext<'a> {
    registry: &'a Registry,
}

impl<'a> LoadContext<'a> {
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn load<T: Any>(&self, value: YamlValue) -> Result<T> {
        let YamlValue::Tagged(node) = value else {
            return Err(SerializationError::Untagged(kind_name(&value)));
        };
        let TaggedValue { tag, value } = *node;
        let (name, version) = parse_tag(&tag.to_string())?;
        let unknown = || SerializationError::UnknownTag {
            tag: name.clone(),
            version: version.to_string(),
        };
        let loaders = self.registry.loaders.get(&name).ok_or_else(unknown)?;
        let load = match version {
            VersionMatch::Exact(v) => loaders.exact.get(&v).or(loaders.any.as_ref()),
            VersionMatch::Any => loaders.any.as_ref(),
        }
        .ok_or_else(unknown)?;

        tracing::trace!(target: TRACING_TARGET, tag = %name, %version, "loading node");
        let loaded = load(value, self)?;
        loaded
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| SerializationError::UnexpectedType {
                tag: name,
                expected: type_name::<T>(),
            })
    }

    /// Load a sequence of tagged values. A null node is an empty sequence.
    pub fn load_seq<T: Any>(&self, value: YamlValue) -> Result<Vec<T>> {
        match value {
            YamlValue::Null => Ok(Vec::new()),
            YamlValue::Sequence(items) => items.into_iter().map(|item| self.load(item)).collect(),
            other => Err(SerializationError::Decode {
                tag: "sequence".to_string(),
                message: format!("expected a sequence, found {}", kind_name(&other)),
            }),
        }
    }
}

/// Serialize a plain serde value into a YAML node.
pub fn encode<T: Serialize>(value: &T) -> Result<YamlValue> {
    Ok(serde_yaml::to_value(value)?)
}

/// Deserialize a YAML node into a plain serde value, naming `tag` on failure.
pub fn decode<T: DeserializeOwned>(tag: &str, value: YamlValue) -> Result<T> {
    serde_yaml::from_value(value).map_err(|e| SerializationError::Decode {
        tag: tag.to_string(),
        message: e.to_string(),
    })
}
