//! Saved form of workflow items.
//!
//! A workflow document is a plain YAML sequence of `!workflow-item;N`
//! nodes. Four item versions are understood:
//!
//! | Version | Differences from the current shape |
//! |---|---|
//! | 1 | `deletable`, `default_view`; statistics as `[name, statistic]` pairs |
//! | 2 | `deletable`, `default_view` |
//! | 3 | `default_view` |
//! | 4 | current |
//!
//! Older documents store `current_view` as an embedded view node instead
//! of the view id. Such a node is loaded and matched by id.

use cf_protocol::ItemStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;

use super::item::WorkflowItem;
use crate::experiment::{ConditionKind, StatisticKey};
use crate::operations::WorkflowOperation;
use crate::serialization::{
    decode, encode, DumpContext, LoadContext, Registry, Result, SerializationError, VersionMatch,
};
use crate::views::WorkflowView;

const TAG: &str = "workflow-item";

/// A statistic reference as written by versions 2 and later.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct StatisticRef {
    name: String,
    statistic: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct ItemDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deletable: Option<bool>,

    operation: YamlValue,

    #[serde(default)]
    views: YamlValue,

    #[serde(default)]
    channels: Vec<String>,

    #[serde(default)]
    conditions: BTreeMap<String, ConditionKind>,

    #[serde(default)]
    metadata: BTreeMap<String, JsonValue>,

    #[serde(default)]
    statistics: YamlValue,

    #[serde(default)]
    current_view: YamlValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_view: Option<YamlValue>,
}

fn dump_item(item: &WorkflowItem, ctx: &DumpContext<'_>, version: u32) -> Result<YamlValue> {
    let operation = item.operation();

    let statistics = if version == 1 {
        encode(&item.statistics())?
    } else {
        encode(
            &item
                .statistics()
                .iter()
                .map(|(name, statistic)| StatisticRef {
                    name: name.clone(),
                    statistic: statistic.clone(),
                })
                .collect::<Vec<_>>(),
        )?
    };

    let default_view = if version <= 3 {
        let fresh = operation.default_view();
        let view = fresh
            .as_ref()
            .and_then(|fresh| item.view(fresh.id()))
            .or(fresh.as_deref());
        Some(match view {
            Some(view) => ctx.dump(view.as_any())?,
            None => YamlValue::Null,
        })
    } else {
        None
    };

    let doc = ItemDoc {
        deletable: (version <= 2).then(|| operation.id() != "import"),
        operation: ctx.dump(operation.as_any())?,
        views: ctx.dump_seq(item.views().iter().map(|v| v.as_any()))?,
        channels: item.channels().to_vec(),
        conditions: item.conditions().clone(),
        metadata: item.metadata().clone(),
        statistics,
        current_view: encode(&item.current_view())?,
        default_view,
    };
    encode(&doc)
}

fn load_statistics(value: YamlValue, version: u32) -> Result<Vec<StatisticKey>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    if version == 1 {
        return decode(TAG, value);
    }
    let refs: Vec<StatisticRef> = decode(TAG, value)?;
    Ok(refs.into_iter().map(|r| (r.name, r.statistic)).collect())
}

fn load_item(value: YamlValue, ctx: &LoadContext<'_>, version: u32) -> Result<WorkflowItem> {
    // `deletable` and `default_view` are read and dropped.
    let doc: ItemDoc = decode(TAG, value)?;
    let operation: Box<dyn WorkflowOperation> = ctx.load(doc.operation)?;
    let mut views: Vec<Box<dyn WorkflowView>> = ctx.load_seq(doc.views)?;

    let current_view = match doc.current_view {
        YamlValue::Null => None,
        YamlValue::String(id) => Some(id),
        embedded @ YamlValue::Tagged(_) => {
            let view: Box<dyn WorkflowView> = ctx.load(embedded)?;
            let id = view.id().to_string();
            if !views.iter().any(|v| v.id() == id) {
                views.push(view);
            }
            Some(id)
        }
        other => {
            return Err(SerializationError::Decode {
                tag: TAG.to_string(),
                message: format!("current_view must be a view id or a view, found {other:?}"),
            })
        }
    };

    let statistics = load_statistics(doc.statistics, version)?;
    let mut item = WorkflowItem::from_parts(operation, views, current_view, ItemStatus::Loading);
    item.restore_status_fields(doc.channels, doc.conditions, doc.metadata, statistics);
    Ok(item)
}

pub(crate) fn register(registry: &mut Registry) {
    for version in 1..=4 {
        registry.register_dumper::<WorkflowItem, _>(TAG, version, move |item, ctx| {
            dump_item(item, ctx, version)
        });
        registry.register_loader(TAG, VersionMatch::Exact(version), move |value, ctx| {
            load_item(value, ctx, version)
        });
    }
}

/// Dump items to a YAML document.
pub(crate) fn items_to_yaml(
    items: &[WorkflowItem],
    registry: &Registry,
    locks: &crate::serialization::VersionLocks,
) -> Result<String> {
    let doc = registry.dump_seq(items.iter().map(|i| i as &dyn std::any::Any), locks)?;
    Ok(serde_yaml::to_string(&doc)?)
}

/// Load items from a YAML document.
pub(crate) fn items_from_yaml(text: &str, registry: &Registry) -> Result<Vec<WorkflowItem>> {
    let doc: YamlValue = serde_yaml::from_str(text)?;
    registry.load_seq(doc)
}
