use cf_protocol::*;
use std::collections::BTreeMap;
use uuid::Uuid;

#[test]
fn test_command_round_trip_through_json() {
    let item_id = Uuid::new_v4();
    let commands = vec![
        Command::AddOperation {
            index: Some(1),
            document: "!threshold;1 {name: T, channel: Y2-A, threshold: 300.0}".to_string(),
        },
        Command::SetViewParam {
            item_id,
            view_id: "histogram".to_string(),
            field: "channel".to_string(),
            value: serde_json::json!("Y2-A"),
        },
        Command::Select { item_id: None },
        Command::GetSnapshot,
    ];

    for command in commands {
        let json = serde_json::to_string(&command).expect("Failed to serialize Command");
        let back: Command = serde_json::from_str(&json).expect("Failed to deserialize Command");
        assert_eq!(
            serde_json::to_value(&back).expect("Failed to serialize Command"),
            serde_json::to_value(&command).expect("Failed to serialize Command")
        );
    }
}

#[test]
fn test_event_diagnostic_shape() {
    let item_id = Uuid::new_v4();
    let event = Event::ItemDiagnostic {
        item_id,
        kind: DiagnosticKind::OpError,
        message: Some("Threshold must be set".to_string()),
        field: Some("threshold".to_string()),
    };

    let json = serde_json::to_value(&event).expect("Failed to serialize Event");
    assert_eq!(json["type"], "itemDiagnostic");
    assert_eq!(json["payload"]["kind"], "opError");
    assert_eq!(json["payload"]["field"], "threshold");

    let back: Event = serde_json::from_value(json).expect("Failed to deserialize Event");
    assert_eq!(back, event);
}

#[test]
fn test_change_raised_uses_screaming_kind() {
    let event = Event::ChangeRaised {
        item_id: Uuid::new_v4(),
        kind: Changed::PrevResult,
        field: None,
    };
    let json = serde_json::to_value(&event).expect("Failed to serialize Event");
    assert_eq!(json["payload"]["kind"], "PREV_RESULT");
}

#[test]
fn test_change_event_payload_tagging() {
    let event = ChangeEvent::new(Changed::View, ChangePayload::view_field("histogram", "huefacet"));
    let json = serde_json::to_value(&event).expect("Failed to serialize ChangeEvent");
    assert_eq!(json["kind"], "VIEW");
    assert_eq!(json["payload"]["type"], "viewField");
    assert_eq!(json["payload"]["view_id"], "histogram");

    let item = serde_json::to_value(ChangeEvent::item(Changed::Result))
        .expect("Failed to serialize ChangeEvent");
    assert_eq!(item["payload"]["type"], "item");
}

#[test]
fn test_snapshot_summary_round_trip() {
    let summary = ItemSummary {
        id: Uuid::new_v4(),
        index: 2,
        operation: "kmeans".to_string(),
        name: Some("K".to_string()),
        status: ItemStatus::Invalid,
        events: None,
        channels: vec!["V2-A".to_string(), "Y2-A".to_string()],
        conditions: BTreeMap::from([("T".to_string(), "bool".to_string())]),
        statistics: vec![("K".to_string(), "count".to_string())],
        current_view: Some("kmeans".to_string()),
        diagnostics: BTreeMap::from([(
            "op_error".to_string(),
            Diagnostic::new("Click Estimate!", None),
        )]),
    };
    let event = Event::Snapshot {
        items: vec![summary.clone()],
    };

    let json = serde_json::to_string(&event).expect("Failed to serialize Snapshot");
    let back: Event = serde_json::from_str(&json).expect("Failed to deserialize Snapshot");
    assert_eq!(back, Event::Snapshot { items: vec![summary] });
}

#[test]
fn test_global_config_from_toml() {
    let config: GlobalConfig = toml::from_str(
        r#"
[serialization]
lock_versions = { "range-view" = 1 }
"#,
    )
    .expect("Failed to parse config");

    assert_eq!(config.serialization.lock_versions.get("range-view"), Some(&1));
    assert_eq!(config.workflow, WorkflowConfig::default());
}
