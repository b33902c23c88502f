//! Integration tests for the workflow worker.
//!
//! These tests drive a workflow purely through protocol commands and
//! check the events that come back.

mod common;

use cf_core::state::{event_channel, WorkflowManager};
use cf_protocol::ipc::{Command, Event};
use cf_protocol::ItemStatus;
use common::*;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

async fn drain(mut events: ReceiverStream<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        let done = event == Event::ShutdownComplete;
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}

#[tokio::test]
async fn test_commands_edit_and_plot_the_workflow() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (workflow, _, gate_id) = create_gated_workflow(dir.path());
    let (tx, events) = event_channel(1024);
    let manager = WorkflowManager::spawn(workflow, tx);

    manager
        .send(Command::Select {
            item_id: Some(gate_id),
        })
        .await
        .unwrap();
    manager
        .send(Command::SetOperationParam {
            item_id: gate_id,
            field: "threshold".to_string(),
            value: json!(4500.0),
        })
        .await
        .unwrap();
    manager.send(Command::GetSnapshot).await.unwrap();
    let workflow = manager.shutdown().await.unwrap();

    let seen = drain(events).await;
    assert!(seen.contains(&Event::SelectionChanged {
        item_id: Some(gate_id)
    }));
    let plots = seen
        .iter()
        .filter(|e| matches!(e, Event::Plotted { item_id, .. } if *item_id == gate_id))
        .count();
    assert_eq!(plots, 2, "selection and edit should each plot once");

    let snapshot = seen
        .iter()
        .find_map(|e| match e {
            Event::Snapshot { items } => Some(items.clone()),
            _ => None,
        })
        .expect("Snapshot should be sent");
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].operation, "import");
    assert_eq!(snapshot[0].events, Some(6));
    assert_eq!(snapshot[1].status, ItemStatus::Valid);
    assert_eq!(snapshot[1].conditions.get("T").map(String::as_str), Some("bool"));
    assert_eq!(snapshot[1].current_view.as_deref(), Some("threshold-selection"));

    assert_eq!(seen.last(), Some(&Event::ShutdownComplete));
    assert_eq!(workflow.session().counters(gate_id).plots, 2);
}

#[tokio::test]
async fn test_commands_from_another_task_run_in_order() {
    let dir = create_tube_dir().expect("Failed to write tubes");
    let (mut workflow, import_id) = create_import_workflow(dir.path());
    workflow.take_events();
    let (tx, events) = event_channel(1024);
    let manager = WorkflowManager::spawn(workflow, tx);

    let commands = manager.commands();
    tokio::spawn(async move {
        let document = "!threshold;1\nname: T\nchannel: Y2-A\nthreshold: 300.0\n";
        for _ in 0..2 {
            let _ = commands
                .send(Command::AddOperation {
                    index: None,
                    document: document.to_string(),
                })
                .await;
        }
        let _ = commands.send(Command::RunAll).await;
    })
    .await
    .unwrap();
    let workflow = manager.shutdown().await.unwrap();

    assert_eq!(workflow.len(), 3);
    assert_eq!(workflow.items()[0].id(), import_id);
    assert_status(&workflow, workflow.items()[1].id(), ItemStatus::Valid);
    // The second gate reuses the column name.
    let duplicate = &workflow.items()[2];
    assert_eq!(duplicate.status(), ItemStatus::Invalid);
    assert_eq!(duplicate.op_error().unwrap().field.as_deref(), Some("name"));

    let seen = drain(events).await;
    let added = seen
        .iter()
        .filter(|e| matches!(e, Event::ItemAdded { .. }))
        .count();
    assert_eq!(added, 2);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, Event::CommandFailed { .. })));
}
