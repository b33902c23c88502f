//! Worker that owns a workflow and serves commands.
//!
//! The WorkflowManager moves a [`Workflow`] onto a blocking worker thread.
//! Front ends send [`Command`]s over a channel and receive the workflow's
//! [`Event`]s on another. Commands are processed strictly in order; the
//! events produced by one command are all sent before the next command is
//! read.
//!
//! The worker waits for room in the events channel until shutdown is
//! requested. From then on, events that do not fit are dropped, so an
//! events channel nobody reads cannot stall [`WorkflowManager::shutdown`].

use anyhow::{Context, Result};
use cf_protocol::ipc::{Command, Event};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::WorkflowError;
use crate::operations::WorkflowOperation;
use crate::serialization::registry;
use crate::workflow::{Workflow, WorkflowItem};

pub const TRACING_TARGET: &str = "cf_core::state";

/// Owns a workflow on a worker thread.
pub struct WorkflowManager {
    /// Channel for sending commands to the worker.
    commands_tx: mpsc::Sender<Command>,

    /// Raised by `shutdown`.
    stop_tx: watch::Sender<bool>,

    /// The worker; yields the workflow when it stops.
    worker: JoinHandle<Workflow>,
}

impl WorkflowManager {
    /// Start a worker that owns `workflow`.
    ///
    /// # Arguments
    ///
    /// * `workflow` - The workflow to serve
    /// * `events_tx` - Channel for sending events to the front end
    pub fn spawn(workflow: Workflow, events_tx: mpsc::Sender<Event>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let sink = EventSink {
            tx: events_tx,
            stop: stop_rx,
            runtime: Handle::current(),
        };
        let worker = tokio::task::spawn_blocking(move || serve(workflow, commands_rx, sink));
        Self {
            commands_tx,
            stop_tx,
            worker,
        }
    }

    /// A sender for queuing commands from other tasks.
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands_tx.clone()
    }

    /// Queue a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has already stopped.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands_tx
            .send(command)
            .await
            .context("workflow worker has stopped")
    }

    /// Stop the worker after it drains earlier commands.
    ///
    /// Events from the remaining commands, and the final
    /// `ShutdownComplete`, are delivered only while the events channel has
    /// room.
    ///
    /// # Returns
    ///
    /// The workflow, in the state the last command left it.
    pub async fn shutdown(self) -> Result<Workflow> {
        // The worker also stops when every sender is gone, so a closed
        // channel here is not an error.
        let _ = self.stop_tx.send(true);
        let _ = self.commands_tx.send(Command::Shutdown).await;
        drop(self.commands_tx);
        self.worker.await.context("workflow worker panicked")
    }
}

/// An events channel whose receiving end is a stream.
pub fn event_channel(buffer: usize) -> (mpsc::Sender<Event>, ReceiverStream<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ReceiverStream::new(rx))
}

/// The worker's end of the events channel.
struct EventSink {
    tx: mpsc::Sender<Event>,
    stop: watch::Receiver<bool>,
    runtime: Handle,
}

impl EventSink {
    fn deliver(&mut self, event: Event) {
        let Self { tx, stop, runtime } = self;
        let permit = runtime.block_on(async {
            tokio::select! {
                biased;
                permit = tx.reserve() => permit.ok(),
                Ok(_) = stop.wait_for(|stopping| *stopping) => tx.try_reserve().ok(),
            }
        });
        match permit {
            Some(permit) => permit.send(event),
            None => tracing::trace!(target: TRACING_TARGET, ?event, "event dropped"),
        }
    }
}

fn serve(
    mut workflow: Workflow,
    mut commands_rx: mpsc::Receiver<Command>,
    mut events: EventSink,
) -> Workflow {
    tracing::info!(target: TRACING_TARGET, items = workflow.len(), "workflow worker started");

    while let Some(command) = commands_rx.blocking_recv() {
        if matches!(command, Command::Shutdown) {
            break;
        }
        let name = command_name(&command);
        tracing::debug!(target: TRACING_TARGET, command = name, "handling command");

        let reply = execute(&mut workflow, command);
        for event in workflow.take_events() {
            events.deliver(event);
        }
        match reply {
            Ok(Some(event)) => events.deliver(event),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(target: TRACING_TARGET, command = name, error = %err, "command failed");
                events.deliver(Event::CommandFailed {
                    command: name.to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    events.deliver(Event::ShutdownComplete);
    tracing::info!(target: TRACING_TARGET, "workflow worker stopped");
    workflow
}

/// Carry out one command. Returns the reply event, if the command has one.
fn execute(workflow: &mut Workflow, command: Command) -> Result<Option<Event>, WorkflowError> {
    match command {
        Command::AddOperation { index, document } => {
            let operation: Box<dyn WorkflowOperation> = registry().from_yaml_str(&document)?;
            let item = WorkflowItem::new(operation);
            match index {
                Some(index) => workflow.insert(index, item)?,
                None => workflow.append(item)?,
            };
        }
        Command::RemoveItem { item_id } => {
            workflow.remove(item_id)?;
        }
        Command::Select { item_id } => workflow.select(item_id)?,
        Command::SetOperationParam {
            item_id,
            field,
            value,
        } => workflow.set_operation_param(item_id, &field, value)?,
        Command::SetViewParam {
            item_id,
            view_id,
            field,
            value,
        } => workflow.set_view_param(item_id, &view_id, &field, value)?,
        Command::SetCurrentView { item_id, view_id } => {
            workflow.set_current_view(item_id, &view_id)?
        }
        Command::Estimate { item_id } => workflow.estimate(item_id)?,
        Command::RunAll => workflow.run_all()?,
        Command::GetSnapshot => {
            return Ok(Some(Event::Snapshot {
                items: workflow.summaries(),
            }))
        }
        Command::Shutdown => {}
    }
    Ok(None)
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::AddOperation { .. } => "addOperation",
        Command::RemoveItem { .. } => "removeItem",
        Command::Select { .. } => "select",
        Command::SetOperationParam { .. } => "setOperationParam",
        Command::SetViewParam { .. } => "setViewParam",
        Command::SetCurrentView { .. } => "setCurrentView",
        Command::Estimate { .. } => "estimate",
        Command::RunAll => "runAll",
        Command::GetSnapshot => "getSnapshot",
        Command::Shutdown => "shutdown",
    }
}
