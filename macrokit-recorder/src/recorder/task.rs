//! Channel front-end for [`CommandRecorder`]
//!
//! The input hook and the UI live on different threads. Both talk to the
//! recorder through one unbounded channel, and a single tokio task applies
//! the messages in arrival order, so the sequence only ever has one writer.

use macrokit::{CommandSequence, TargetWindow};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

use super::CommandRecorder;
use crate::events::{InputEvent, RecorderEvent, RecordingState};
use crate::{RecorderError, Result};

/// Requests understood by the recorder task
#[derive(Debug)]
pub enum RecorderMessage {
    Start {
        name: String,
        target: TargetWindow,
        reply: oneshot::Sender<Result<()>>,
    },
    InputObserved(InputEvent),
    Pause,
    Resume,
    Stop {
        reply: oneshot::Sender<Option<CommandSequence>>,
    },
    AddWait {
        ms: u64,
        reply: oneshot::Sender<Result<Option<usize>>>,
    },
    Snapshot {
        reply: oneshot::Sender<RecorderSnapshot>,
    },
}

/// A copy of the recorder's state at one point in time
#[derive(Debug, Clone)]
pub struct RecorderSnapshot {
    pub state: RecordingState,
    pub sequence: CommandSequence,
}

/// What the recorder task hands back when it ends
pub struct RecorderExit {
    pub recorder: CommandRecorder,
    /// The recording that was still running when the last handle went away,
    /// stopped and finalized.
    pub unfinished: Option<CommandSequence>,
}

/// Move the recorder onto its own task. The task ends once every handle and
/// sink is dropped; an unfinished recording is stopped then and returned
/// through the join handle together with the recorder.
pub fn spawn_recorder(recorder: CommandRecorder) -> (RecorderHandle, JoinHandle<RecorderExit>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = RecorderHandle {
        tx,
        event_tx: recorder.sender(),
    };
    let join = tokio::spawn(run(recorder, rx));
    (handle, join)
}

async fn run(mut recorder: CommandRecorder, mut rx: mpsc::UnboundedReceiver<RecorderMessage>) -> RecorderExit {
    debug!("Recorder task started");
    while let Some(message) = rx.recv().await {
        match message {
            RecorderMessage::Start { name, target, reply } => {
                let _ = reply.send(recorder.start_recording(&name, target));
            }
            RecorderMessage::InputObserved(event) => {
                let capture = recorder.handle_input(event);
                debug!(?capture, "Input applied");
            }
            RecorderMessage::Pause => recorder.pause_recording(),
            RecorderMessage::Resume => recorder.resume_recording(),
            RecorderMessage::Stop { reply } => {
                let _ = reply.send(recorder.stop_recording());
            }
            RecorderMessage::AddWait { ms, reply } => {
                let _ = reply.send(recorder.add_wait_command(ms));
            }
            RecorderMessage::Snapshot { reply } => {
                let _ = reply.send(RecorderSnapshot {
                    state: recorder.state(),
                    sequence: recorder.sequence().clone(),
                });
            }
        }
    }
    let unfinished = recorder.stop_recording();
    if let Some(sequence) = &unfinished {
        warn!(steps = sequence.len(), "Recorder channel closed during a recording, stopped it");
    }
    info!("Recorder task finished");
    RecorderExit { recorder, unfinished }
}

/// Controls a recorder running on its task
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<RecorderMessage>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl RecorderHandle {
    pub async fn start(&self, name: impl Into<String>, target: TargetWindow) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::Start {
            name: name.into(),
            target,
            reply,
        })?;
        rx.await.map_err(closed)?
    }

    pub fn pause(&self) -> Result<()> {
        self.send(RecorderMessage::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(RecorderMessage::Resume)
    }

    /// Stop and collect the sequence. Every input sent before this call has
    /// been applied by the time it returns.
    pub async fn stop(&self) -> Result<Option<CommandSequence>> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::Stop { reply })?;
        rx.await.map_err(closed)
    }

    pub async fn add_wait(&self, ms: u64) -> Result<Option<usize>> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::AddWait { ms, reply })?;
        rx.await.map_err(closed)?
    }

    pub async fn snapshot(&self) -> Result<RecorderSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderMessage::Snapshot { reply })?;
        rx.await.map_err(closed)
    }

    /// A sender for the input hook.
    pub fn input_sink(&self) -> InputSink {
        InputSink { tx: self.tx.clone() }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    /// Get a stream of events
    pub fn event_stream(&self) -> impl Stream<Item = RecorderEvent> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            while let Ok(event) = rx.recv().await {
                yield event;
            }
        })
    }

    fn send(&self, message: RecorderMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| RecorderError::Channel("recorder task has exited".to_string()))
    }
}

/// Delivers observed input to the recorder task. Sending never blocks, so
/// it is safe to call from a hook callback on any thread.
#[derive(Debug, Clone)]
pub struct InputSink {
    tx: mpsc::UnboundedSender<RecorderMessage>,
}

impl InputSink {
    pub fn observe(&self, event: InputEvent) -> Result<()> {
        self.tx
            .send(RecorderMessage::InputObserved(event))
            .map_err(|_| RecorderError::Channel("recorder task has exited".to_string()))
    }
}

fn closed(_: oneshot::error::RecvError) -> RecorderError {
    RecorderError::Channel("recorder task dropped the reply".to_string())
}
