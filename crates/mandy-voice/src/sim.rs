//! In-process simulation of the room transport and pipeline engine.
//!
//! In a deployment with a real-time media SDK available, adapters for the
//! hosted room service and the speech pipeline implement [`TransportFactory`]
//! and [`PipelineEngine`]. The simulation stands in for both: it records what
//! the controller asks of it and lets callers raise participant events,
//! finish or fail a run, and break message delivery.

use crate::controller::AgentBackend;
use crate::error::VoiceError;
use crate::pipeline::{PipelineEngine, PipelineStage, PipelineTask};
use crate::transport::{
    EventHandler, RoomTransport, TransportEvent, TransportEventKind, TransportFactory,
    TransportParams,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A simulated room connection.
pub struct SimulatedTransport {
    params: TransportParams,
    handlers: Mutex<HashMap<TransportEventKind, Vec<EventHandler>>>,
    closed: AtomicBool,
}

impl SimulatedTransport {
    fn new(params: TransportParams) -> Self {
        Self {
            params,
            handlers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    /// Raises an event and awaits every handler registered for its kind.
    pub async fn emit(&self, event: TransportEvent) {
        let handlers = lock(&self.handlers)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            handler(event.clone()).await;
        }
    }

    pub fn handler_count(&self, kind: TransportEventKind) -> usize {
        lock(&self.handlers).get(&kind).map_or(0, Vec::len)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomTransport for SimulatedTransport {
    fn room_url(&self) -> &str {
        &self.params.room_url
    }

    fn register_callback(&self, kind: TransportEventKind, handler: EventHandler) {
        lock(&self.handlers).entry(kind).or_default().push(handler);
    }

    async fn close(&self) -> Result<(), VoiceError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Agent disconnecting from room '{}'", self.params.room_url);
        }
        Ok(())
    }
}

/// Opens [`SimulatedTransport`]s and remembers them.
#[derive(Default)]
pub struct SimulatedTransportFactory {
    opened: Mutex<Vec<Arc<SimulatedTransport>>>,
    refuse: AtomicBool,
}

impl SimulatedTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent connects fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// All transports opened so far, oldest first.
    pub fn opened(&self) -> Vec<Arc<SimulatedTransport>> {
        lock(&self.opened).clone()
    }

    /// The most recent transport opened for `room_url`.
    pub fn latest_for(&self, room_url: &str) -> Option<Arc<SimulatedTransport>> {
        lock(&self.opened)
            .iter()
            .rev()
            .find(|t| t.params.room_url == room_url)
            .cloned()
    }
}

#[async_trait]
impl TransportFactory for SimulatedTransportFactory {
    async fn connect(&self, params: TransportParams) -> Result<Arc<dyn RoomTransport>, VoiceError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(VoiceError::Transport(format!(
                "connection to {} refused",
                params.room_url
            )));
        }

        info!(
            "Agent '{}' connecting to room '{}' with token: {}",
            params.bot_name,
            params.room_url,
            params.token.is_some()
        );

        let transport = Arc::new(SimulatedTransport::new(params));
        lock(&self.opened).push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// A simulated pipeline run.
///
/// `run` parks until the task is cancelled, [`complete`](Self::complete)d, or
/// [`fail`](Self::fail)ed.
pub struct SimulatedPipelineTask {
    stages: Vec<PipelineStage>,
    cancel: CancellationToken,
    exit_tx: Mutex<Option<oneshot::Sender<Result<(), VoiceError>>>>,
    exit_rx: Mutex<Option<oneshot::Receiver<Result<(), VoiceError>>>>,
    messages: Mutex<Vec<serde_json::Value>>,
    fail_delivery: AtomicBool,
}

impl SimulatedPipelineTask {
    fn new(stages: Vec<PipelineStage>) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            stages,
            cancel: CancellationToken::new(),
            exit_tx: Mutex::new(Some(tx)),
            exit_rx: Mutex::new(Some(rx)),
            messages: Mutex::new(Vec::new()),
            fail_delivery: AtomicBool::new(false),
        }
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Ends the run normally.
    pub fn complete(&self) {
        self.exit(Ok(()));
    }

    /// Ends the run with a pipeline error.
    pub fn fail(&self, reason: impl Into<String>) {
        self.exit(Err(VoiceError::Pipeline(reason.into())));
    }

    fn exit(&self, result: Result<(), VoiceError>) {
        if let Some(tx) = lock(&self.exit_tx).take() {
            let _ = tx.send(result);
        }
    }

    /// Makes `queue_message` fail until reset.
    pub fn set_fail_delivery(&self, fail: bool) {
        self.fail_delivery.store(fail, Ordering::SeqCst);
    }

    /// App-messages queued so far.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        lock(&self.messages).clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl PipelineTask for SimulatedPipelineTask {
    async fn run(&self) -> Result<(), VoiceError> {
        let exit = lock(&self.exit_rx)
            .take()
            .ok_or_else(|| VoiceError::Pipeline("pipeline already ran".to_string()))?;

        tokio::select! {
            () = self.cancel.cancelled() => Ok(()),
            result = exit => result.unwrap_or(Ok(())),
        }
    }

    async fn cancel(&self) -> Result<(), VoiceError> {
        self.cancel.cancel();
        Ok(())
    }

    async fn queue_message(&self, message: serde_json::Value) -> Result<(), VoiceError> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(VoiceError::Delivery(
                "simulated app-message failure".to_string(),
            ));
        }
        lock(&self.messages).push(message);
        Ok(())
    }
}

/// Builds [`SimulatedPipelineTask`]s and remembers them.
#[derive(Default)]
pub struct SimulatedEngine {
    built: Mutex<Vec<Arc<SimulatedPipelineTask>>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pipelines built so far.
    pub fn build_count(&self) -> usize {
        lock(&self.built).len()
    }

    pub fn latest(&self) -> Option<Arc<SimulatedPipelineTask>> {
        lock(&self.built).last().cloned()
    }
}

impl PipelineEngine for SimulatedEngine {
    fn build(&self, stages: Vec<PipelineStage>) -> Result<Arc<dyn PipelineTask>, VoiceError> {
        let task = Arc::new(SimulatedPipelineTask::new(stages));
        lock(&self.built).push(Arc::clone(&task));
        Ok(task)
    }
}

/// A simulated transport factory and engine wired together.
#[derive(Clone, Default)]
pub struct Simulation {
    pub transports: Arc<SimulatedTransportFactory>,
    pub engine: Arc<SimulatedEngine>,
}

impl Simulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> AgentBackend {
        AgentBackend {
            transports: self.transports.clone(),
            engine: self.engine.clone(),
        }
    }
}
