//! Agent controller.
//!
//! One controller per room. It owns the room's [`RuntimeState`], joins the
//! room through a [`TransportFactory`], builds the speech pipeline through a
//! [`PipelineEngine`], and runs it as a cancellable background task.
//!
//! Every mutation and every broadcast happens while holding the controller's
//! state lock, so control actions for one room are applied strictly one after
//! another and `version` grows by exactly one per action.

use crate::config::AgentConfig;
use crate::error::VoiceError;
use crate::pipeline::{build_stages, PipelineEngine, PipelineTask};
use crate::transport::{
    EventHandler, RoomTransport, TransportEvent, TransportEventKind, TransportFactory,
    TransportParams,
};
use chrono::Utc;
use futures_util::FutureExt;
use mandy_types::{AgentStatus, ControlAction, ControlPayload, RuntimeState, StateMessage};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Receives every state snapshot the controller publishes.
///
/// Called while the controller's state lock is held; it must not block or
/// call back into the same controller.
pub type StateCallback = Arc<dyn Fn(&RuntimeState) + Send + Sync>;

/// Collaborators a controller drives.
#[derive(Clone)]
pub struct AgentBackend {
    pub transports: Arc<dyn TransportFactory>,
    pub engine: Arc<dyn PipelineEngine>,
}

/// Everything needed to bring an agent into a room.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub room_url: String,
    pub token: Option<String>,
    pub directive: String,
    pub config: AgentConfig,
}

impl AgentSpec {
    pub fn new(room_url: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            room_url: room_url.into(),
            token: None,
            directive: String::new(),
            config,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }
}

/// The background run of one lifecycle.
struct RunHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunHandle {
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

struct Inner {
    state: RuntimeState,
    /// Bumped on every launched run; a finishing run only cleans up if it
    /// is still the current one.
    generation: u64,
    run: Option<RunHandle>,
    task: Option<Arc<dyn PipelineTask>>,
    transport: Option<Arc<dyn RoomTransport>>,
}

enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

pub struct AgentController {
    id: Uuid,
    spec: AgentSpec,
    backend: AgentBackend,
    inner: Mutex<Inner>,
    /// Mirrors `status == disconnected` for readers that cannot await the
    /// state lock. Written under that lock before the subscriber runs.
    disconnected: AtomicBool,
    on_state: Option<StateCallback>,
}

impl fmt::Debug for AgentController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentController")
            .field("id", &self.id)
            .field("room_url", &self.spec.room_url)
            .finish_non_exhaustive()
    }
}

impl AgentController {
    pub fn new(spec: AgentSpec, backend: AgentBackend) -> Self {
        let state = RuntimeState::new(spec.directive.clone());
        Self {
            id: Uuid::new_v4(),
            spec,
            backend,
            inner: Mutex::new(Inner {
                state,
                generation: 0,
                run: None,
                task: None,
                transport: None,
            }),
            disconnected: AtomicBool::new(false),
            on_state: None,
        }
    }

    /// Sets the subscriber notified on every publish.
    pub fn with_subscriber(mut self, callback: StateCallback) -> Self {
        self.on_state = Some(callback);
        self
    }

    /// Unique id of this controller instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_url(&self) -> &str {
        &self.spec.room_url
    }

    /// Returns `true` once the last published status is `disconnected`.
    ///
    /// Does not take the state lock, so it is usable from synchronous code.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> RuntimeState {
        self.inner.lock().await.state.clone()
    }

    /// Returns `true` while a background run is active.
    pub async fn is_running(&self) -> bool {
        self.inner
            .lock()
            .await
            .run
            .as_ref()
            .is_some_and(RunHandle::is_active)
    }

    /// Joins the room and launches the pipeline run.
    ///
    /// No-op if a run is already active. Never fails: setup errors move the
    /// agent to `error` and then `disconnected`.
    pub async fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await;
    }

    /// Applies one control action and returns the resulting state.
    pub async fn apply_control(self: &Arc<Self>, payload: &ControlPayload) -> RuntimeState {
        let mut inner = self.inner.lock().await;
        let requester = payload.requester().to_string();

        inner.state.version += 1;
        inner.state.updated_by = Some(requester.clone());
        inner.state.updated_at = Utc::now();

        if let Some(holder) = inner.state.locked_by.as_deref() {
            if holder != requester {
                debug!(
                    room_url = %self.spec.room_url,
                    locked_by = holder,
                    requested_by = %requester,
                    action = %payload.action,
                    "control applied while locked by another identity"
                );
            }
        }
        if let Some(reason) = payload.reason.as_deref() {
            debug!(room_url = %self.spec.room_url, reason, "control reason");
        }

        match payload.action() {
            ControlAction::Mute => {
                inner.state.muted = true;
                info!("Agent muted by {}", requester);
            }
            ControlAction::Unmute => {
                inner.state.muted = false;
                info!("Agent unmuted by {}", requester);
            }
            ControlAction::SetMode => {
                if let Some(mode) = &payload.mode {
                    inner.state.mode = mode.clone();
                }
                info!("Agent mode set to {} by {}", inner.state.mode, requester);
            }
            ControlAction::UpdateDirective => {
                if let Some(directive) = &payload.directive {
                    inner.state.directive = directive.clone();
                }
                info!("Directive updated by {}: {}", requester, inner.state.directive);
            }
            ControlAction::LockMode => {
                inner.state.locked_by = Some(requester.clone());
                info!("Controls locked by {}", requester);
            }
            ControlAction::UnlockMode => {
                inner.state.locked_by = None;
                info!("Controls unlocked by {}", requester);
            }
            ControlAction::Stop => {
                info!("Received stop command from {}", requester);
                self.shutdown_locked(&mut inner).await;
                self.publish_locked(&mut inner, Some(AgentStatus::Disconnected))
                    .await;
                return inner.state.clone();
            }
            ControlAction::Start => {
                info!("Start acknowledged from {}", requester);
                self.start_locked(&mut inner).await;
            }
            ControlAction::Unrecognized(tag) => {
                warn!(
                    room_url = %self.spec.room_url,
                    action = %tag,
                    requested_by = %requester,
                    "unrecognized control action"
                );
            }
        }

        self.publish_locked(&mut inner, None).await;
        inner.state.clone()
    }

    /// Optionally overrides the status, then broadcasts the current state to
    /// the room and the subscriber.
    pub async fn publish_state(&self, status: Option<AgentStatus>) {
        let mut inner = self.inner.lock().await;
        self.publish_locked(&mut inner, status).await;
    }

    /// Like [`publish_state`](Self::publish_state), but only while the
    /// lifecycle `generation` is still the current one.
    async fn publish_state_for(&self, generation: u64, status: Option<AgentStatus>) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(
                room_url = %self.spec.room_url,
                generation,
                current = inner.generation,
                "ignoring event from a previous room connection"
            );
            return;
        }
        self.publish_locked(&mut inner, status).await;
    }

    /// Cancels the run, leaves the room, and forces `disconnected`.
    ///
    /// Safe to call any number of times.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner).await;
    }

    async fn start_locked(self: &Arc<Self>, inner: &mut Inner) {
        if inner.run.as_ref().is_some_and(RunHandle::is_active) {
            info!("Agent already running for {}", self.spec.room_url);
            return;
        }

        info!("Starting agent for {}", self.spec.room_url);
        inner.generation += 1;
        let generation = inner.generation;
        self.publish_locked(inner, Some(AgentStatus::Connecting))
            .await;

        let task = match self.prepare(inner, generation).await {
            Ok(task) => task,
            Err(e) => {
                error!(
                    room_url = %self.spec.room_url,
                    error = %e,
                    "failed to set up agent pipeline"
                );
                self.publish_locked(inner, Some(AgentStatus::Error)).await;
                self.publish_locked(inner, Some(AgentStatus::Disconnected))
                    .await;
                self.release_locked(inner).await;
                return;
            }
        };

        info!("Agent pipeline created, starting runner for {}", self.spec.room_url);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).supervise(generation, task, cancel.clone()));
        inner.run = Some(RunHandle { cancel, handle });
    }

    /// Connects the transport, wires its callbacks, and builds the pipeline.
    async fn prepare(
        self: &Arc<Self>,
        inner: &mut Inner,
        generation: u64,
    ) -> Result<Arc<dyn PipelineTask>, VoiceError> {
        // Leftovers from a run whose cleanup has not caught up yet.
        self.release_locked(inner).await;

        let params = TransportParams::new(
            self.spec.room_url.as_str(),
            self.spec.token.clone(),
            self.spec.config.bot_name.as_str(),
        );
        let transport = self.backend.transports.connect(params).await?;
        self.register_handlers(transport.as_ref(), generation);
        inner.transport = Some(transport);

        let stages = build_stages(&self.spec.config, &inner.state.directive);
        debug!(
            room_url = %self.spec.room_url,
            stages = stages.len(),
            "building agent pipeline"
        );
        let task = self.backend.engine.build(stages)?;
        inner.task = Some(Arc::clone(&task));
        Ok(task)
    }

    fn register_handlers(self: &Arc<Self>, transport: &dyn RoomTransport, generation: u64) {
        let room_url = self.spec.room_url.clone();
        let on_joined: EventHandler = Arc::new(move |event: TransportEvent| {
            let room_url = room_url.clone();
            async move {
                if let TransportEvent::ParticipantJoined(participant) = event {
                    info!(
                        room_url = %room_url,
                        participant_id = %participant.id,
                        "Participant joined: {}",
                        participant.display_name()
                    );
                }
            }
            .boxed()
        });

        let room_url = self.spec.room_url.clone();
        let on_left: EventHandler = Arc::new(move |event: TransportEvent| {
            let room_url = room_url.clone();
            async move {
                if let TransportEvent::ParticipantLeft {
                    participant,
                    reason,
                } = event
                {
                    info!(
                        room_url = %room_url,
                        participant_id = %participant.id,
                        reason = %reason,
                        "Participant left"
                    );
                }
            }
            .boxed()
        });

        let controller = Arc::downgrade(self);
        let on_first_joined: EventHandler = Arc::new(move |_event: TransportEvent| {
            let controller = controller.clone();
            async move {
                if let Some(controller) = controller.upgrade() {
                    info!("First participant joined - agent is now active");
                    controller
                        .publish_state_for(generation, Some(AgentStatus::Online))
                        .await;
                }
            }
            .boxed()
        });

        transport.register_callback(TransportEventKind::ParticipantJoined, on_joined);
        transport.register_callback(TransportEventKind::ParticipantLeft, on_left);
        transport.register_callback(TransportEventKind::FirstParticipantJoined, on_first_joined);
    }

    /// Drives one pipeline run and guarantees its cleanup.
    ///
    /// The run itself lives in its own task so a panic inside the pipeline
    /// surfaces as a join error instead of skipping cleanup.
    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        task: Arc<dyn PipelineTask>,
        cancel: CancellationToken,
    ) {
        let mut run = tokio::spawn(async move { task.run().await });

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                run.abort();
                RunOutcome::Cancelled
            }
            joined = &mut run => match joined {
                Ok(Ok(())) => RunOutcome::Completed,
                Ok(Err(e)) => RunOutcome::Failed(e.to_string()),
                Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
                Err(e) => RunOutcome::Failed(format!("pipeline run panicked: {}", e)),
            },
        };

        self.finish_run(generation, outcome).await;
    }

    async fn finish_run(&self, generation: u64, outcome: RunOutcome) {
        let mut inner = self.inner.lock().await;

        match &outcome {
            RunOutcome::Completed => {
                warn!("Pipeline runner completed unexpectedly for {}", self.spec.room_url)
            }
            RunOutcome::Cancelled => info!("Agent runner cancelled for {}", self.spec.room_url),
            RunOutcome::Failed(reason) => error!(
                room_url = %self.spec.room_url,
                error = %reason,
                "Unexpected agent pipeline error"
            ),
        }

        if inner.generation != generation {
            debug!(
                room_url = %self.spec.room_url,
                generation,
                current = inner.generation,
                "superseded run finished, skipping cleanup"
            );
            return;
        }
        inner.run = None;

        if matches!(outcome, RunOutcome::Failed(_)) {
            self.publish_locked(&mut inner, Some(AgentStatus::Error))
                .await;
        }
        if inner.state.status != AgentStatus::Disconnected {
            info!("Setting status to disconnected for {}", self.spec.room_url);
            self.publish_locked(&mut inner, Some(AgentStatus::Disconnected))
                .await;
        }
        self.release_locked(&mut inner).await;
    }

    async fn publish_locked(&self, inner: &mut Inner, status: Option<AgentStatus>) {
        if let Some(next) = status {
            let current = inner.state.status;
            if current.can_transition_to(next) {
                inner.state.status = next;
            } else {
                warn!(
                    room_url = %self.spec.room_url,
                    from = %current,
                    to = %next,
                    "ignoring illegal status transition"
                );
            }
        }

        self.disconnected
            .store(inner.state.status.is_terminal(), Ordering::SeqCst);

        let message = StateMessage::new(inner.state.to_payload());
        debug!(
            room_url = %self.spec.room_url,
            version = message.state.version,
            status = %message.state.status,
            "publishing state"
        );

        if let Some(task) = &inner.task {
            let delivered = match serde_json::to_value(&message) {
                Ok(value) => task.queue_message(value).await,
                Err(e) => Err(VoiceError::Delivery(e.to_string())),
            };
            if let Err(e) = delivered {
                warn!(
                    room_url = %self.spec.room_url,
                    error = %e,
                    "unable to send state app-message"
                );
            }
        }

        if let Some(callback) = &self.on_state {
            callback(&inner.state);
        }
    }

    async fn shutdown_locked(&self, inner: &mut Inner) {
        if let Some(run) = inner.run.take() {
            run.cancel.cancel();
        }
        self.release_locked(inner).await;
        inner.state.status = AgentStatus::Disconnected;
        self.disconnected.store(true, Ordering::SeqCst);
        info!("Agent shutdown complete for {}", self.spec.room_url);
        if let Some(callback) = &self.on_state {
            callback(&inner.state);
        }
    }

    /// Cancels the pipeline and closes the transport if present.
    async fn release_locked(&self, inner: &mut Inner) {
        if let Some(task) = inner.task.take() {
            if let Err(e) = task.cancel().await {
                warn!(room_url = %self.spec.room_url, error = %e, "failed to cancel pipeline");
            }
        }
        if let Some(transport) = inner.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(room_url = %self.spec.room_url, error = %e, "failed to close room transport");
            }
        }
    }
}
