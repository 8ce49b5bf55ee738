//! Per-room agent registry.
//!
//! The registry guarantees at most one live [`AgentController`] per
//! [`RoomKey`] and keeps the last published snapshot of every room it has
//! seen. Controllers report back through a state callback bound to their room
//! at creation time; that callback refreshes the snapshot cache and evicts
//! the controller once it reports `disconnected`.

use mandy_types::{AgentStatus, ControlAction, ControlPayload, RoomKey, RuntimeState, StatePayload};
use mandy_voice::{AgentBackend, AgentConfig, AgentController, AgentSpec, StateCallback};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Capacity of the room state event channel.
const STATE_EVENT_CAPACITY: usize = 256;

/// Requester recorded when a start request updates an existing directive.
const SYSTEM_REQUESTER: &str = "system";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Mandy is not active for room {0}")]
    NotActive(RoomKey),

    #[error("No Mandy state found for room {0}")]
    NoState(RoomKey),
}

/// Published on every state update of any room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStateEvent {
    /// Room key in `domain/room` form.
    pub room: String,
    pub state: StatePayload,
}

/// Parameters of a start request after room resolution.
#[derive(Debug, Clone)]
pub struct StartParams {
    pub key: RoomKey,
    pub room_url: String,
    pub token: Option<String>,
    pub directive: Option<String>,
}

type ControllerMap = HashMap<RoomKey, Arc<AgentController>>;
type SnapshotMap = HashMap<RoomKey, StatePayload>;

/// Maps rooms to their agent controllers.
///
/// The controller and snapshot maps use `std::sync::RwLock` on purpose: every
/// acquisition is a brief map operation that never spans an `.await`, and the
/// state callback that writes them runs synchronously inside a controller.
pub struct AgentRegistry {
    backend: AgentBackend,
    config: AgentConfig,
    /// Serializes create-or-reuse decisions across all rooms.
    lifecycle: Mutex<()>,
    controllers: Arc<RwLock<ControllerMap>>,
    snapshots: Arc<RwLock<SnapshotMap>>,
    events: broadcast::Sender<RoomStateEvent>,
}

impl AgentRegistry {
    pub fn new(backend: AgentBackend, config: AgentConfig) -> Self {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            backend,
            config,
            lifecycle: Mutex::new(()),
            controllers: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Subscribes to state updates of every room.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomStateEvent> {
        self.events.subscribe()
    }

    /// Starts the agent for a room, reusing a live controller if one exists.
    ///
    /// A directive supplied for an existing room is applied as
    /// `mandy:update_directive` instead of replacing the controller. The
    /// resolved controller is always started (a no-op when already running).
    pub async fn start_or_reuse(&self, params: StartParams) -> StatePayload {
        let _guard = self.lifecycle.lock().await;
        let StartParams {
            key,
            room_url,
            token,
            directive,
        } = params;

        let existing = read(&self.controllers).get(&key).cloned();
        let controller = match existing {
            Some(controller) => {
                if let Some(directive) = directive.filter(|d| !d.is_empty()) {
                    let update = ControlPayload::new(ControlAction::UpdateDirective.as_str())
                        .with_directive(directive)
                        .requested_by(SYSTEM_REQUESTER);
                    controller.apply_control(&update).await;
                }
                controller
            }
            None => {
                let spec = AgentSpec::new(room_url, self.config.clone())
                    .with_token(token)
                    .with_directive(directive.unwrap_or_default());
                let controller = AgentController::new(spec, self.backend.clone());
                let callback = self.state_callback(key.clone(), controller.id());
                let controller = Arc::new(controller.with_subscriber(callback));

                let initial = controller.snapshot().await.to_payload();
                write(&self.snapshots).insert(key.clone(), initial);
                write(&self.controllers).insert(key.clone(), Arc::clone(&controller));
                tracing::info!(room = %key, controller = %controller.id(), "registered new agent");
                controller
            }
        };

        controller.start().await;

        // A concurrent stop may have evicted the controller before `start`
        // brought it back up. The flag is checked under the map guard: a run
        // ending after this point evicts through the state callback, which
        // needs the same guard.
        {
            let mut controllers = write(&self.controllers);
            if !controller.is_disconnected() {
                controllers
                    .entry(key)
                    .or_insert_with(|| Arc::clone(&controller));
            }
        }

        controller.snapshot().await.to_payload()
    }

    /// Applies a control action to a room's controller.
    pub async fn control(
        &self,
        key: &RoomKey,
        payload: ControlPayload,
    ) -> Result<StatePayload, RegistryError> {
        let controller = read(&self.controllers)
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotActive(key.clone()))?;

        // A stop is evicted by the state callback while the controller still
        // holds its own lock, so a concurrent restart cannot be undone here.
        let state = controller.apply_control(&payload).await;
        Ok(state.to_payload())
    }

    /// Returns the last snapshot recorded for a room.
    pub fn get_state(&self, key: &RoomKey) -> Result<StatePayload, RegistryError> {
        read(&self.snapshots)
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NoState(key.clone()))
    }

    /// Returns the live controller of a room, if any.
    pub fn controller(&self, key: &RoomKey) -> Option<Arc<AgentController>> {
        read(&self.controllers).get(key).cloned()
    }

    /// Rooms with a live controller, sorted.
    pub fn active_rooms(&self) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = read(&self.controllers).keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Shuts down every live controller.
    pub async fn shutdown_all(&self) {
        let controllers: Vec<Arc<AgentController>> =
            read(&self.controllers).values().cloned().collect();
        tracing::info!(count = controllers.len(), "shutting down active agents");
        for controller in controllers {
            controller.shutdown().await;
        }
    }

    fn state_callback(&self, key: RoomKey, id: Uuid) -> StateCallback {
        let controllers = Arc::clone(&self.controllers);
        let snapshots = Arc::clone(&self.snapshots);
        let events = self.events.clone();

        Arc::new(move |state: &RuntimeState| {
            let payload = state.to_payload();
            tracing::info!(
                room = %key,
                status = %state.status,
                version = state.version,
                "State update for {}",
                key
            );
            tracing::debug!(room = %key, state = ?payload, "full state");

            let current = read(&controllers).get(&key).map(|c| c.id());
            if current.is_some_and(|current| current != id) {
                tracing::debug!(room = %key, stale = %id, "ignoring state from replaced agent");
                return;
            }

            write(&snapshots).insert(key.clone(), payload.clone());
            if state.status == AgentStatus::Disconnected {
                tracing::warn!("Removing agent {} from registry due to disconnected status", key);
                evict(&controllers, &key, id);
            }

            // No subscribers is the normal case.
            let _ = events.send(RoomStateEvent {
                room: key.to_string(),
                state: payload,
            });
        })
    }
}

/// Removes `key` only if it still maps to the controller `id`.
fn evict(controllers: &RwLock<ControllerMap>, key: &RoomKey, id: Uuid) {
    let mut map = write(controllers);
    match map.get(key) {
        Some(current) if current.id() == id => {
            map.remove(key);
            tracing::info!("Agent {} successfully removed from registry", key);
        }
        Some(current) => {
            tracing::debug!(
                room = %key,
                stale = %id,
                current = %current.id(),
                "newer agent registered for room, keeping it"
            );
        }
        None => {
            tracing::debug!("Agent {} was already removed from registry", key);
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("registry lock poisoned, recovering with last state");
            poisoned.into_inner()
        }
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("registry lock poisoned, recovering with last state");
            poisoned.into_inner()
        }
    }
}
