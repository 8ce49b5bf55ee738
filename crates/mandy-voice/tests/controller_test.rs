use mandy_types::{AgentStatus, ControlPayload, RuntimeState, STATE_MESSAGE_TYPE};
use mandy_voice::sim::Simulation;
use mandy_voice::{
    AgentConfig, AgentController, AgentSpec, Participant, PipelineStage, TransportEvent,
    TransportEventKind,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ROOM_URL: &str = "https://acme.daily.co/standup";

type Seen = Arc<Mutex<Vec<RuntimeState>>>;

fn controller_with(sim: &Simulation, directive: &str) -> (Arc<AgentController>, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let spec = AgentSpec::new(ROOM_URL, AgentConfig::default())
        .with_token(Some("room-token".to_string()))
        .with_directive(directive);
    let controller = AgentController::new(spec, sim.backend())
        .with_subscriber(Arc::new(move |state: &RuntimeState| {
            sink.lock().unwrap().push(state.clone())
        }));
    (Arc::new(controller), seen)
}

fn statuses(seen: &Seen) -> Vec<AgentStatus> {
    seen.lock().unwrap().iter().map(|s| s.status).collect()
}

async fn wait_for_status(seen: &Seen, status: AgentStatus) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if seen.lock().unwrap().iter().any(|s| s.status == status) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("status {} was never published", status));
}

fn action(tag: &str, who: &str) -> ControlPayload {
    ControlPayload::new(tag).requested_by(who)
}

#[tokio::test]
async fn test_start_publishes_connecting_and_joins_room() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");

    controller.start().await;

    assert!(controller.is_running().await);
    assert_eq!(statuses(&seen), vec![AgentStatus::Connecting]);

    let transport = sim.transports.latest_for(ROOM_URL).expect("transport opened");
    assert_eq!(transport.params().bot_name, "Mandy");
    assert_eq!(transport.params().token.as_deref(), Some("room-token"));
    assert_eq!(
        transport.handler_count(TransportEventKind::FirstParticipantJoined),
        1
    );

    let state = controller.snapshot().await;
    assert_eq!(state.version, 0);
    assert_eq!(state.status, AgentStatus::Connecting);
}

#[tokio::test]
async fn test_start_twice_runs_one_pipeline() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "");

    controller.start().await;
    controller.start().await;

    assert_eq!(sim.engine.build_count(), 1);
    assert_eq!(sim.transports.opened().len(), 1);
    assert!(controller.is_running().await);
}

#[tokio::test]
async fn test_pipeline_uses_directive_as_system_prompt() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "You are a scrum master.");

    controller.start().await;

    let task = sim.engine.latest().unwrap();
    let prompt = task.stages().iter().find_map(|stage| match stage {
        PipelineStage::LanguageModel { system_prompt, .. } => Some(system_prompt.clone()),
        _ => None,
    });
    assert_eq!(prompt.as_deref(), Some("You are a scrum master."));
}

#[tokio::test]
async fn test_first_participant_brings_agent_online() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;

    let transport = sim.transports.latest_for(ROOM_URL).unwrap();
    transport
        .emit(TransportEvent::ParticipantJoined(
            Participant::new("p1").with_user_name("Ada"),
        ))
        .await;
    assert_eq!(controller.snapshot().await.status, AgentStatus::Connecting);

    transport
        .emit(TransportEvent::FirstParticipantJoined(Participant::new("p1")))
        .await;

    assert_eq!(controller.snapshot().await.status, AgentStatus::Online);
    assert_eq!(statuses(&seen).last(), Some(&AgentStatus::Online));

    transport
        .emit(TransportEvent::ParticipantLeft {
            participant: Participant::new("p1"),
            reason: "leftCall".to_string(),
        })
        .await;
    assert_eq!(controller.snapshot().await.status, AgentStatus::Online);
}

#[tokio::test]
async fn test_every_action_bumps_version_by_one() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "");
    controller.start().await;

    let tags = [
        "mandy:mute",
        "mandy:set_mode",
        "not-an-action",
        "mandy:update_directive",
        "mandy:lock_mode",
        "mandy:unlock_mode",
        "mandy:start",
        "MANDY:MUTE",
    ];
    for (i, tag) in tags.iter().enumerate() {
        let state = controller.apply_control(&action(tag, "bob")).await;
        assert_eq!(state.version, i as u64 + 1, "after {}", tag);
        assert_eq!(state.updated_by.as_deref(), Some("bob"));
    }
}

#[tokio::test]
async fn test_mute_then_unmute_restores_muted_flag() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "");
    let original = controller.snapshot().await.muted;

    let state = controller.apply_control(&action("mandy:unmute", "bob")).await;
    assert!(!state.muted);
    let state = controller.apply_control(&action("mandy:mute", "bob")).await;
    assert!(state.muted);
    let state = controller.apply_control(&action("mandy:unmute", "bob")).await;
    assert!(!state.muted);

    let state = controller.apply_control(&action("mandy:mute", "bob")).await;
    assert_eq!(state.muted, original);
}

#[tokio::test]
async fn test_lock_is_recorded_and_cleared_by_anyone() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "");

    let state = controller.apply_control(&action("mandy:lock_mode", "alice")).await;
    assert_eq!(state.locked_by.as_deref(), Some("alice"));

    // Advisory only: another identity may still act.
    let state = controller.apply_control(&action("mandy:mute", "bob")).await;
    assert_eq!(state.locked_by.as_deref(), Some("alice"));

    let state = controller.apply_control(&action("mandy:unlock_mode", "carol")).await;
    assert_eq!(state.locked_by, None);
    assert_eq!(state.updated_by.as_deref(), Some("carol"));
}

#[tokio::test]
async fn test_mode_and_directive_only_change_when_present() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "initial");

    let state = controller
        .apply_control(&ControlPayload::new("mandy:set_mode").with_mode("active"))
        .await;
    assert_eq!(state.mode, "active");
    assert_eq!(state.updated_by.as_deref(), Some("unknown"));

    let state = controller.apply_control(&ControlPayload::new("mandy:set_mode")).await;
    assert_eq!(state.mode, "active");

    let state = controller
        .apply_control(&ControlPayload::new("mandy:update_directive"))
        .await;
    assert_eq!(state.directive, "initial");

    let state = controller
        .apply_control(&ControlPayload::new("mandy:update_directive").with_directive("new"))
        .await;
    assert_eq!(state.directive, "new");
    assert_eq!(state.version, 4);
}

#[tokio::test]
async fn test_publish_sends_state_message_into_room() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "");
    controller.start().await;

    controller.apply_control(&action("mandy:mute", "bob")).await;

    let messages = sim.engine.latest().unwrap().messages();
    let last = messages.last().expect("state message queued");
    assert_eq!(last["type"], STATE_MESSAGE_TYPE);
    assert_eq!(last["state"]["version"], 1);
    assert_eq!(last["state"]["muted"], true);
    assert_eq!(last["state"]["updatedBy"], "bob");
}

#[tokio::test]
async fn test_delivery_failure_does_not_block_subscriber() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;
    sim.engine.latest().unwrap().set_fail_delivery(true);

    let state = controller.apply_control(&action("mandy:unmute", "bob")).await;

    assert!(!state.muted);
    let last = seen.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.version, 1);
    assert!(!last.muted);
}

#[tokio::test]
async fn test_stop_disconnects_and_releases_resources() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;
    let transport = sim.transports.latest_for(ROOM_URL).unwrap();
    let task = sim.engine.latest().unwrap();

    let state = controller.apply_control(&action("mandy:stop", "bob")).await;

    assert_eq!(state.status, AgentStatus::Disconnected);
    assert_eq!(state.version, 1);
    assert!(transport.is_closed());
    assert!(task.is_cancelled());
    assert!(!controller.is_running().await);

    // Let the background run observe the cancellation.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = statuses(&seen);
    assert_eq!(seen.last(), Some(&AgentStatus::Disconnected));
    assert!(!seen.contains(&AgentStatus::Error));
    assert_eq!(controller.snapshot().await.status, AgentStatus::Disconnected);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let sim = Simulation::new();
    let (controller, _seen) = controller_with(&sim, "");
    controller.start().await;

    controller.shutdown().await;
    controller.shutdown().await;

    assert_eq!(controller.snapshot().await.status, AgentStatus::Disconnected);
    assert_eq!(sim.transports.opened().len(), 1);
}

#[tokio::test]
async fn test_shutdown_before_start_is_safe() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");

    controller.shutdown().await;

    assert_eq!(statuses(&seen), vec![AgentStatus::Disconnected]);
}

#[tokio::test]
async fn test_pipeline_failure_moves_through_error_to_disconnected() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;
    let transport = sim.transports.latest_for(ROOM_URL).unwrap();

    sim.engine.latest().unwrap().fail("stt socket closed");
    wait_for_status(&seen, AgentStatus::Disconnected).await;
    assert!(!controller.is_running().await);

    let seen = statuses(&seen);
    let n = seen.len();
    assert_eq!(
        &seen[n - 2..],
        &[AgentStatus::Error, AgentStatus::Disconnected]
    );
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_pipeline_completion_disconnects() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;

    sim.engine.latest().unwrap().complete();
    wait_for_status(&seen, AgentStatus::Disconnected).await;

    assert!(!statuses(&seen).contains(&AgentStatus::Error));
    assert_eq!(controller.snapshot().await.status, AgentStatus::Disconnected);
}

#[tokio::test]
async fn test_refused_connection_never_raises() {
    let sim = Simulation::new();
    sim.transports.refuse_connections(true);
    let (controller, seen) = controller_with(&sim, "");

    controller.start().await;

    assert_eq!(
        statuses(&seen),
        vec![
            AgentStatus::Connecting,
            AgentStatus::Error,
            AgentStatus::Disconnected
        ]
    );
    assert_eq!(sim.engine.build_count(), 0);
    assert!(!controller.is_running().await);
}

#[tokio::test]
async fn test_restart_after_pipeline_end_builds_new_run() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;
    sim.engine.latest().unwrap().complete();
    wait_for_status(&seen, AgentStatus::Disconnected).await;

    controller.start().await;

    assert_eq!(sim.engine.build_count(), 2);
    assert_eq!(controller.snapshot().await.status, AgentStatus::Connecting);
    assert!(controller.is_running().await);
}

#[tokio::test]
async fn test_event_from_previous_connection_does_not_reach_restarted_run() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;
    let old_transport = sim.transports.latest_for(ROOM_URL).unwrap();
    sim.engine.latest().unwrap().complete();
    wait_for_status(&seen, AgentStatus::Disconnected).await;
    assert!(controller.is_disconnected());

    controller.start().await;
    assert!(!controller.is_disconnected());
    assert!(old_transport.is_closed());

    old_transport
        .emit(TransportEvent::FirstParticipantJoined(Participant::new("ghost")))
        .await;
    assert_eq!(controller.snapshot().await.status, AgentStatus::Connecting);

    // The connection of the current run still brings the agent online.
    let new_transport = sim.transports.opened().last().cloned().unwrap();
    assert!(!Arc::ptr_eq(&new_transport, &old_transport));
    new_transport
        .emit(TransportEvent::FirstParticipantJoined(Participant::new("p1")))
        .await;
    assert_eq!(controller.snapshot().await.status, AgentStatus::Online);
}

#[tokio::test]
async fn test_late_first_participant_after_error_is_ignored() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;
    let transport = sim.transports.latest_for(ROOM_URL).unwrap();

    sim.engine.latest().unwrap().fail("boom");
    wait_for_status(&seen, AgentStatus::Disconnected).await;

    transport
        .emit(TransportEvent::FirstParticipantJoined(Participant::new("p1")))
        .await;
    assert_eq!(controller.snapshot().await.status, AgentStatus::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_controls_are_serialized() {
    let sim = Simulation::new();
    let (controller, seen) = controller_with(&sim, "");
    controller.start().await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let controller = controller.clone();
        let tag = if i % 2 == 0 { "mandy:mute" } else { "mandy:unmute" };
        handles.push(tokio::spawn(async move {
            controller
                .apply_control(&action(tag, &format!("user_{}", i)))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("control task should not panic");
    }

    assert_eq!(controller.snapshot().await.version, 50);

    let versions: Vec<u64> = seen.lock().unwrap().iter().map(|s| s.version).collect();
    let published: Vec<u64> = versions.into_iter().filter(|v| *v > 0).collect();
    assert_eq!(published, (1..=50).collect::<Vec<u64>>());
}
