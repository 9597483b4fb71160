//! Integration tests for the game engine
//!
//! Engines run on a synthetic clock; multiplayer scenarios use the
//! in-process mesh so no sockets are involved.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tr_core::constants::FIXED_DT;
use tr_core::input::InputEvent;
use tr_core::model::{FinishRule, RaceConfig, RoomState};
use tr_core::storage::{MemoryProfileStore, ProfileStore};
use tr_core::transport::{PeerTransport, TransportEvent};
use tr_core::CoreError;
use tr_net::{LocalMesh, MeshConfig, MeshTransport};
use tr_server::render::HeadlessRenderer;
use tr_server::{scheduler, Controller, EngineConfig, FileProfileStore, GameEngine, RendererKind};

const TIME_LIMIT: f64 = 600.0;

fn config(seed: u64) -> EngineConfig {
    EngineConfig {
        renderer: RendererKind::Headless,
        seed: Some(seed),
        ..EngineConfig::default()
    }
}

fn store() -> Arc<MemoryProfileStore> {
    Arc::new(MemoryProfileStore::new())
}

/// Helper: step `engines` frame by frame until `done` holds; returns the final time
fn run_until(engines: &mut [&mut GameEngine], start: f64, mut done: impl FnMut(&[&mut GameEngine]) -> bool) -> f64 {
    let mut now = start;
    while !done(&*engines) {
        assert!(now < start + TIME_LIMIT, "scenario did not settle within {TIME_LIMIT}s");
        for engine in engines.iter_mut() {
            engine.frame(now);
        }
        now += FIXED_DT;
    }
    now
}

// ==================== Single player ====================

#[test]
fn test_single_player_race_against_bots_finishes() {
    let profiles = store();
    let mut engine = GameEngine::new("me", config(7), profiles.clone()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.add_player("bot-a", true).unwrap();
    engine.add_player("bot-b", true).unwrap();
    engine.handle_input(InputEvent::KeyDown("Space".into()));

    run_until(&mut [&mut engine], 0.0, |e| e[0].room().state == RoomState::Finished);

    let results = engine.results();
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().map(|r| r.placement).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(results.windows(2).all(|w| w[0].finish_time <= w[1].finish_time));
    assert!(!engine.is_running());

    let profile = profiles.load("me").unwrap().unwrap();
    assert_eq!(profile.statistics.total_races, 1);
    assert!(profile.statistics.best_lap_time.is_some());
    assert!((profile.statistics.total_distance - 100.0).abs() < 1e-9);
    let placement = results.iter().find(|r| r.player_id == "me").unwrap().placement;
    assert_eq!(profile.statistics.wins, u32::from(placement == 1));
}

#[test]
fn test_first_finisher_ends_the_race() {
    let mut config = config(3);
    config.race = RaceConfig {
        finish_rule: FinishRule::FirstFinisher,
        ..RaceConfig::default()
    };
    let mut engine = GameEngine::new("me", config, store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.add_player("slow-bot", true).unwrap();
    engine.handle_input(InputEvent::MouseDown);
    engine.start_race().unwrap();

    run_until(&mut [&mut engine], 0.0, |e| e[0].room().state == RoomState::Finished);
    // Only those who crossed on the deciding tick are classified
    let results = engine.results();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.finish_time == results[0].finish_time));
}

#[test]
fn test_countdown_then_racing() {
    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.add_player("bot", true).unwrap();

    // Two participants start the countdown on their own
    let report = engine.frame(10.0);
    assert_eq!(report.state, RoomState::Countdown);
    assert_eq!(report.ticks, 0);

    assert_eq!(engine.frame(12.9).state, RoomState::Countdown);
    assert_eq!(engine.frame(13.0).state, RoomState::Racing);
    assert!(engine.is_running());

    // The first racing frame only sets the baseline
    let report = engine.frame(13.0 + 0.033);
    assert_eq!(report.ticks, 1);
    assert!(report.alpha > 0.0 && report.alpha < 1.0);
}

#[test]
fn test_long_stall_runs_capped_ticks() {
    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.start_race().unwrap();

    engine.frame(0.0);
    let report = engine.frame(10.0);
    assert_eq!(report.ticks, 60);
    assert_eq!(engine.tick(), 60);
}

#[test]
fn test_idle_tractor_stays_put() {
    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.start_race().unwrap();

    run_until(&mut [&mut engine], 0.0, |e| e[0].tick() >= 120);
    let state = &engine.player_states()["me"];
    assert_eq!(state.position.0, 0.0);
    assert_eq!(state.velocity.0, 0.0);
}

#[test]
fn test_room_full_rejects_extra_players() {
    let mut config = config(1);
    config.race.max_players = 2;
    let mut engine = GameEngine::new("me", config, store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.add_player("b1", true).unwrap();

    let err = engine.add_player("b2", true).unwrap_err();
    assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::RoomFull { max: 2 })));
    assert_eq!(engine.player_states().len(), 2);
}

#[test]
fn test_invalid_ids_are_rejected() {
    assert!(GameEngine::new("bad id", config(1), store()).is_err());

    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    assert!(engine.add_player("", false).is_err());
    assert!(engine.add_player("a/b", true).is_err());
}

#[test]
fn test_remove_player() {
    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.add_player("bot", true).unwrap();

    assert!(engine.remove_player("bot"));
    assert!(!engine.remove_player("bot"));
    assert!(!engine.room().participants.contains("bot"));
}

#[test]
fn test_destroy_is_idempotent() {
    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.start_race().unwrap();
    engine.frame(0.0);

    engine.destroy();
    engine.destroy();
    assert!(engine.is_destroyed());
    assert!(!engine.is_running());
    assert_eq!(engine.frame(5.0).ticks, 0);
    assert!(engine.add_player("late", false).is_err());
    assert!(engine.start_race().is_err());
}

#[test]
fn test_render_frames_interpolate_between_ticks() {
    let renderer = HeadlessRenderer::new();
    let frames = renderer.frames();
    let mut engine = GameEngine::with_renderer("me", config(1), Box::new(renderer), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.handle_input(InputEvent::KeyDown("KeyW".into()));
    engine.start_race().unwrap();

    run_until(&mut [&mut engine], 0.0, |e| e[0].tick() >= 300);

    let frames = frames.lock().unwrap();
    let last = frames.back().unwrap();
    assert_eq!(last.tick, engine.tick());
    let view = &last.entities[0];
    assert_eq!(view.player_id, "me");
    assert!(view.position <= engine.player_states()["me"].position.0);
    assert!(view.position > 0.0);
    assert!(view.wheel_rotation > 0.0);
}

#[test]
fn test_profile_written_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let profiles = Arc::new(FileProfileStore::new(dir.path()).unwrap());
    let mut engine = GameEngine::new("me", config(9), profiles.clone()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.handle_input(InputEvent::TouchStart);
    engine.start_race().unwrap();

    run_until(&mut [&mut engine], 0.0, |e| e[0].room().state == RoomState::Finished);

    assert!(dir.path().join("me.json").exists());
    let profile = profiles.load("me").unwrap().unwrap();
    assert_eq!(profile.statistics.total_races, 1);
    assert_eq!(profile.statistics.wins, 1);
}

// ==================== Multiplayer over the mesh ====================

fn pair(mesh: &LocalMesh) -> (GameEngine, GameEngine) {
    let mut host = GameEngine::new("host", config(11), store()).unwrap();
    host.add_player("host", false).unwrap();
    host.init_with_transport(Box::new(mesh.join("host").unwrap()), "barn", true)
        .unwrap();

    let mut guest = GameEngine::new("guest", config(12), store()).unwrap();
    guest.add_player("guest", false).unwrap();
    guest
        .init_with_transport(Box::new(mesh.join("guest").unwrap()), "barn", false)
        .unwrap();
    (host, guest)
}

#[test]
fn test_host_and_guest_race_to_the_finish() {
    let mesh = LocalMesh::new();
    let (mut host, mut guest) = pair(&mesh);
    host.add_player("bot", true).unwrap();
    host.handle_input(InputEvent::KeyDown("ArrowUp".into()));
    guest.handle_input(InputEvent::KeyDown("Space".into()));

    let end = run_until(&mut [&mut host, &mut guest], 0.0, |e| {
        e[0].room().state == RoomState::Finished
    });
    run_until(&mut [&mut guest], end, |e| e[0].room().state == RoomState::Finished);

    assert!(host.is_host());
    assert!(!guest.is_host());
    assert!(matches!(host.controller("guest"), Some(Controller::Remote)));
    assert!(matches!(guest.controller("host"), Some(Controller::Remote)));
    assert!(matches!(guest.controller("bot"), Some(Controller::Remote)));

    // The guest adopts the host's finishing order
    let host_order: Vec<String> = host.results().into_iter().map(|r| r.player_id).collect();
    let guest_order: Vec<String> = guest.results().into_iter().map(|r| r.player_id).collect();
    assert_eq!(host_order.len(), 3);
    assert_eq!(guest_order, host_order);
}

#[test]
fn test_guest_prediction_tracks_host() {
    let mesh = LocalMesh::new();
    let (mut host, mut guest) = pair(&mesh);
    guest.handle_input(InputEvent::KeyDown("Space".into()));
    host.start_race().unwrap();

    run_until(&mut [&mut host, &mut guest], 0.0, |e| e[0].tick() >= 600);

    let host_view = &host.player_states()["guest"];
    let guest_view = &guest.player_states()["guest"];
    assert!(host_view.position.0 > 0.0);
    assert!(host_view.input_sequence > 0);
    // Prediction runs ahead of the acknowledged state by at most a few ticks
    assert!(guest_view.position.0 >= host_view.position.0);
    assert!(guest_view.position.0 - host_view.position.0 < 1.0);
    assert_eq!(guest.room().host_id, "host");
}

#[test]
fn test_guest_cannot_add_bots() {
    let mesh = LocalMesh::new();
    let (_host, mut guest) = pair(&mesh);
    assert!(guest.add_player("bot", true).is_err());
}

#[test]
fn test_chat_reaches_peers() {
    let mesh = LocalMesh::new();
    let (mut host, mut guest) = pair(&mesh);
    run_until(&mut [&mut host, &mut guest], 0.0, |e| e[0].player_states().len() == 2);

    guest.send_chat("nice tractor");
    run_until(&mut [&mut host, &mut guest], 1.0, |e| !e[0].chat_log().is_empty());

    let chat = &host.chat_log()[0];
    assert_eq!(chat.player_id, "guest");
    assert_eq!(chat.message, "nice tractor");
    assert_eq!(guest.chat_log().len(), 1);
}

#[test]
fn test_departure_removes_entity_and_migrates_host() {
    let mesh = LocalMesh::new();
    let (mut host, mut guest) = pair(&mesh);
    // The guest learns who hosts from the first snapshot
    run_until(&mut [&mut host, &mut guest], 0.0, |e| {
        e[1].room().state == RoomState::Racing && e[1].player_states().len() == 2
    });
    assert_eq!(guest.room().host_id, "host");

    host.destroy();
    run_until(&mut [&mut guest], 1.0, |e| e[0].player_states().len() == 1);
    assert!(guest.is_host());
    assert_eq!(guest.room().host_id, "guest");
}

/// Mesh link that loses the first few snapshots announcing a finisher
struct LoseFinishSnapshots {
    inner: MeshTransport,
    remaining: usize,
}

impl PeerTransport for LoseFinishSnapshots {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn local_id(&self) -> &str {
        self.inner.local_id()
    }

    fn peers(&self) -> Vec<String> {
        self.inner.peers()
    }

    fn send(&mut self, peer: &str, payload: &str) -> anyhow::Result<()> {
        self.inner.send(peer, payload)
    }

    fn broadcast(&mut self, payload: &str) -> anyhow::Result<()> {
        self.inner.broadcast(payload)
    }

    fn poll(&mut self) -> anyhow::Result<Vec<TransportEvent>> {
        let mut events = self.inner.poll()?;
        events.retain(|event| match event {
            TransportEvent::Message { payload, .. } if self.remaining > 0 && payload.contains("\"finished\":true") => {
                self.remaining -= 1;
                false
            }
            _ => true,
        });
        Ok(events)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.inner.close()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

#[test]
fn test_guest_finishes_when_deciding_snapshot_is_lost() {
    let mesh = LocalMesh::new();
    let mut race = config(21);
    race.race = RaceConfig {
        finish_rule: FinishRule::FirstFinisher,
        ..RaceConfig::default()
    };

    let mut host = GameEngine::new("host", race.clone(), store()).unwrap();
    host.add_player("host", false).unwrap();
    host.init_with_transport(Box::new(mesh.join("host").unwrap()), "barn", true)
        .unwrap();

    let mut guest = GameEngine::new("guest", race, store()).unwrap();
    guest.add_player("guest", false).unwrap();
    let link = LoseFinishSnapshots {
        inner: mesh.join("guest").unwrap(),
        remaining: 3,
    };
    guest.init_with_transport(Box::new(link), "barn", false).unwrap();

    host.handle_input(InputEvent::KeyDown("Space".into()));
    host.start_race().unwrap();

    let end = run_until(&mut [&mut host, &mut guest], 0.0, |e| {
        e[0].room().state == RoomState::Finished
    });
    run_until(&mut [&mut host, &mut guest], end, |e| {
        e[1].room().state == RoomState::Finished
    });

    let host_order: Vec<String> = host.results().into_iter().map(|r| r.player_id).collect();
    let guest_order: Vec<String> = guest.results().into_iter().map(|r| r.player_id).collect();
    assert_eq!(host_order, vec!["host".to_string()]);
    assert_eq!(guest_order, host_order);
}

#[test]
fn test_new_host_drives_the_old_hosts_bots() {
    let mesh = LocalMesh::new();
    let (mut host, mut guest) = pair(&mesh);
    host.add_player("bot", true).unwrap();
    guest.handle_input(InputEvent::KeyDown("Space".into()));

    let end = run_until(&mut [&mut host, &mut guest], 0.0, |e| {
        e[1].room().state == RoomState::Racing && e[1].player_states().len() == 3
    });
    assert!(matches!(guest.controller("bot"), Some(Controller::Remote)));

    host.destroy();
    let end = run_until(&mut [&mut guest], end, |e| e[0].is_host());
    assert!(matches!(guest.controller("bot"), Some(Controller::Bot(_))));
    assert!(guest.controller("host").is_none());

    run_until(&mut [&mut guest], end, |e| e[0].room().state == RoomState::Finished);
    let finishers: Vec<String> = guest.results().into_iter().map(|r| r.player_id).collect();
    assert_eq!(finishers.len(), 2);
    assert!(finishers.contains(&"bot".to_string()));
    assert!(finishers.contains(&"guest".to_string()));
}

#[test]
fn test_lossy_mesh_still_finishes() {
    let mesh = LocalMesh::with_config(MeshConfig {
        loss: 0.1,
        reorder: 0.1,
        seed: 5,
    });
    let (mut host, mut guest) = pair(&mesh);
    host.handle_input(InputEvent::KeyDown("Space".into()));
    guest.handle_input(InputEvent::KeyDown("Space".into()));
    // A lost join must not hold the lobby open
    host.start_race().unwrap();

    run_until(&mut [&mut host, &mut guest], 0.0, |e| {
        e[0].room().state == RoomState::Finished
    });
    let finishers: Vec<String> = host.results().into_iter().map(|r| r.player_id).collect();
    assert_eq!(finishers.len(), 2);
    assert!(finishers.contains(&"guest".to_string()));
    assert!(matches!(guest.controller("host"), Some(Controller::Remote)));
}

// ==================== Async driver ====================

#[tokio::test]
async fn test_driver_runs_until_cancelled() {
    let mut engine = GameEngine::new("me", config(1), store()).unwrap();
    engine.add_player("me", false).unwrap();
    engine.start_race().unwrap();
    let engine = Arc::new(Mutex::new(engine));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler::drive(engine.clone(), Duration::from_millis(5), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    task.await.unwrap();

    let engine = engine.lock().await;
    assert!(engine.tick() > 0);
}

#[tokio::test]
async fn test_driver_stops_when_engine_destroyed() {
    let engine = Arc::new(Mutex::new(GameEngine::new("me", config(1), store()).unwrap()));
    engine.lock().await.destroy();

    let task = tokio::spawn(scheduler::drive(
        engine.clone(),
        Duration::from_millis(5),
        CancellationToken::new(),
    ));
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
}
