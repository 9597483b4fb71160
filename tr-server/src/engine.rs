//! Game engine
//!
//! The engine is the single owner of every entity's physics model. It
//! composes the input sampler, the bot agents, the replication manager and
//! the renderer around a fixed-step loop:
//!
//! - Input sampling happens before physics, physics before render
//! - Clients predict their own tractor and reconcile against host snapshots
//! - The host runs authoritative physics for everyone and broadcasts snapshots

use crate::config::EngineConfig;
use crate::render::create_renderer;
use crate::scheduler::FixedStepClock;
use anyhow::{anyhow, bail, ensure, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tr_core::agent::AutonomousAgent;
use tr_core::constants::{BOT_NAMES, FINAL_SNAPSHOT_REPEATS};
use tr_core::input::{InputEvent, InputSampler};
use tr_core::model::{
    validate_id, FinishRule, PlayerId, PlayerState, Room, RoomState, StateSnapshot, TractorConfig, WeatherCondition,
};
use tr_core::physics::PhysicsModel;
use tr_core::presets;
use tr_core::protocol::ChatMessage;
use tr_core::render::{EntityView, RenderFrame, Renderer};
use tr_core::storage::{PlayerProfile, ProfileStore, RaceRecord};
use tr_core::transport::PeerTransport;
use tr_net::{DirectConfig, DirectTransport, ReplicationConfig, ReplicationEvent, ReplicationManager, Role};
use tracing::{debug, error, info, warn};

/// Where an entity's throttle comes from each tick
#[derive(Debug)]
pub enum Controller {
    /// The local input sampler
    Local,
    /// An autonomous agent
    Bot(AutonomousAgent),
    /// Another peer; the host applies its latest input, clients coast at zero
    Remote,
}

#[derive(Debug)]
struct Entity {
    username: String,
    controller: Controller,
    model: PhysicsModel,
    tractor_config: TractorConfig,
    previous_position: f64,
    finish_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub player_id: PlayerId,
    pub username: String,
    /// 1-based
    pub placement: usize,
    /// Seconds since the start
    pub finish_time: f64,
}

/// What one call to `frame` did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub ticks: u32,
    pub alpha: f64,
    pub state: RoomState,
}

pub struct GameEngine {
    config: EngineConfig,
    local_id: PlayerId,
    room: Room,
    weather: WeatherCondition,
    entities: BTreeMap<PlayerId, Entity>,
    input: InputSampler,
    replication: Option<ReplicationManager>,
    renderer: Box<dyn Renderer>,
    profiles: Arc<dyn ProfileStore>,
    clock: FixedStepClock,
    rng: StdRng,

    running: bool,
    destroyed: bool,
    tick: u64,
    race_time: f64,
    countdown_deadline: Option<f64>,
    finish_order: Vec<PlayerId>,
    chat_log: Vec<ChatMessage>,
    bots_added: usize,
    final_repeats_left: u32,
}

impl GameEngine {
    pub fn new(local_id: &str, config: EngineConfig, profiles: Arc<dyn ProfileStore>) -> Result<Self> {
        let renderer = create_renderer(config.renderer);
        Self::with_renderer(local_id, config, renderer, profiles)
    }

    pub fn with_renderer(
        local_id: &str,
        config: EngineConfig,
        renderer: Box<dyn Renderer>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self> {
        validate_id(local_id)?;
        ensure!(
            config.fixed_step.is_finite() && config.fixed_step > 0.0,
            "fixed step must be a positive number of seconds"
        );

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let room = Room::new("local", local_id, config.race.clone());
        let weather = config.race.weather.condition();
        let clock = FixedStepClock::new(config.fixed_step, config.max_catch_up_ticks);

        info!(
            "Engine for {} ready ({} renderer, {})",
            local_id,
            renderer.name(),
            config.race.weather.label()
        );

        Ok(Self {
            config,
            local_id: local_id.to_string(),
            room,
            weather,
            entities: BTreeMap::new(),
            input: InputSampler::new(),
            replication: None,
            renderer,
            profiles,
            clock,
            rng,
            running: false,
            destroyed: false,
            tick: 0,
            race_time: 0.0,
            countdown_deadline: None,
            finish_order: Vec::new(),
            chat_log: Vec::new(),
            bots_added: 0,
            final_repeats_left: 0,
        })
    }

    // === Multiplayer setup ===

    /// Join `room_id` through the signaling relay and open direct peer links
    pub async fn init_multiplayer(
        &mut self,
        local_id: &str,
        room_id: &str,
        is_host: bool,
        signaling_addr: &str,
    ) -> Result<()> {
        ensure!(
            local_id == self.local_id,
            "engine was created for {}, not {}",
            self.local_id,
            local_id
        );
        let transport = DirectTransport::connect(signaling_addr, room_id, local_id, DirectConfig::default()).await?;
        self.init_with_transport(Box::new(transport), room_id, is_host)
    }

    /// Replicate over an already connected transport
    pub fn init_with_transport(&mut self, transport: Box<dyn PeerTransport>, room_id: &str, is_host: bool) -> Result<()> {
        ensure!(!self.destroyed, "engine destroyed");
        ensure!(self.replication.is_none(), "multiplayer already initialised");
        ensure!(
            transport.local_id() == self.local_id,
            "transport belongs to {}, engine to {}",
            transport.local_id(),
            self.local_id
        );
        validate_id(room_id)?;

        let local = self.entities.get(&self.local_id);
        let replication_config = ReplicationConfig {
            username: local.map(|e| e.username.clone()),
            tractor_config: local.map(|e| e.tractor_config.clone()).unwrap_or_default(),
            history_capacity: self.config.input_history,
            fixed_step: self.config.fixed_step,
        };
        let role = if is_host { Role::Host } else { Role::Client };

        self.room.room_id = room_id.to_string();
        if is_host {
            self.room.host_id = self.local_id.clone();
        }
        self.replication = Some(ReplicationManager::new(transport, role, replication_config));
        info!("Multiplayer ready in room {} ({:?})", room_id, role);
        Ok(())
    }

    pub fn is_host(&self) -> bool {
        self.replication.as_ref().map(|r| r.is_host()).unwrap_or(true)
    }

    // === Entities ===

    pub fn add_player(&mut self, id: &str, is_bot: bool) -> Result<()> {
        let username = if is_bot {
            let name = BOT_NAMES[self.bots_added % BOT_NAMES.len()];
            name.to_string()
        } else {
            let short: String = id.chars().take(4).collect();
            format!("Player {short}")
        };
        self.add_player_with(id, &username, is_bot, TractorConfig::default())
    }

    pub fn add_player_with(&mut self, id: &str, username: &str, is_bot: bool, tractor_config: TractorConfig) -> Result<()> {
        ensure!(!self.destroyed, "engine destroyed");
        validate_id(id)?;
        if self.entities.contains_key(id) {
            return Ok(());
        }
        if is_bot && !self.is_host() {
            bail!("only the host can add bots");
        }

        let mut model = PhysicsModel::new(presets::get(&tractor_config.preset)?)?;
        model.set_weather(self.weather);
        self.room.add_participant(id)?;

        let controller = if id == self.local_id {
            Controller::Local
        } else if is_bot {
            self.bots_added += 1;
            Controller::Bot(AutonomousAgent::new(&mut self.rng))
        } else {
            Controller::Remote
        };

        if let Err(e) = self.renderer.add_entity(id) {
            warn!("Renderer refused {}: {}", id, e);
        }
        if let Controller::Bot(agent) = &controller {
            debug!(
                "Bot {} is {:?}, aiming for {:.1} km/h",
                username,
                agent.personality(),
                agent.target_speed()
            );
        }
        info!("Player {} ({}) joined", id, username);

        self.entities.insert(
            id.to_string(),
            Entity {
                username: username.to_string(),
                controller,
                model,
                tractor_config,
                previous_position: 0.0,
                finish_time: None,
            },
        );
        Ok(())
    }

    pub fn remove_player(&mut self, id: &str) -> bool {
        self.room.remove_participant(id);
        match self.entities.remove(id) {
            Some(_) => {
                self.renderer.remove_entity(id);
                info!("Player {} removed", id);
                true
            }
            None => false,
        }
    }

    // === Race control ===

    /// Start the countdown; racing begins when it runs out
    pub fn begin_countdown(&mut self, now: f64) -> Result<()> {
        self.room.transition(RoomState::Countdown)?;
        self.countdown_deadline = Some(now + self.room.config.countdown);
        info!("Countdown started: {:.1}s", self.room.config.countdown);
        Ok(())
    }

    /// Go straight to racing (skipping any remaining countdown)
    pub fn start_race(&mut self) -> Result<()> {
        ensure!(!self.destroyed, "engine destroyed");
        if self.room.state == RoomState::Lobby {
            self.room.transition(RoomState::Countdown)?;
        }
        self.room.transition(RoomState::Racing)?;
        self.countdown_deadline = None;
        self.running = true;
        self.clock.reset();
        info!("Race started with {} tractors", self.entities.len());
        Ok(())
    }

    /// Stop ticking. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.running {
            info!("Simulation stopped at tick {}", self.tick);
        }
        self.running = false;
    }

    /// Stop, release peers, detach input and the renderer. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop();
        if let Some(replication) = self.replication.as_mut() {
            replication.disconnect(self.race_time);
        }
        self.input.detach();
        self.renderer.destroy();
        self.entities.clear();
        self.destroyed = true;
        info!("Engine for {} destroyed", self.local_id);
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        self.input.handle(event);
    }

    pub fn send_chat(&mut self, message: &str) -> ChatMessage {
        let chat = match self.replication.as_mut() {
            Some(replication) => replication.send_chat(message, self.race_time),
            None => ChatMessage {
                player_id: self.local_id.clone(),
                message: message.to_string(),
                timestamp: self.race_time,
            },
        };
        self.chat_log.push(chat.clone());
        chat
    }

    // === Frame loop ===

    /// One host frame callback at wall-clock `now` (seconds)
    pub fn frame(&mut self, now: f64) -> FrameReport {
        if self.destroyed {
            return FrameReport {
                ticks: 0,
                alpha: 0.0,
                state: self.room.state,
            };
        }

        self.pump_network();

        if self.is_host() && self.room.should_auto_start() && !self.entities.is_empty() {
            if let Err(e) = self.begin_countdown(now) {
                warn!("Auto start failed: {}", e);
            }
        }
        if let Some(deadline) = self.countdown_deadline {
            if now >= deadline && self.room.state == RoomState::Countdown {
                if let Err(e) = self.start_race() {
                    error!("Failed to start race: {}", e);
                }
            }
        }

        if !self.running {
            self.repeat_final_snapshot();
            return FrameReport {
                ticks: 0,
                alpha: 0.0,
                state: self.room.state,
            };
        }

        let frame = self.clock.advance(now);
        let mut ran = 0;
        for _ in 0..frame.ticks {
            if !self.running {
                break;
            }
            self.fixed_update();
            ran += 1;
        }

        self.render(frame.alpha, frame.delta_time);

        FrameReport {
            ticks: ran,
            alpha: frame.alpha,
            state: self.room.state,
        }
    }

    fn fixed_update(&mut self) {
        let dt = self.config.fixed_step;
        self.tick += 1;
        self.race_time += dt;

        let local_throttle = self.input.throttle();
        let is_host = self.is_host();

        if let Some(replication) = self.replication.as_mut() {
            if !is_host && self.entities.contains_key(&self.local_id) {
                replication.send_input(local_throttle, self.race_time);
            }
        }

        let replication = self.replication.as_ref();
        for (id, entity) in self.entities.iter_mut() {
            entity.previous_position = entity.model.position();
            let throttle = match &entity.controller {
                Controller::Local => local_throttle,
                Controller::Bot(agent) => agent.throttle(),
                Controller::Remote if is_host => replication.and_then(|r| r.latest_throttle(id)).unwrap_or(0.0),
                Controller::Remote => 0.0,
            };
            entity.model.update(dt, throttle);
        }

        for entity in self.entities.values_mut() {
            if let Controller::Bot(agent) = &mut entity.controller {
                agent.update(&entity.model.state());
            }
        }

        // Clients learn finishers from snapshots
        if is_host {
            self.check_finishers();
        }

        if is_host && self.replication.is_some() {
            let players = self.player_states();
            let timestamp = self.race_time;
            if let Some(replication) = self.replication.as_mut() {
                replication.broadcast_snapshot(players, timestamp);
            }
        }

        if self.race_complete() {
            self.finish_race();
        }
    }

    fn check_finishers(&mut self) {
        let track_length = self.room.config.track_length;
        for (id, entity) in self.entities.iter_mut() {
            if entity.finish_time.is_none() && entity.model.position() >= track_length {
                entity.finish_time = Some(self.race_time);
                self.finish_order.push(id.clone());
                info!(
                    "{} finished in place {} after {:.2}s",
                    entity.username,
                    self.finish_order.len(),
                    self.race_time
                );
            }
        }
    }

    fn race_complete(&self) -> bool {
        if self.room.state != RoomState::Racing || self.entities.is_empty() {
            return false;
        }
        match self.room.config.finish_rule {
            FinishRule::AllFinished => self.entities.values().all(|e| e.finish_time.is_some()),
            FinishRule::FirstFinisher => !self.finish_order.is_empty(),
        }
    }

    fn finish_race(&mut self) {
        if let Err(e) = self.room.transition(RoomState::Finished) {
            warn!("Cannot finish race: {}", e);
            return;
        }
        self.running = false;
        if self.replication.is_some() && self.is_host() {
            self.final_repeats_left = FINAL_SNAPSHOT_REPEATS;
        }
        info!("Race finished after {} ticks", self.tick);
        for result in self.results() {
            info!("  {}. {} ({:.2}s)", result.placement, result.username, result.finish_time);
        }
        if let Err(e) = self.record_local_result() {
            error!("Failed to update profile for {}: {}", self.local_id, e);
        }
    }

    /// Repeat the finishing snapshot for a while after the race ends
    fn repeat_final_snapshot(&mut self) {
        if self.final_repeats_left == 0 || self.room.state != RoomState::Finished || !self.is_host() {
            return;
        }
        self.final_repeats_left -= 1;
        let players = self.player_states();
        let timestamp = self.race_time;
        if let Some(replication) = self.replication.as_mut() {
            replication.broadcast_snapshot(players, timestamp);
        }
    }

    fn record_local_result(&self) -> Result<()> {
        let Some(local) = self.entities.get(&self.local_id) else {
            return Ok(());
        };
        let mut profile = match self.profiles.load(&self.local_id)? {
            Some(profile) => profile,
            None => PlayerProfile::new(&self.local_id, &local.username),
        };
        profile.last_login_at = chrono::Utc::now();
        profile.equipped_tractor = local.tractor_config.clone();
        profile.record_race(RaceRecord {
            placement: self.finish_order.iter().position(|id| *id == self.local_id).map(|i| i + 1),
            distance: local.model.position().min(self.room.config.track_length),
            finish_time: local.finish_time,
        });
        self.profiles.save(&profile)
    }

    fn render(&mut self, alpha: f64, delta_time: f64) {
        let entities = self
            .entities
            .iter()
            .map(|(id, e)| {
                let current = e.model.position();
                let radius = e.model.profile().tires.radius;
                EntityView {
                    player_id: id.clone(),
                    position: e.previous_position + (current - e.previous_position) * alpha,
                    wheel_rotation: e.model.velocity() / radius * delta_time,
                    speed_kph: e.model.speed_kph(),
                    finished: e.finish_time.is_some(),
                }
            })
            .collect();
        let frame = RenderFrame {
            alpha,
            delta_time,
            tick: self.tick,
            entities,
        };
        if let Err(e) = self.renderer.render(&frame) {
            debug!("Render skipped: {}", e);
        }
    }

    // === Network ===

    fn pump_network(&mut self) {
        let Some(replication) = self.replication.as_mut() else {
            return;
        };
        let events = replication.poll();

        for event in events {
            match event {
                ReplicationEvent::PeerJoined {
                    player_id,
                    username,
                    tractor_config,
                } => self.on_peer_joined(&player_id, username, tractor_config),
                ReplicationEvent::PeerLeft { player_id, reason } => {
                    debug!("{} left: {}", player_id, reason);
                    self.remove_player(&player_id);
                }
                ReplicationEvent::Snapshot(snapshot) => self.apply_snapshot(&snapshot),
                ReplicationEvent::Chat(chat) => self.chat_log.push(chat),
                ReplicationEvent::HostChanged { host_id } => {
                    self.room.host_id = host_id.clone();
                    if host_id == self.local_id {
                        info!("Taking over as host at tick {}", self.tick);
                        self.adopt_orphans();
                    }
                }
            }
        }

        // A host can learn about a peer from its inputs alone when the join was lost
        let Some(replication) = self.replication.as_ref() else {
            return;
        };
        if replication.is_host() {
            let unknown: Vec<PlayerId> = replication
                .latest_inputs()
                .keys()
                .filter(|id| !self.entities.contains_key(*id))
                .cloned()
                .collect();
            for id in unknown {
                self.on_peer_joined(&id, None, TractorConfig::default());
            }
        } else if let Some(host) = replication.host_id() {
            if self.room.host_id != host {
                self.room.host_id = host.to_string();
            }
        }
    }

    /// Give remote entities with no peer behind them (the old host's bots) an agent
    fn adopt_orphans(&mut self) {
        let Some(replication) = self.replication.as_ref() else {
            return;
        };
        let members = replication.members();
        for (id, entity) in self.entities.iter_mut() {
            if !matches!(entity.controller, Controller::Remote) || members.contains(id) {
                continue;
            }
            let mut agent = AutonomousAgent::new(&mut self.rng);
            agent.update(&entity.model.state());
            info!("{} is now driven locally ({:?})", entity.username, agent.personality());
            entity.controller = Controller::Bot(agent);
            self.bots_added += 1;
        }
    }

    fn on_peer_joined(&mut self, id: &str, username: Option<String>, tractor_config: TractorConfig) {
        if let Some(entity) = self.entities.get_mut(id) {
            if let Some(name) = username {
                entity.username = name;
            }
            entity.tractor_config = tractor_config;
            return;
        }

        let tractor_config = if presets::get(&tractor_config.preset).is_ok() {
            tractor_config
        } else {
            warn!("{} asked for unknown preset {}, using default", id, tractor_config.preset);
            TractorConfig {
                preset: presets::DEFAULT_PRESET.to_string(),
                ..tractor_config
            }
        };
        let username = username.unwrap_or_else(|| {
            let short: String = id.chars().take(4).collect();
            format!("Player {short}")
        });
        if let Err(e) = self.add_player_with(id, &username, false, tractor_config) {
            warn!("Could not add peer {}: {}", id, e);
        }
    }

    fn apply_snapshot(&mut self, snapshot: &StateSnapshot) {
        if self.is_host() {
            return;
        }
        if matches!(self.room.state, RoomState::Lobby | RoomState::Countdown) {
            if let Err(e) = self.start_race() {
                warn!("Could not follow host into the race: {}", e);
            }
        }

        for (id, entry) in &snapshot.players {
            if id == &self.local_id {
                continue;
            }
            if !self.entities.contains_key(id) {
                self.on_peer_joined(id, Some(entry.username.clone()), entry.tractor_config.clone());
            }
            if let Some(entity) = self.entities.get_mut(id) {
                entity.model.rebase(entry);
            }
        }

        if let (Some(replication), Some(local)) = (self.replication.as_mut(), self.entities.get_mut(&self.local_id)) {
            replication.reconcile(snapshot, &mut local.model);
        }

        // The host decides who finished and when
        let mut finishers: Vec<(&PlayerId, f64)> = snapshot
            .players
            .iter()
            .filter(|(_, p)| p.finished)
            .map(|(id, p)| (id, p.lap_time.unwrap_or(snapshot.timestamp)))
            .collect();
        finishers.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (id, time) in finishers {
            if let Some(entity) = self.entities.get_mut(id) {
                if entity.finish_time.is_none() {
                    entity.finish_time = Some(time);
                    self.finish_order.push(id.clone());
                }
            }
        }

        if self.race_complete() {
            self.finish_race();
        }
    }

    // === Queries ===

    /// Wire view of every entity
    pub fn player_states(&self) -> BTreeMap<PlayerId, PlayerState> {
        let replication = self.replication.as_ref();
        self.entities
            .iter()
            .map(|(id, e)| {
                let mut state = PlayerState::from_vehicle(id, &e.username, &e.model.state());
                state.timestamp = self.race_time;
                state.tractor_config = e.tractor_config.clone();
                state.finished = e.finish_time.is_some();
                state.lap_time = e.finish_time;
                state.input_sequence = match (&e.controller, replication) {
                    (Controller::Remote, Some(r)) => r.acknowledged_sequence(id),
                    (Controller::Local, Some(r)) if !r.is_host() => r.sequence(),
                    _ => 0,
                };
                (id.clone(), state)
            })
            .collect()
    }

    /// Live leaderboard: finishers in finishing order, then everyone else by distance
    pub fn standings(&self) -> Vec<PlayerState> {
        let placement = |id: &PlayerId| self.finish_order.iter().position(|f| f == id);
        let mut states: Vec<PlayerState> = self.player_states().into_values().collect();
        states.sort_by(|a, b| match (placement(&a.player_id), placement(&b.player_id)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.position.0.total_cmp(&a.position.0),
        });
        states
    }

    pub fn results(&self) -> Vec<RaceResult> {
        self.finish_order
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let entity = self.entities.get(id)?;
                Some(RaceResult {
                    player_id: id.clone(),
                    username: entity.username.clone(),
                    placement: i + 1,
                    finish_time: entity.finish_time?,
                })
            })
            .collect()
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn chat_log(&self) -> &[ChatMessage] {
        &self.chat_log
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn race_time(&self) -> f64 {
        self.race_time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn controller(&self, id: &str) -> Option<&Controller> {
        self.entities.get(id).map(|e| &e.controller)
    }

    pub fn renderer_name(&self) -> &str {
        self.renderer.name()
    }

    /// Manual gear change for the local tractor
    pub fn shift(&mut self, up: bool) -> Result<bool> {
        let local = self
            .entities
            .get_mut(&self.local_id)
            .ok_or_else(|| anyhow!("no local tractor"))?;
        Ok(if up { local.model.shift_up() } else { local.model.shift_down() })
    }
}

impl Drop for GameEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}
