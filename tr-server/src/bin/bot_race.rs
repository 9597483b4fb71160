//! Headless race between a host, one networked guest and a field of bots
//!
//! Both engines share an in-process mesh and run on a synthetic clock, so
//! a full race completes in a fraction of a second.
//!
//! Usage: `bot_race [bots] [seed]`

use anyhow::{bail, Context, Result};
use std::env;
use std::sync::Arc;
use tr_core::constants::FIXED_DT;
use tr_core::input::InputEvent;
use tr_core::model::RoomState;
use tr_core::storage::{MemoryProfileStore, ProfileStore};
use tr_net::{LocalMesh, MeshConfig};
use tr_server::{EngineConfig, GameEngine, RendererKind};
use tracing::info;

/// Give up after this much simulated time (seconds)
const TIME_LIMIT: f64 = 600.0;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let bots: usize = match args.first() {
        Some(arg) => arg.parse().with_context(|| format!("invalid bot count {arg:?}"))?,
        None => 3,
    };
    let seed: u64 = match args.get(1) {
        Some(arg) => arg.parse().with_context(|| format!("invalid seed {arg:?}"))?,
        None => 42,
    };

    let mesh = LocalMesh::with_config(MeshConfig {
        loss: 0.02,
        reorder: 0.05,
        seed,
    });
    let profiles: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
    let config = EngineConfig {
        renderer: RendererKind::Headless,
        seed: Some(seed),
        ..EngineConfig::default()
    };

    let mut host = GameEngine::new("host", config.clone(), profiles.clone())?;
    host.add_player("host", false)?;
    host.init_with_transport(Box::new(mesh.join("host")?), "demo", true)?;
    for i in 0..bots {
        host.add_player(&format!("bot-{i}"), true)?;
    }

    let mut guest = GameEngine::new("guest", config, profiles.clone())?;
    guest.add_player("guest", false)?;
    guest.init_with_transport(Box::new(mesh.join("guest")?), "demo", false)?;

    host.handle_input(InputEvent::KeyDown("Space".into()));
    guest.handle_input(InputEvent::TouchStart);

    let mut now = 0.0;
    while host.room().state != RoomState::Finished {
        if now > TIME_LIMIT {
            bail!("race did not finish within {TIME_LIMIT}s");
        }
        host.frame(now);
        guest.frame(now);
        now += FIXED_DT;
    }
    // Let the final snapshot reach the guest
    for _ in 0..10 {
        now += FIXED_DT;
        guest.frame(now);
    }

    info!("Race over after {} ticks", host.tick());
    for result in host.results() {
        println!("{:>2}. {:<16} {:>7.2}s", result.placement, result.username, result.finish_time);
    }

    let (delivered, dropped) = mesh.stats()?;
    println!("mesh: {delivered} delivered, {dropped} dropped");
    if let Some(profile) = profiles.load("host")? {
        println!(
            "host profile: {} races, {} wins, best {:?}",
            profile.statistics.total_races, profile.statistics.wins, profile.statistics.best_lap_time
        );
    }

    host.destroy();
    guest.destroy();
    Ok(())
}
