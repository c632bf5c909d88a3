//! Iceworld sandbox - headless client runner
//!
//! Spins up two in-process replicas connected through the in-memory
//! transport hub and lets their reconciliation loops converge: presence,
//! chat, mailbox nudges, the lot. Useful as a smoke run and as a reference
//! for embedding the core into a real engine.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iceworld_client::config::Config;
use iceworld_client::game::headless::HeadlessStage;
use iceworld_client::game::{LocalTickInput, ReconciliationLoop};
use iceworld_client::net::memory::MemoryHub;
use iceworld_client::net::protocol::CursorSnapshot;
use iceworld_client::session::SessionContext;
use iceworld_client::util::time::tick_delta;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Iceworld sandbox");
    info!(
        lobby = %config.lobby_name,
        tick_rate = config.tick_rate,
        "two headless replicas, one in-memory hub"
    );

    let hub = MemoryHub::new();
    let mut handles = Vec::new();

    for name in ["pingu", "nootnoot"] {
        let mut replica_config = config.clone();
        replica_config.username = name.to_string();

        let mut connector = hub.connector();
        let session = SessionContext::connect(&replica_config, &mut connector).into_shared();
        let seed = session.lock().local_identity();

        let (stage, _probe) = HeadlessStage::new();
        let mut game = ReconciliationLoop::new(session, Box::new(stage));
        game.send_chat(&format!("{name} waddled in"));

        let tick_rate = replica_config.tick_rate;
        handles.push(tokio::spawn(async move {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            game.run(tick_rate, move |tick| {
                Some(LocalTickInput {
                    cursor: CursorSnapshot {
                        left: rng.gen_bool(0.3),
                        right: rng.gen_bool(0.3),
                        space: rng.gen_bool(0.05),
                    },
                    state_name: if tick % 60 < 30 { "walk" } else { "idle" }.to_string(),
                    dt: tick_delta(tick_rate),
                })
            })
            .await;
        }));
    }

    shutdown_signal().await;
    info!("Sandbox shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
