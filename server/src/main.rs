use clap::Parser;
use log::{error, info};
use railyard_server::agent::PolicyRegistry;
use railyard_server::config::ServerConfig;
use railyard_server::error::ConfigError;
use railyard_server::network::{Server, ServerMessage};
use railyard_server::room::Room;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulation ticks per second
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single bot-only match as fast as possible and exit
    #[arg(short, long)]
    batch: bool,

    /// Base seed for room generators
    #[arg(short, long)]
    seed: Option<u64>,
}

fn load_config(args: &Args) -> Result<ServerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.batch {
        config.batch_mode = true;
    }

    config.validate()?;
    Ok(config)
}

/// Plays one bot-only match and logs how fast it ran.
async fn run_batch(
    config: ServerConfig,
    registry: PolicyRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(agent) = config
        .agents
        .iter()
        .find(|agent| !registry.contains(&agent.policy))
    {
        return Err(ConfigError::UnknownPolicy(agent.policy.clone()).into());
    }

    // Nobody is listening in batch mode, but rooms still need an outbox
    let (outbound, _outbound_rx) = mpsc::unbounded_channel();
    let room = Room::new(
        "batch",
        Arc::new(config),
        Arc::new(registry),
        0,
        outbound,
    );

    let started = Instant::now();
    let rankings = room.run().await;
    let wall = started.elapsed().as_secs_f64();
    let game = room.elapsed_game_seconds().await;

    info!("Batch match finished");
    for (place, ranking) in rankings.iter().enumerate() {
        info!("{}. {} - {}", place + 1, ranking.name, ranking.best_score);
    }
    if wall > 0.0 {
        info!(
            "{:.1}s of game time in {:.2}s wall time ({:.1}x)",
            game,
            wall,
            game / wall
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let registry = PolicyRegistry::with_builtins();

    if config.batch_mode {
        info!(
            "Running batch match at {} ticks/s with {} agents",
            config.tick_rate,
            config.agents.len()
        );
        return run_batch(config, registry).await;
    }

    info!(
        "Starting server on {} ({} players per room, {} ticks/s)",
        config.bind_address(),
        config.players_per_room,
        config.tick_rate
    );
    let mut server = Server::new(config, registry).await?;
    let shutdown = server.shutdown_handle();

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            if shutdown.send(ServerMessage::Shutdown).is_err() {
                error!("Server loop already stopped");
            }
        }
    });

    let result = server.run().await;
    ctrl_c.abort();
    result
}
