mod config;
mod events;
mod server;
mod simulation;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::MissedTickBehavior;

use config::ServerConfig;
use flock::{PacketLossSimulation, ReplicationConfig};
use server::GameServer;

#[derive(Parser)]
#[command(name = "flock-server")]
#[command(about = "Authoritative herd server replicating mobs to observers")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = flock::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = flock::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 4, help = "Snapshot worker threads (0 runs jobs inline)")]
    workers: usize,

    #[arg(long, default_value_t = 8)]
    receivers_per_job: usize,

    #[arg(long, default_value_t = 200)]
    mobs: usize,

    #[arg(long, default_value_t = flock::replication::DEFAULT_INTEREST_RADIUS)]
    interest_radius: f32,

    #[arg(long, default_value_t = 256)]
    max_queue_depth: usize,

    #[arg(long, default_value_t = 100, help = "Ticks between forced full syncs (0 disables)")]
    full_sync_interval: u32,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            tick_rate: self.tick_rate,
            max_clients: self.max_clients,
            mob_count: self.mobs,
            replication: ReplicationConfig {
                worker_count: self.workers,
                receivers_per_job: self.receivers_per_job,
                interest_radius: self.interest_radius,
                max_queue_depth: self.max_queue_depth,
                full_sync_interval: self.full_sync_interval,
                ..Default::default()
            },
            global_packet_loss: self
                .simulate_packet_loss
                .then(|| PacketLossSimulation::new(self.loss_percent)),
            ..Default::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);
    let config = args.config();
    let poll_every = Duration::from_millis(2).min(config.tick_duration());

    let mut server = GameServer::new(&bind_addr, config)
        .with_context(|| format!("failed to start server on {}", bind_addr))?;
    log::info!(
        "server listening on {} at {} Hz, {} snapshot workers",
        server.local_addr(),
        args.tick_rate,
        args.workers
    );

    let mut interval = tokio::time::interval(poll_every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                server.update();
                for event in server.drain_events() {
                    event.log();
                }
            }
            result = &mut shutdown => {
                result.context("failed to listen for shutdown signal")?;
                break;
            }
        }
    }

    log::info!("shutting down");
    server.shutdown();
    for event in server.drain_events() {
        event.log();
    }
    let net = server.network_stats();
    log::info!(
        "sent {} packets ({} KiB), received {}, simulated drops {}",
        net.packets_sent,
        net.bytes_sent / 1024,
        net.packets_received,
        net.packets_dropped
    );

    Ok(())
}
