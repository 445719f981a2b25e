mod debug;
pub mod net;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use debug::FrameStats;
use net::{ClientConfig, NetworkClient, SpeciesTable};

#[derive(Parser)]
#[command(name = "flock-client")]
#[command(about = "Headless observer that interpolates replicated mobs")]
struct Args {
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", flock::DEFAULT_PORT))]
    server: String,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    #[arg(long, help = "Seconds to run before disconnecting (runs until killed if omitted)")]
    duration: Option<f64>,

    #[arg(long, help = "JSON file with per-species interpolation speeds and yaw offsets")]
    tuning: Option<PathBuf>,

    #[arg(long, help = "Client-side interpolation delay in seconds")]
    delay: Option<f64>,

    #[arg(long, help = "Snap distance between buffered samples")]
    teleport_distance: Option<f32>,
}

impl Args {
    fn config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::default();
        if let Some(path) = &self.tuning {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            config.species = serde_json::from_str::<SpeciesTable>(&text)
                .with_context(|| format!("invalid tuning table in {}", path.display()))?;
        }
        if let Some(delay) = self.delay {
            config.interpolation.delay = delay;
        }
        if let Some(distance) = self.teleport_distance {
            config.interpolation.teleport_distance = distance;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address {}", args.server))?;

    let mut client = NetworkClient::new(args.config()?)?;
    client.connect(server_addr)?;

    let frame_time = Duration::from_secs_f64(1.0 / args.fps.max(1) as f64);
    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();
    let mut stats = FrameStats::new();
    let mut was_connected = false;

    loop {
        let now = Instant::now();
        let dt = (now - last_frame).as_secs_f32();
        last_frame = now;

        if let Some(frame) = client.update(dt)? {
            stats.record_frame(dt, &frame);
        }
        stats.observe_tick(client.replication().and_then(|r| r.last_tick()));

        if client.is_connected() {
            was_connected = true;
        } else if was_connected || client.state() == flock::ConnectionState::Disconnected {
            log::info!("session ended");
            break;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            report(&client, &mut stats);
            last_report = Instant::now();
        }

        if args
            .duration
            .is_some_and(|limit| started.elapsed().as_secs_f64() >= limit)
        {
            break;
        }

        let spent = now.elapsed();
        if spent < frame_time {
            thread::sleep(frame_time - spent);
        }
    }

    client.disconnect();
    let net = client.stats();
    log::info!(
        "received {} packets ({} KiB), rejected {}, rtt {:.1}ms",
        net.packets_received,
        net.bytes_received / 1024,
        net.packets_rejected,
        net.rtt_ms
    );
    Ok(())
}

fn report(client: &NetworkClient, stats: &mut FrameStats) {
    let window = stats.take_window();
    let Some(replication) = client.replication() else {
        log::info!("waiting for session ({:?})", client.state());
        return;
    };
    let lifecycle = replication.lifecycle();
    log::info!(
        "{:.0} fps | {:.1} ticks/s | {} known {} dying | {:.1} animated {:.1} deferred {:.1} culled | {} buffered samples",
        stats.fps(),
        stats.tick_rate(),
        lifecycle.active_count(),
        lifecycle.dying_count(),
        window.animated,
        window.deferred,
        window.culled,
        lifecycle.buffer().sample_count()
    );
}
