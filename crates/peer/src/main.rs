mod config;
mod session;

use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::Result;
use clap::Parser;

use config::{PeerConfig, parse_peer};
use lockstep::PacketLossSimulation;
use lockstep::sync::PeerEntry;
use session::PeerSession;

#[derive(Parser)]
#[command(name = "lockstep-peer")]
#[command(about = "Runs one participant of a lockstep session")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = lockstep::net::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 1)]
    faction: u8,

    #[arg(long = "peer", value_parser = parse_peer, help = "Remote participant as FACTION@IP:PORT")]
    peers: Vec<PeerEntry>,

    #[arg(short, long, default_value_t = 20)]
    tick_rate: u32,

    #[arg(long, default_value_t = 10, help = "Steps between demo commands (0 disables)")]
    command_interval: u64,

    #[arg(long, help = "Exit after this many frames")]
    frames: Option<u64>,

    #[arg(long, default_value_t = 4)]
    steps_per_frame: u32,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = format!("{}:{}", args.bind, args.port);

    let packet_loss = if args.simulate_packet_loss {
        Some(PacketLossSimulation {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
        })
    } else {
        None
    };

    let config = PeerConfig {
        local_faction: args.faction,
        peers: args.peers,
        tick_rate: args.tick_rate,
        command_interval: args.command_interval,
        frame_limit: args.frames,
        initial_steps_per_frame: args.steps_per_frame,
        packet_loss,
    };

    let mut session = PeerSession::new(bind_addr.as_str(), config)?;
    log::info!(
        "Peer started on {} as faction {} (enter q to quit)",
        session.local_endpoint(),
        args.faction
    );
    watch_stdin(session.running())?;
    session.run()?;
    log::info!("Peer shutting down");

    Ok(())
}

/// Clears `running` once `q` is entered on stdin.
fn watch_stdin(running: Arc<AtomicBool>) -> io::Result<()> {
    thread::Builder::new()
        .name("stdin-quit".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if matches!(line.trim(), "q" | "quit") {
                    log::info!("Quit requested");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        })?;
    Ok(())
}
