use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use lockstep::sync::{CommandSynchronizer, StepOutcome, SyncEvent};
use lockstep::{Endpoint, FixedTimestep, ReliableTransport};

use crate::config::PeerConfig;

/// One participant of a lockstep session driven by wall-clock time.
pub struct PeerSession {
    sync: CommandSynchronizer<ReliableTransport>,
    config: PeerConfig,
    timestep: FixedTimestep,
    last_update: Instant,
    running: Arc<AtomicBool>,
    frames_executed: u64,
    commands_executed: u64,
}

impl PeerSession {
    pub fn new<A: ToSocketAddrs>(bind_addr: A, config: PeerConfig) -> Result<Self> {
        let transport = ReliableTransport::spawn(bind_addr, config.transport_config())?;
        let sync = CommandSynchronizer::new(transport, config.session_config())?;

        Ok(Self {
            sync,
            timestep: FixedTimestep::new(config.tick_rate),
            last_update: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            frames_executed: 0,
            commands_executed: 0,
            config,
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.sync.transport().local_endpoint()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) -> Result<()> {
        log::info!(
            "Running at {} steps/s, {} steps per frame",
            self.timestep.tick_rate(),
            self.sync.target_steps_per_frame()
        );
        while self.running.load(Ordering::SeqCst) {
            self.tick_once()?;
            std::thread::sleep(self.timestep.remaining().min(Duration::from_millis(1)));
        }

        let stats = self.sync.transport().stats();
        log::info!(
            "Executed {} frame(s) with {} command(s); sent {} message(s), resent {}, dropped {}",
            self.frames_executed,
            self.commands_executed,
            stats.messages_sent,
            stats.messages_resent,
            stats.packets_dropped
        );
        Ok(())
    }

    pub fn tick_once(&mut self) -> Result<()> {
        let now = Instant::now();
        self.timestep.accumulate(now - self.last_update);
        self.last_update = now;

        while self.running.load(Ordering::SeqCst) && self.timestep.consume_tick() {
            match self.sync.advance()? {
                StepOutcome::Advanced { step, closed_frame } => {
                    if let Some(frame) = closed_frame {
                        log::trace!("Closed frame {} at step {}", frame, step);
                    }
                    self.submit_demo_command(step);
                }
                // The tick is spent; paused time counts toward the frame's
                // steps_taken.
                StepOutcome::Paused { .. } => {
                    self.handle_events();
                    return Ok(());
                }
            }
            self.handle_events();
        }
        Ok(())
    }

    fn submit_demo_command(&mut self, step: u64) {
        let interval = self.config.command_interval;
        if interval == 0 || step % interval != 0 {
            return;
        }
        let payload = format!("faction {} step {}", self.config.local_faction, step);
        self.sync.submit_local_command(payload.into_bytes());
    }

    fn handle_events(&mut self) {
        let events: Vec<SyncEvent> = self.sync.drain_events().collect();
        for event in events {
            match event {
                SyncEvent::FrameReady {
                    frame,
                    step,
                    commands,
                } => {
                    self.frames_executed += 1;
                    self.commands_executed += commands.len() as u64;
                    if commands.is_empty() {
                        log::debug!("Frame {} ready at step {}", frame, step);
                    } else {
                        log::info!(
                            "Frame {} ready at step {} with {} command(s)",
                            frame,
                            step,
                            commands.len()
                        );
                    }
                    for command in &commands {
                        log::debug!(
                            "  [{}] {}",
                            command.faction,
                            String::from_utf8_lossy(&command.payload)
                        );
                    }
                }
                SyncEvent::PeerLost { endpoint, faction } => {
                    log::warn!("Faction {} at {} left the session", faction, endpoint);
                }
                SyncEvent::FactionDefeated { faction } => {
                    log::info!("Faction {} defeated", faction);
                }
                SyncEvent::Paused { frame } => {
                    log::warn!("Waiting for peers on frame {}", frame);
                }
                SyncEvent::Resumed { frame } => {
                    log::info!("Frame {} caught up, resuming", frame);
                }
            }
        }

        if !self.config.peers.is_empty() && self.sync.remote_peers().next().is_none() {
            log::warn!("Every remote peer is gone, stopping");
            self.running.store(false, Ordering::SeqCst);
        }
        if self
            .config
            .frame_limit
            .is_some_and(|limit| self.frames_executed >= limit)
        {
            self.running.store(false, Ordering::SeqCst);
        }
    }
}
