use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::net::{Endpoint, ReliableTransport, TransportError, TransportEvent, TransportMode};

use super::config::SessionConfig;
use super::error::SyncError;
use super::frame::{FrameCommand, FrameRecord, FrameState};
use super::message::FrameMessage;
use super::pacing::FramePacer;
use super::{FactionId, FrameNumber};

/// Frame N is released at the start of frame N + 2, so a batch has two
/// frames of local steps to reach every peer.
pub const EXECUTION_DELAY: FrameNumber = 2;

/// What the synchronizer needs from the network.
pub trait FrameTransport {
    /// Queues a reliable message. Delivery is not ordered.
    fn send(&self, payload: &[u8], to: Endpoint) -> Result<(), TransportError>;

    fn poll(&self) -> Vec<TransportEvent>;

    /// Runs pending network I/O for transports that have no threads of
    /// their own.
    fn pump(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Called once a peer has left the session for good.
    fn release_peer(&self, _endpoint: Endpoint) {}
}

impl FrameTransport for ReliableTransport {
    fn send(&self, payload: &[u8], to: Endpoint) -> Result<(), TransportError> {
        ReliableTransport::send(self, payload, to).map(|_| ())
    }

    fn poll(&self) -> Vec<TransportEvent> {
        ReliableTransport::poll(self)
    }

    fn pump(&self) -> Result<(), TransportError> {
        match self.mode() {
            TransportMode::Cooperative => self.tick(),
            TransportMode::Threaded => Ok(()),
        }
    }

    fn release_peer(&self, endpoint: Endpoint) {
        self.forget_peer(endpoint);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Every active faction agreed on this frame. Commands are ordered by
    /// faction id, then by submission order. `step` is the number of local
    /// steps run before the release and is the same on every peer, so the
    /// commands apply from step `step + 1` everywhere.
    FrameReady {
        frame: FrameNumber,
        step: u64,
        commands: Vec<FrameCommand>,
    },
    PeerLost {
        endpoint: Endpoint,
        faction: FactionId,
    },
    FactionDefeated {
        faction: FactionId,
    },
    Paused {
        frame: FrameNumber,
    },
    Resumed {
        frame: FrameNumber,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The local simulation may run this step. `closed_frame` is set when
    /// the step ended a command frame and its batch went out.
    Advanced {
        step: u64,
        closed_frame: Option<FrameNumber>,
    },
    /// The frame due for release at this boundary is not complete yet; the
    /// step must not run.
    Paused { frame: FrameNumber },
}

impl StepOutcome {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused { .. })
    }
}

/// Lockstep barrier on top of a reliable transport.
///
/// Commands submitted locally are batched per command frame and exchanged
/// with every active peer. A frame is released through
/// [`SyncEvent::FrameReady`] only once every active faction has both
/// contributed to it and confirmed it holds all contributions, so every
/// instance releases the same commands for the same frame in the same order.
///
/// Releases only happen at frame boundaries, [`EXECUTION_DELAY`] frames
/// after the released frame closed. Frame lengths are fixed at the start of
/// each frame from pacing data every peer shares, so every instance runs
/// the same number of steps between two releases.
pub struct CommandSynchronizer<T: FrameTransport> {
    transport: T,
    local_faction: FactionId,
    peers: BTreeMap<FactionId, Endpoint>,
    factions_by_endpoint: BTreeMap<Endpoint, FactionId>,
    active: BTreeSet<FactionId>,
    removed: BTreeSet<FactionId>,
    frames: BTreeMap<FrameNumber, FrameRecord>,
    outgoing: Vec<Vec<u8>>,
    open_frame: FrameNumber,
    next_flush: FrameNumber,
    step: u64,
    ticks: u64,
    steps_in_frame: u32,
    frame_length: u32,
    pacer: FramePacer,
    paused_on: Option<FrameNumber>,
    events: VecDeque<SyncEvent>,
}

impl<T: FrameTransport> CommandSynchronizer<T> {
    pub fn new(transport: T, config: SessionConfig) -> Result<Self, SyncError> {
        config.validate()?;

        let peers: BTreeMap<FactionId, Endpoint> = config
            .peers
            .iter()
            .map(|peer| (peer.faction, peer.endpoint))
            .collect();
        let factions_by_endpoint = peers.iter().map(|(&f, &e)| (e, f)).collect();
        let mut active: BTreeSet<FactionId> = peers.keys().copied().collect();
        active.insert(config.local_faction);

        log::info!(
            "Session started as faction {} with {} remote peer(s)",
            config.local_faction,
            peers.len()
        );

        let pacer = FramePacer::new(&config);
        Ok(Self {
            transport,
            local_faction: config.local_faction,
            peers,
            factions_by_endpoint,
            active,
            removed: BTreeSet::new(),
            frames: BTreeMap::new(),
            outgoing: Vec::new(),
            open_frame: 0,
            next_flush: 0,
            step: 0,
            ticks: 0,
            steps_in_frame: 0,
            frame_length: pacer.target(),
            pacer,
            paused_on: None,
            events: VecDeque::new(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn local_faction(&self) -> FactionId {
        self.local_faction
    }

    pub fn active_factions(&self) -> impl Iterator<Item = FactionId> + '_ {
        self.active.iter().copied()
    }

    pub fn remote_peers(&self) -> impl Iterator<Item = (FactionId, Endpoint)> + '_ {
        self.peers.iter().map(|(&f, &e)| (f, e))
    }

    /// Local steps run so far. Does not move while paused.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// The frame local commands are currently collected for.
    pub fn open_frame(&self) -> FrameNumber {
        self.open_frame
    }

    pub fn next_flush_frame(&self) -> FrameNumber {
        self.next_flush
    }

    /// Length of the current command frame in steps.
    pub fn target_steps_per_frame(&self) -> u32 {
        self.frame_length
    }

    pub fn is_paused(&self) -> bool {
        self.paused_on.is_some()
    }

    pub fn frame_state(&self, frame: FrameNumber) -> Option<FrameState> {
        if frame < self.next_flush {
            return Some(FrameState::Flushed);
        }
        match self.frames.get(&frame) {
            Some(record) => Some(record.state(&self.active)),
            None if frame <= self.open_frame => Some(FrameState::Open),
            None => None,
        }
    }

    pub fn submit_local_command(&mut self, payload: impl Into<Vec<u8>>) {
        self.outgoing.push(payload.into());
    }

    /// Called once per local simulation step, before the step runs.
    pub fn advance(&mut self) -> Result<StepOutcome, SyncError> {
        self.ticks += 1;
        self.receive()?;
        self.send_done_reports()?;

        if self.steps_in_frame == 0 && self.release_due() {
            let frame = self.next_flush;
            let complete = self
                .frames
                .get(&frame)
                .is_some_and(|record| record.state(&self.active) == FrameState::AllPeersDone);
            if !complete {
                if self.paused_on.is_none() {
                    log::info!(
                        "Pausing at step {}: frame {} is not complete",
                        self.step,
                        frame
                    );
                    self.paused_on = Some(frame);
                    self.events.push_back(SyncEvent::Paused { frame });
                }
                return Ok(StepOutcome::Paused { frame });
            }
            self.flush_next();
            self.frame_length = self.pacer.target();
        }

        if let Some(frame) = self.paused_on.take() {
            log::info!("Resuming at step {} after frame {}", self.step, frame);
            self.events.push_back(SyncEvent::Resumed { frame });
        }

        self.step += 1;
        self.steps_in_frame += 1;

        let mut closed_frame = None;
        if self.steps_in_frame >= self.frame_length {
            closed_frame = Some(self.close_open_frame()?);
            self.steps_in_frame = 0;
        }
        self.send_done_reports()?;

        Ok(StepOutcome::Advanced {
            step: self.step,
            closed_frame,
        })
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SyncEvent> + '_ {
        self.events.drain(..)
    }

    /// Removes a faction that the game itself has eliminated. Every instance
    /// must call this for the same faction at the same frame.
    pub fn faction_defeated(&mut self, faction: FactionId) -> Result<(), SyncError> {
        if faction == self.local_faction {
            return Err(SyncError::LocalFaction);
        }
        if self.removed.contains(&faction) {
            return Ok(());
        }
        if !self.active.contains(&faction) {
            return Err(SyncError::UnknownFaction(faction));
        }

        log::info!("Faction {} defeated", faction);
        self.remove_faction(faction);
        self.events.push_back(SyncEvent::FactionDefeated { faction });
        self.send_done_reports()
    }

    /// Returns `false` if `endpoint` is not an active peer.
    pub fn remove_peer(&mut self, endpoint: Endpoint) -> Result<bool, SyncError> {
        if !self.lose_peer(endpoint) {
            return Ok(false);
        }
        self.send_done_reports()?;
        Ok(true)
    }

    fn receive(&mut self) -> Result<(), SyncError> {
        self.transport.pump()?;

        let mut failure = None;
        for event in self.transport.poll() {
            match event {
                TransportEvent::MessageReceived { from, payload } => {
                    self.handle_message(from, &payload)
                }
                TransportEvent::PeerTimedOut(endpoint) => {
                    self.lose_peer(endpoint);
                }
                TransportEvent::BroadcastReceived { from, .. } => {
                    log::trace!("Ignoring broadcast from {} during session", from);
                }
                TransportEvent::Failed { reason } => failure = Some(reason),
            }
        }

        match failure {
            Some(reason) => Err(TransportError::Failed(reason).into()),
            None => Ok(()),
        }
    }

    fn handle_message(&mut self, from: Endpoint, payload: &[u8]) {
        let Some(&faction) = self.factions_by_endpoint.get(&from) else {
            log::debug!("Ignoring frame message from non-member {}", from);
            return;
        };

        let message = match FrameMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Dropping undecodable message from {}: {}", from, e);
                return;
            }
        };

        if message.faction() != faction {
            log::debug!(
                "Faction mismatch from {}: expected {}, got {}",
                from,
                faction,
                message.faction()
            );
            return;
        }

        let frame = message.frame();
        if frame < self.next_flush {
            log::debug!("Frame {} from faction {} already flushed", frame, faction);
            return;
        }

        let record = self
            .frames
            .entry(frame)
            .or_insert_with(|| FrameRecord::new(frame));
        let accepted = match message {
            FrameMessage::Commands { commands, .. } => record.add_commands(faction, commands),
            FrameMessage::Done { steps_taken, .. } => record.add_done(faction, steps_taken),
        };
        if !accepted {
            log::debug!("Duplicate frame {} message from faction {}", frame, faction);
        }
    }

    fn close_open_frame(&mut self) -> Result<FrameNumber, SyncError> {
        let frame = self.open_frame;
        let commands = std::mem::take(&mut self.outgoing);
        let message = FrameMessage::Commands {
            frame,
            faction: self.local_faction,
            commands: commands.clone(),
        };

        let record = self
            .frames
            .entry(frame)
            .or_insert_with(|| FrameRecord::new(frame));
        record.add_commands(self.local_faction, commands);
        record.mark_sent(self.ticks);
        self.open_frame += 1;

        log::trace!("Frame {} closed at step {}", frame, self.step);
        self.send_to_peers(&message)?;
        Ok(frame)
    }

    /// Sends Done for every frame that just received its last batch.
    /// `steps_taken` counts `advance()` calls since our own batch went out,
    /// paused ones included. Repeats while a lost peer completes more frames.
    fn send_done_reports(&mut self) -> Result<(), SyncError> {
        loop {
            let ready: Vec<(FrameNumber, u64)> = self
                .frames
                .values()
                .filter(|record| {
                    !record.has_done_from(self.local_faction)
                        && record.has_all_commands(&self.active)
                })
                .filter_map(|record| record.sent_at_tick().map(|sent| (record.frame(), sent)))
                .collect();
            if ready.is_empty() {
                return Ok(());
            }

            for (frame, sent_at) in ready {
                let steps_taken = u32::try_from(self.ticks - sent_at).unwrap_or(u32::MAX);
                if let Some(record) = self.frames.get_mut(&frame) {
                    record.add_done(self.local_faction, steps_taken);
                }
                self.send_to_peers(&FrameMessage::Done {
                    frame,
                    faction: self.local_faction,
                    steps_taken,
                })?;
            }
        }
    }

    /// Whether the open frame must release a frame before its first step.
    fn release_due(&self) -> bool {
        self.next_flush + EXECUTION_DELAY <= self.open_frame
    }

    fn flush_next(&mut self) {
        let frame = self.next_flush;
        let Some(record) = self.frames.remove(&frame) else {
            return;
        };

        // Every peer holds the same Done reports here, so the new target
        // matches everywhere.
        self.pacer.record(record.max_steps_taken(&self.active));
        let commands = record.into_commands();
        log::debug!(
            "Frame {} ready at step {} with {} command(s)",
            frame,
            self.step,
            commands.len()
        );

        self.events.push_back(SyncEvent::FrameReady {
            frame,
            step: self.step,
            commands,
        });
        self.next_flush += 1;
    }

    fn send_to_peers(&mut self, message: &FrameMessage) -> Result<(), SyncError> {
        let payload = message.encode()?;

        let mut lost = Vec::new();
        for &endpoint in self.peers.values() {
            match self.transport.send(&payload, endpoint) {
                Ok(()) => {}
                // Timed out between our last poll and now.
                Err(TransportError::PeerTimedOut(endpoint)) => lost.push(endpoint),
                Err(e) => return Err(e.into()),
            }
        }

        for endpoint in lost {
            self.lose_peer(endpoint);
        }
        Ok(())
    }

    fn lose_peer(&mut self, endpoint: Endpoint) -> bool {
        let Some(&faction) = self.factions_by_endpoint.get(&endpoint) else {
            return false;
        };

        log::warn!("Lost peer {} (faction {})", endpoint, faction);
        self.remove_faction(faction);
        self.events
            .push_back(SyncEvent::PeerLost { endpoint, faction });
        true
    }

    fn remove_faction(&mut self, faction: FactionId) {
        self.active.remove(&faction);
        self.removed.insert(faction);
        if let Some(endpoint) = self.peers.remove(&faction) {
            self.factions_by_endpoint.remove(&endpoint);
            self.transport.release_peer(endpoint);
        }
        for record in self.frames.values_mut() {
            record.remove_faction(faction);
        }
    }
}
