use std::collections::{BTreeMap, BTreeSet};

use super::{FactionId, FrameNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameState {
    Open,
    AllCommandsReceived,
    AllPeersDone,
    Flushed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCommand {
    pub faction: FactionId,
    pub payload: Vec<u8>,
}

/// Everything known about one command frame that has not been flushed yet.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    frame: FrameNumber,
    commands: BTreeMap<FactionId, Vec<Vec<u8>>>,
    done: BTreeMap<FactionId, u32>,
    sent_at_tick: Option<u64>,
}

impl FrameRecord {
    pub fn new(frame: FrameNumber) -> Self {
        Self {
            frame,
            commands: BTreeMap::new(),
            done: BTreeMap::new(),
            sent_at_tick: None,
        }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Tick at which our own batch for this frame went out.
    pub fn sent_at_tick(&self) -> Option<u64> {
        self.sent_at_tick
    }

    pub fn mark_sent(&mut self, tick: u64) {
        self.sent_at_tick = Some(tick);
    }

    /// Returns `false` if the faction already contributed; the first batch
    /// wins.
    pub fn add_commands(&mut self, faction: FactionId, commands: Vec<Vec<u8>>) -> bool {
        if self.commands.contains_key(&faction) {
            return false;
        }
        self.commands.insert(faction, commands);
        true
    }

    pub fn add_done(&mut self, faction: FactionId, steps_taken: u32) -> bool {
        if self.done.contains_key(&faction) {
            return false;
        }
        self.done.insert(faction, steps_taken);
        true
    }

    pub fn has_commands_from(&self, faction: FactionId) -> bool {
        self.commands.contains_key(&faction)
    }

    pub fn has_done_from(&self, faction: FactionId) -> bool {
        self.done.contains_key(&faction)
    }

    pub fn has_all_commands(&self, active: &BTreeSet<FactionId>) -> bool {
        active.iter().all(|f| self.commands.contains_key(f))
    }

    pub fn has_all_done(&self, active: &BTreeSet<FactionId>) -> bool {
        active.iter().all(|f| self.done.contains_key(f))
    }

    pub fn state(&self, active: &BTreeSet<FactionId>) -> FrameState {
        if !self.has_all_commands(active) {
            FrameState::Open
        } else if !self.has_all_done(active) {
            FrameState::AllCommandsReceived
        } else {
            FrameState::AllPeersDone
        }
    }

    /// Largest `steps_taken` among the active factions' Done reports.
    pub fn max_steps_taken(&self, active: &BTreeSet<FactionId>) -> u32 {
        active
            .iter()
            .filter_map(|f| self.done.get(f))
            .copied()
            .max()
            .unwrap_or(0)
    }

    pub fn remove_faction(&mut self, faction: FactionId) {
        self.commands.remove(&faction);
        self.done.remove(&faction);
    }

    /// Commands ordered by faction id, submission order kept within a
    /// faction.
    pub fn into_commands(self) -> Vec<FrameCommand> {
        self.commands
            .into_iter()
            .flat_map(|(faction, payloads)| {
                payloads
                    .into_iter()
                    .map(move |payload| FrameCommand { faction, payload })
            })
            .collect()
    }
}
