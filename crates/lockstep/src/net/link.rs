use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::endpoint::Endpoint;
use super::error::TransportError;
use super::stats::LinkStats;
use super::tracking::{ReceiveTracker, RttWindow};

#[derive(Debug, Clone)]
pub struct PendingSend {
    pub sequence: u32,
    pub payload: Vec<u8>,
    pub created: Instant,
    pub last_sent: Option<Instant>,
    pub attempts: u32,
}

impl PendingSend {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    pub fn is_due(&self, now: Instant, resend_delay: Duration) -> bool {
        match self.last_sent {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) > resend_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub sequence: u32,
    pub payload: Vec<u8>,
    pub is_resend: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub sequence: u32,
    pub payload: Vec<u8>,
}

/// Reliability state for one remote endpoint.
///
/// Messages become deliverable the moment they arrive; there is no
/// reordering by sequence number.
#[derive(Debug)]
pub struct PeerLink {
    endpoint: Endpoint,
    next_sequence: u32,
    pending: BTreeMap<u32, PendingSend>,
    receive_tracker: ReceiveTracker,
    delivered: VecDeque<DeliveredMessage>,
    broadcasts: VecDeque<Vec<u8>>,
    rtt: RttWindow,
    timed_out: bool,
}

impl PeerLink {
    pub fn new(endpoint: Endpoint, rtt_capacity: usize) -> Self {
        Self {
            endpoint,
            next_sequence: 0,
            pending: BTreeMap::new(),
            receive_tracker: ReceiveTracker::new(),
            delivered: VecDeque::new(),
            broadcasts: VecDeque::new(),
            rtt: RttWindow::new(rtt_capacity),
            timed_out: false,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn create_pending_send(
        &mut self,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<u32, TransportError> {
        if self.timed_out {
            return Err(TransportError::PeerTimedOut(self.endpoint));
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.pending.insert(
            sequence,
            PendingSend {
                sequence,
                payload,
                created: now,
                last_sent: None,
                attempts: 0,
            },
        );

        Ok(sequence)
    }

    /// Returns `false` for acknowledgements of sequences that are no longer
    /// pending, which happens whenever an acknowledgement is duplicated.
    pub fn acknowledge_send(&mut self, sequence: u32, now: Instant) -> bool {
        match self.pending.remove(&sequence) {
            Some(send) => {
                self.rtt.record(send.age(now));
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the message is new. The caller acknowledges either
    /// way since our previous acknowledgement may have been lost.
    pub fn on_message_received(&mut self, sequence: u32, payload: Vec<u8>) -> bool {
        if self.timed_out || !self.receive_tracker.record_received(sequence) {
            return false;
        }

        self.delivered
            .push_back(DeliveredMessage { sequence, payload });
        true
    }

    pub fn on_broadcast_received(&mut self, payload: Vec<u8>) {
        if !self.timed_out {
            self.broadcasts.push_back(payload);
        }
    }

    pub fn average_ping(&self) -> Duration {
        self.rtt.average()
    }

    pub fn average_ping_deviation(&self) -> Duration {
        self.rtt.deviation()
    }

    pub fn resend_delay(&self, min_delay: Duration) -> Duration {
        (self.average_ping() + self.average_ping_deviation()).max(min_delay)
    }

    /// Collects every pending send that has never gone out or whose last
    /// attempt is older than the resend delay, and stamps it as sent.
    pub fn due_sends(&mut self, now: Instant, min_delay: Duration) -> Vec<OutgoingMessage> {
        if self.timed_out {
            return Vec::new();
        }

        let resend_delay = self.resend_delay(min_delay);
        self.pending
            .values_mut()
            .filter(|send| send.is_due(now, resend_delay))
            .map(|send| {
                send.last_sent = Some(now);
                send.attempts += 1;
                OutgoingMessage {
                    sequence: send.sequence,
                    payload: send.payload.clone(),
                    is_resend: send.attempts > 1,
                }
            })
            .collect()
    }

    /// Times the link out if any pending send has outlived `timeout`.
    /// Returns `true` only on the transition.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> bool {
        if self.timed_out {
            return false;
        }
        if self.pending.values().any(|send| send.age(now) > timeout) {
            return self.mark_timed_out();
        }
        false
    }

    pub fn mark_timed_out(&mut self) -> bool {
        if self.timed_out {
            return false;
        }

        self.timed_out = true;
        self.pending.clear();
        self.delivered.clear();
        self.broadcasts.clear();
        self.receive_tracker.clear();
        self.rtt.clear();
        true
    }

    pub fn take_messages(&mut self) -> impl Iterator<Item = DeliveredMessage> + '_ {
        self.delivered.drain(..)
    }

    pub fn take_broadcasts(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.broadcasts.drain(..)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            average_ping: self.average_ping(),
            ping_deviation: self.average_ping_deviation(),
            rtt_samples: self.rtt.len(),
            pending_sends: self.pending.len(),
            timed_out: self.timed_out,
        }
    }
}
