use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use super::config::TransportConfig;
use super::endpoint::Endpoint;
use super::error::TransportError;
use super::link::PeerLink;
use super::protocol::{self, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE, Packet, PacketError};
use super::simulator::PacketLossSimulation;
use super::socket::{DatagramSocket, RecvOutcome, SendOutcome};
use super::stats::{LinkStats, NetworkStats};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    MessageReceived { from: Endpoint, payload: Vec<u8> },
    BroadcastReceived { from: Endpoint, payload: Vec<u8> },
    PeerTimedOut(Endpoint),
    /// The socket hit an unrecoverable error. Reported once; the transport
    /// stops doing I/O afterwards.
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Cooperative,
    Threaded,
}

struct Shared {
    socket: DatagramSocket,
    config: TransportConfig,
    links: Mutex<BTreeMap<Endpoint, PeerLink>>,
    events: Mutex<VecDeque<TransportEvent>>,
    stats: Mutex<NetworkStats>,
    failure: Mutex<Option<String>>,
    recv_buffer: Mutex<Box<[u8]>>,
    running: AtomicBool,
}

/// Reliable, unordered message delivery over a single UDP socket.
///
/// Nothing becomes visible to the caller until [`ReliableTransport::poll`]
/// is called, whichever mode drives the socket.
pub struct ReliableTransport {
    shared: Option<Arc<Shared>>,
    workers: Vec<JoinHandle<()>>,
    local: Endpoint,
    mode: TransportMode,
}

impl ReliableTransport {
    /// Binds a transport driven by explicit [`ReliableTransport::tick`] calls.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let shared = Shared::bind(addr, config)?;
        shared.socket.set_nonblocking()?;

        let local = shared.socket.local_endpoint();
        log::info!("Transport bound on {} (cooperative)", local);

        Ok(Self {
            shared: Some(Arc::new(shared)),
            workers: Vec::new(),
            local,
            mode: TransportMode::Cooperative,
        })
    }

    /// Binds a transport with its own inbound and outbound threads.
    pub fn spawn<A: ToSocketAddrs>(
        addr: A,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let shared = Shared::bind(addr, config)?;
        shared
            .socket
            .set_read_timeout(Some(shared.config.read_timeout))?;

        let local = shared.socket.local_endpoint();
        let shared = Arc::new(shared);

        let inbound = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("lockstep-inbound-{}", local.port))
                .spawn(move || shared.inbound_loop())?
        };
        let outbound = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("lockstep-outbound-{}", local.port))
                .spawn(move || shared.outbound_loop())
        };
        let outbound = match outbound {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop_worker(inbound);
                return Err(e.into());
            }
        };

        log::info!("Transport bound on {} (threaded)", local);

        Ok(Self {
            shared: Some(shared),
            workers: vec![inbound, outbound],
            local,
            mode: TransportMode::Threaded,
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_none()
    }

    /// Queues `payload` for reliable delivery and returns its sequence
    /// number. The datagram goes out on the next outbound pass.
    pub fn send(&self, payload: &[u8], to: Endpoint) -> Result<u32, TransportError> {
        let shared = self.live()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLarge(payload.len()).into());
        }

        let mut links = shared.links.lock();
        let link = links
            .entry(to)
            .or_insert_with(|| PeerLink::new(to, shared.config.rtt_capacity));
        link.create_pending_send(payload.to_vec(), Instant::now())
    }

    /// Sends one unreliable datagram to the configured broadcast address.
    pub fn broadcast(&self, payload: &[u8], port: u16) -> Result<(), TransportError> {
        let shared = self.live()?;
        let data = protocol::encode_broadcast(payload);
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(PacketError::PayloadTooLarge(payload.len()).into());
        }

        let to = Endpoint::new(shared.config.broadcast_address, port);
        shared.transmit(data, to)?;
        shared.stats.lock().broadcasts_sent += 1;
        Ok(())
    }

    pub fn ping(&self, to: Endpoint) -> Result<(), TransportError> {
        let shared = self.live()?;
        shared.transmit(protocol::encode_ping(), to)?;
        Ok(())
    }

    /// Drains everything that happened since the last call: delivered
    /// messages and broadcasts in arrival order per peer, then lifecycle
    /// events.
    pub fn poll(&self) -> Vec<TransportEvent> {
        let Some(shared) = self.shared.as_ref() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        {
            let mut links = shared.links.lock();
            for link in links.values_mut() {
                let from = link.endpoint();
                events.extend(
                    link.take_messages()
                        .map(|m| TransportEvent::MessageReceived {
                            from,
                            payload: m.payload,
                        }),
                );
                events.extend(
                    link.take_broadcasts()
                        .map(|payload| TransportEvent::BroadcastReceived { from, payload }),
                );
            }
        }
        events.extend(shared.events.lock().drain(..));
        events
    }

    /// One inbound drain and one outbound pass. Only valid for transports
    /// created with [`ReliableTransport::bind`].
    pub fn tick(&self) -> Result<(), TransportError> {
        let shared = self.live()?;
        if self.mode == TransportMode::Threaded {
            return Err(TransportError::InvalidOperation(
                "tick() drives cooperative transports only".to_string(),
            ));
        }

        if let Err(e) = shared.drain_socket() {
            shared.fail(&e);
            return Err(TransportError::Failed(e.to_string()));
        }
        if let Err(e) = shared.outbound_pass(Instant::now()) {
            shared.fail(&e);
            return Err(TransportError::Failed(e.to_string()));
        }
        Ok(())
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared
            .as_ref()
            .map(|shared| shared.stats.lock().clone())
            .unwrap_or_default()
    }

    pub fn link_stats(&self, endpoint: Endpoint) -> Option<LinkStats> {
        let shared = self.shared.as_ref()?;
        shared.links.lock().get(&endpoint).map(PeerLink::stats)
    }

    pub fn peers(&self) -> Vec<Endpoint> {
        self.shared
            .as_ref()
            .map(|shared| shared.links.lock().keys().copied().collect())
            .unwrap_or_default()
    }

    /// Discards all reliability state for `endpoint`. Pending sends to it are
    /// abandoned without a timeout event.
    pub fn forget_peer(&self, endpoint: Endpoint) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|shared| shared.links.lock().remove(&endpoint).is_some())
    }

    pub fn set_packet_loss(&self, config: PacketLossSimulation) -> Result<(), TransportError> {
        self.live()?.socket.set_packet_loss(config);
        Ok(())
    }

    /// Stops both loops, waits for them, then releases the socket. Every
    /// later operation fails with [`TransportError::Disposed`].
    pub fn shutdown(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        for worker in self.workers.drain(..) {
            shared.stop_worker(worker);
        }
        shared.socket.clear_delayed();
        shared.links.lock().clear();
        log::info!("Transport on {} shut down", self.local);
    }

    fn live(&self) -> Result<&Shared, TransportError> {
        let shared = self.shared.as_deref().ok_or(TransportError::Disposed)?;
        if let Some(reason) = shared.failure.lock().as_ref() {
            return Err(TransportError::Failed(reason.clone()));
        }
        Ok(shared)
    }
}

impl Drop for ReliableTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn bind<A: ToSocketAddrs>(addr: A, config: TransportConfig) -> io::Result<Self> {
        let socket = DatagramSocket::bind(addr, config.packet_loss.clone())?;
        Ok(Self {
            socket,
            config,
            links: Mutex::new(BTreeMap::new()),
            events: Mutex::new(VecDeque::new()),
            stats: Mutex::new(NetworkStats::default()),
            failure: Mutex::new(None),
            recv_buffer: Mutex::new(vec![0u8; MAX_DATAGRAM_SIZE].into_boxed_slice()),
            running: AtomicBool::new(true),
        })
    }

    /// Clears the running flag and waits for `worker` to exit.
    fn stop_worker(&self, worker: JoinHandle<()>) {
        self.running.store(false, Ordering::SeqCst);
        if worker.join().is_err() {
            log::error!(
                "Transport worker on {} panicked",
                self.socket.local_endpoint()
            );
        }
    }

    fn inbound_loop(&self) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buffer) {
                Ok(RecvOutcome::Datagram(size, from)) => {
                    self.handle_datagram(&buffer[..size], from)
                }
                Ok(RecvOutcome::Idle) => {}
                Err(e) => {
                    self.fail(&e);
                    break;
                }
            }
        }
        log::trace!("Inbound loop on {} stopped", self.socket.local_endpoint());
    }

    fn outbound_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.outbound_pass(Instant::now()) {
                self.fail(&e);
                break;
            }
            thread::sleep(self.config.resend_interval);
        }
        log::trace!("Outbound loop on {} stopped", self.socket.local_endpoint());
    }

    fn drain_socket(&self) -> io::Result<()> {
        let mut buffer = self.recv_buffer.lock();
        loop {
            match self.socket.recv_from(&mut buffer)? {
                RecvOutcome::Datagram(size, from) => self.handle_datagram(&buffer[..size], from),
                RecvOutcome::Idle => return Ok(()),
            }
        }
    }

    fn handle_datagram(&self, data: &[u8], from: Endpoint) {
        {
            let mut stats = self.stats.lock();
            stats.packets_received += 1;
            stats.bytes_received += data.len() as u64;
        }

        let packet = match protocol::decode(data) {
            Ok(packet) => packet,
            Err(PacketError::Foreign) => {
                log::trace!("Ignoring foreign datagram from {}", from);
                self.stats.lock().foreign_packets += 1;
                return;
            }
            Err(e) => {
                log::debug!("Dropping malformed packet from {}: {}", from, e);
                self.stats.lock().malformed_packets += 1;
                return;
            }
        };

        match packet {
            Packet::Message { sequence, payload } => self.on_message(from, sequence, payload),
            Packet::Acknowledgement { sequence } => self.on_ack(from, sequence),
            Packet::Broadcast { payload } => self.on_broadcast(from, payload),
            Packet::Ping => log::trace!("Ping from {}", from),
        }
    }

    fn on_message(&self, from: Endpoint, sequence: u32, payload: Vec<u8>) {
        let accepted = {
            let mut links = self.links.lock();
            let link = self.link_entry(&mut links, from);
            if link.is_timed_out() {
                return;
            }
            link.on_message_received(sequence, payload)
        };

        {
            let mut stats = self.stats.lock();
            if accepted {
                stats.messages_delivered += 1;
            } else {
                stats.duplicates_received += 1;
            }
        }

        if let Err(e) = self.transmit(protocol::encode_ack(sequence), from) {
            self.fail(&e);
            return;
        }
        self.stats.lock().acks_sent += 1;
    }

    fn on_ack(&self, from: Endpoint, sequence: u32) {
        let acknowledged = {
            let mut links = self.links.lock();
            self.link_entry(&mut links, from)
                .acknowledge_send(sequence, Instant::now())
        };
        if !acknowledged {
            log::trace!("Ignoring stale acknowledgement {} from {}", sequence, from);
        }
        self.stats.lock().acks_received += 1;
    }

    fn on_broadcast(&self, from: Endpoint, payload: Vec<u8>) {
        if self.socket.is_own_endpoint(from) {
            log::trace!("Ignoring our own broadcast echo");
            return;
        }

        {
            let mut links = self.links.lock();
            self.link_entry(&mut links, from)
                .on_broadcast_received(payload);
        }
        self.stats.lock().broadcasts_received += 1;
    }

    fn outbound_pass(&self, now: Instant) -> io::Result<()> {
        let mut outgoing = Vec::new();
        let mut timed_out = Vec::new();
        {
            let mut links = self.links.lock();
            for link in links.values_mut() {
                if link.is_timed_out() {
                    continue;
                }
                if link.expire(now, self.config.send_timeout) {
                    timed_out.push(link.endpoint());
                    continue;
                }
                let to = link.endpoint();
                outgoing.extend(
                    link.due_sends(now, self.config.min_resend_delay)
                        .into_iter()
                        .map(|message| (to, message)),
                );
            }
        }

        for endpoint in timed_out {
            log::warn!("Peer {} timed out", endpoint);
            self.stats.lock().peers_timed_out += 1;
            self.events
                .lock()
                .push_back(TransportEvent::PeerTimedOut(endpoint));
        }

        for (to, message) in outgoing {
            let data = protocol::encode_message(&message.payload, message.sequence)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.transmit(data, to)?;

            let mut stats = self.stats.lock();
            if message.is_resend {
                log::trace!("Resending {} to {}", message.sequence, to);
                stats.messages_resent += 1;
            } else {
                stats.messages_sent += 1;
            }
        }

        let released = self.socket.release_delayed(now)?;
        if released > 0 {
            self.stats.lock().bytes_sent += released as u64;
        }
        Ok(())
    }

    fn transmit(&self, data: Vec<u8>, to: Endpoint) -> io::Result<()> {
        let outcome = self.socket.send_to(data, to)?;
        let mut stats = self.stats.lock();
        match outcome {
            SendOutcome::Sent(bytes) => {
                stats.packets_sent += 1;
                stats.bytes_sent += bytes as u64;
            }
            SendOutcome::Delayed => stats.packets_sent += 1,
            SendOutcome::Dropped => stats.packets_dropped += 1,
        }
        Ok(())
    }

    fn link_entry<'a>(
        &self,
        links: &'a mut BTreeMap<Endpoint, PeerLink>,
        endpoint: Endpoint,
    ) -> &'a mut PeerLink {
        links
            .entry(endpoint)
            .or_insert_with(|| PeerLink::new(endpoint, self.config.rtt_capacity))
    }

    fn fail(&self, error: &io::Error) {
        let mut failure = self.failure.lock();
        if failure.is_some() {
            return;
        }

        let reason = error.to_string();
        log::error!(
            "Transport on {} failed: {}",
            self.socket.local_endpoint(),
            reason
        );
        *failure = Some(reason.clone());
        self.running.store(false, Ordering::SeqCst);
        self.events
            .lock()
            .push_back(TransportEvent::Failed { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cooperative() -> ReliableTransport {
        ReliableTransport::bind("127.0.0.1:0", TransportConfig::default()).unwrap()
    }

    fn pump(transports: &[&ReliableTransport], rounds: usize) {
        for _ in 0..rounds {
            for transport in transports {
                transport.tick().unwrap();
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_cooperative_send_and_poll() {
        let a = cooperative();
        let b = cooperative();

        a.send(b"hello", b.local_endpoint()).unwrap();
        assert!(b.poll().is_empty());

        pump(&[&a, &b], 20);

        let events = b.poll();
        assert_eq!(
            events,
            vec![TransportEvent::MessageReceived {
                from: a.local_endpoint(),
                payload: b"hello".to_vec()
            }]
        );
        assert!(b.poll().is_empty());

        let link = a.link_stats(b.local_endpoint()).unwrap();
        assert_eq!(link.pending_sends, 0);
        assert_eq!(link.rtt_samples, 1);
    }

    #[test]
    fn test_foreign_and_malformed_traffic_is_ignored() {
        let b = cooperative();
        let raw = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = b.local_endpoint().socket_addr();

        raw.send_to(b"GET / HTTP/1.1\r\n", target).unwrap();
        raw.send_to(&[protocol::PROTOCOL_MAGIC, 42], target).unwrap();
        raw.send_to(&[protocol::PROTOCOL_MAGIC, 0, 1], target).unwrap();

        thread::sleep(Duration::from_millis(20));
        b.tick().unwrap();

        assert!(b.poll().is_empty());
        let stats = b.stats();
        assert_eq!(stats.foreign_packets, 1);
        assert_eq!(stats.malformed_packets, 2);
    }

    #[test]
    fn test_tick_rejected_for_threaded_transport() {
        let transport =
            ReliableTransport::spawn("127.0.0.1:0", TransportConfig::default()).unwrap();
        assert!(matches!(
            transport.tick(),
            Err(TransportError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_operations_after_shutdown() {
        let mut transport = cooperative();
        let peer = Endpoint::localhost(1);
        transport.shutdown();
        transport.shutdown();

        assert!(transport.is_disposed());
        assert!(matches!(
            transport.send(b"x", peer),
            Err(TransportError::Disposed)
        ));
        assert!(matches!(
            transport.broadcast(b"x", 1),
            Err(TransportError::Disposed)
        ));
        assert!(matches!(transport.ping(peer), Err(TransportError::Disposed)));
        assert!(matches!(transport.tick(), Err(TransportError::Disposed)));
        assert!(transport.poll().is_empty());
    }

    #[test]
    fn test_stop_worker_releases_inbound_thread() {
        let shared = Shared::bind("127.0.0.1:0", TransportConfig::default()).unwrap();
        shared
            .socket
            .set_read_timeout(Some(shared.config.read_timeout))
            .unwrap();
        let addr = shared.socket.local_endpoint().socket_addr();
        let shared = Arc::new(shared);

        // What spawn does when the outbound thread cannot be started.
        let inbound = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.inbound_loop())
        };
        shared.stop_worker(inbound);

        assert!(!shared.running.load(Ordering::SeqCst));
        assert_eq!(Arc::strong_count(&shared), 1);
        drop(shared);
        std::net::UdpSocket::bind(addr).unwrap();
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let transport = cooperative();
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            transport.send(&payload, Endpoint::localhost(1)),
            Err(TransportError::Packet(PacketError::PayloadTooLarge(_)))
        ));
    }
}
