use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::endpoint::Endpoint;
use super::protocol::MAX_DATAGRAM_SIZE;
use super::simulator::{NetworkSimulator, PacketLossSimulation, Verdict};

/// Address used only to ask the OS which interface it would route through;
/// connecting a UDP socket sends nothing.
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

pub enum SendOutcome {
    Sent(usize),
    Dropped,
    Delayed,
}

pub enum RecvOutcome {
    Datagram(usize, Endpoint),
    Idle,
}

/// UDP socket plus the per-instance knowledge the transport needs about it:
/// which addresses count as "us" and how outgoing traffic is degraded.
pub struct DatagramSocket {
    socket: UdpSocket,
    local: Endpoint,
    local_addresses: BTreeSet<Ipv4Addr>,
    simulator: Mutex<NetworkSimulator>,
}

impl DatagramSocket {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        packet_loss: Option<PacketLossSimulation>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_broadcast(true)?;

        let local = Endpoint::try_from(socket.local_addr()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let local_addresses = discover_local_addresses(local.addr);

        log::debug!(
            "Bound {} (local addresses: {:?})",
            local,
            local_addresses
        );

        Ok(Self {
            socket,
            local,
            local_addresses,
            simulator: Mutex::new(NetworkSimulator::new(packet_loss.unwrap_or_default())),
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    pub fn local_addresses(&self) -> &BTreeSet<Ipv4Addr> {
        &self.local_addresses
    }

    /// True if `from` is this socket talking to itself, e.g. a broadcast
    /// echoed back to the sender.
    pub fn is_own_endpoint(&self, from: Endpoint) -> bool {
        from.port == self.local.port && self.local_addresses.contains(&from.addr)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_nonblocking(false)?;
        self.socket.set_read_timeout(timeout)
    }

    pub fn set_nonblocking(&self) -> io::Result<()> {
        self.socket.set_nonblocking(true)
    }

    pub fn set_packet_loss(&self, config: PacketLossSimulation) {
        self.simulator.lock().set_config(config);
    }

    pub fn send_to(&self, data: Vec<u8>, to: Endpoint) -> io::Result<SendOutcome> {
        let verdict = {
            let mut simulator = self.simulator.lock();
            if simulator.is_active() {
                simulator.submit(data, to, Instant::now())
            } else {
                Verdict::Send(data)
            }
        };

        match verdict {
            Verdict::Send(data) => self.send_now(&data, to).map(SendOutcome::Sent),
            Verdict::Dropped => Ok(SendOutcome::Dropped),
            Verdict::Delayed => Ok(SendOutcome::Delayed),
        }
    }

    /// Puts simulated-latency datagrams whose release time has passed on the
    /// wire. Returns the bytes written.
    pub fn release_delayed(&self, now: Instant) -> io::Result<usize> {
        let due = self.simulator.lock().take_due(now);
        let mut written = 0;
        for (data, to) in due {
            written += self.send_now(&data, to)?;
        }
        Ok(written)
    }

    pub fn recv_from(&self, buffer: &mut [u8]) -> io::Result<RecvOutcome> {
        match self.socket.recv_from(buffer) {
            Ok((size, addr)) => match Endpoint::try_from(addr) {
                Ok(from) => Ok(RecvOutcome::Datagram(size, from)),
                Err(_) => Ok(RecvOutcome::Idle),
            },
            Err(e) if is_idle(&e) => Ok(RecvOutcome::Idle),
            Err(e) => Err(e),
        }
    }

    pub fn clear_delayed(&self) {
        self.simulator.lock().clear();
    }

    fn send_now(&self, data: &[u8], to: Endpoint) -> io::Result<usize> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds maximum UDP size",
            ));
        }
        match self.socket.send_to(data, to.socket_addr()) {
            Ok(bytes) => Ok(bytes),
            // An unreachable peer is handled by the per-message timeout.
            Err(e) if is_transient_send_error(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Errors that only mean "nothing to read right now". Connection refused and
/// reset show up on some platforms after an ICMP port-unreachable and say
/// nothing about the health of our own socket.
fn is_idle(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

fn is_transient_send_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

fn discover_local_addresses(bound: Ipv4Addr) -> BTreeSet<Ipv4Addr> {
    let mut addresses = BTreeSet::from([Ipv4Addr::LOCALHOST]);
    if !bound.is_unspecified() {
        addresses.insert(bound);
    }
    if let Some(routed) = routed_address() {
        addresses.insert(routed);
    }
    addresses
}

fn routed_address() -> Option<Ipv4Addr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    probe.connect(ROUTE_PROBE).ok()?;
    match probe.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_addresses_include_loopback() {
        let socket = DatagramSocket::bind("127.0.0.1:0", None).unwrap();
        let local = socket.local_endpoint();

        assert!(socket.local_addresses().contains(&Ipv4Addr::LOCALHOST));
        assert!(socket.is_own_endpoint(local));
        assert!(!socket.is_own_endpoint(Endpoint::localhost(local.port.wrapping_add(1))));
    }

    #[test]
    fn test_send_and_receive() {
        let a = DatagramSocket::bind("127.0.0.1:0", None).unwrap();
        let b = DatagramSocket::bind("127.0.0.1:0", None).unwrap();
        b.set_read_timeout(Some(Duration::from_millis(500))).unwrap();

        a.send_to(vec![1, 2, 3], b.local_endpoint()).unwrap();

        let mut buffer = [0u8; 64];
        match b.recv_from(&mut buffer).unwrap() {
            RecvOutcome::Datagram(size, from) => {
                assert_eq!(&buffer[..size], &[1, 2, 3]);
                assert_eq!(from, a.local_endpoint());
            }
            RecvOutcome::Idle => panic!("Expected a datagram"),
        }
    }
}
