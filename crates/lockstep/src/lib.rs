pub mod net;
pub mod simulation;
pub mod sync;

pub use net::{
    Endpoint, LinkStats, NetworkStats, Packet, PacketError, PacketLossSimulation,
    ReliableTransport, TransportConfig, TransportError, TransportEvent,
};
pub use simulation::FixedTimestep;
pub use sync::{
    CommandSynchronizer, FactionId, FrameMessage, FrameTransport, SessionConfig, StepOutcome,
    SyncError, SyncEvent,
};
