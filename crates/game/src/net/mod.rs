mod connection;
mod dispatch;
mod endpoint;
mod protocol;
mod stats;

pub use connection::{ClientConnection, ConnectionError, ConnectionManager, ConnectionState};
pub use dispatch::{DispatchError, DispatchReport, Dispatcher, Notices, Outbox};
pub use endpoint::NetworkEndpoint;
pub use protocol::{
    ArchivedPacket, EntityUpdate, Packet, PacketError, PacketHeader, PacketType,
    QuantizationInfo, SpawnMessage, TickMessage, DEFAULT_PORT, DEFAULT_TICK_RATE,
    MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
pub use stats::{rand_u64, NetworkStats, PacketLossSimulation};
