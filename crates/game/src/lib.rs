pub mod net;
pub mod replication;
pub mod simulation;
pub mod world;

pub use net::{
    ConnectionManager, ConnectionState, DispatchError, Dispatcher, EntityUpdate, NetworkEndpoint,
    NetworkStats, Outbox, Packet, PacketError, PacketHeader, PacketLossSimulation, PacketType,
    SpawnMessage, TickMessage, DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_PACKET_SIZE,
};
pub use replication::{
    QuantizedState, Quantizer, ReceiverContext, ReceiverId, ReplicationConfig, ReplicationState,
    TickReport,
};
pub use simulation::FixedTimestep;
pub use world::{
    DiscreteState, Entity, EntityFlags, EntityId, EntityKind, RawState, World, WorldEvent,
};
