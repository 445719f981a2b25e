use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::Vec3;

use flock::net::{rand_u64, DispatchError};
use flock::{
    ConnectionManager, ConnectionState, EntityId, FixedTimestep, NetworkEndpoint, NetworkStats,
    Outbox, Packet, PacketHeader, PacketType, ReceiverContext, ReceiverId, ReplicationState,
    TickMessage, TickReport, World, WorldEvent, MAX_PACKET_SIZE,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::simulation::{patrol, Herd};

/// Sends tick messages to connected clients over the server socket.
struct EndpointOutbox<'a> {
    endpoint: &'a mut NetworkEndpoint,
    connections: &'a mut ConnectionManager,
}

impl Outbox for EndpointOutbox<'_> {
    fn send(&mut self, receiver: ReceiverId, message: &TickMessage) -> Result<usize, DispatchError> {
        let Some(client) = self.connections.get_mut(receiver.0) else {
            return Err(DispatchError::StaleReceiver(receiver));
        };
        if client.state != ConnectionState::Connected {
            return Err(DispatchError::StaleReceiver(receiver));
        }

        let header = PacketHeader::new(client.next_sequence());
        let packet = Packet::new(header, PacketType::Replicate(message.clone()));
        let data = packet.serialize()?;
        if data.len() > MAX_PACKET_SIZE {
            return Err(DispatchError::Oversized {
                receiver,
                size: data.len(),
                limit: MAX_PACKET_SIZE,
            });
        }
        Ok(self.endpoint.send_bytes_to(&data, client.addr)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub ticks: u32,
    pub messages: usize,
    pub bytes: usize,
    pub updates: usize,
    pub shed: usize,
    pub dropped: usize,
    pub held_back: usize,
    pub failed_jobs: usize,
    pub full_syncs: usize,
    pub slowest_tick: Duration,
}

impl ServerStats {
    fn record(&mut self, report: &TickReport, elapsed: Duration) {
        self.ticks += 1;
        self.messages += report.sent;
        self.bytes += report.bytes;
        self.updates += report.updates;
        self.shed += report.shed;
        self.dropped += report.dropped;
        self.held_back += report.held_back;
        self.failed_jobs += report.failed_jobs;
        self.full_syncs += usize::from(report.full_sync);
        self.slowest_tick = self.slowest_tick.max(elapsed);
    }
}

pub struct GameServer {
    endpoint: NetworkEndpoint,
    connections: ConnectionManager,
    config: ServerConfig,
    world: World,
    herd: Herd,
    replication: ReplicationState,
    timestep: FixedTimestep,
    last_update: Instant,
    stats: ServerStats,
    last_stats: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(bind_addr)?;
        if let Some(loss) = &config.global_packet_loss {
            endpoint.set_packet_loss(loss.clone());
        }

        let mut world = World::new();
        let mut herd = Herd::new(config.mob_count, rand_u64());
        herd.populate(&mut world);
        world.drain_events();

        let replication = ReplicationState::new(config.replication.clone())?;

        Ok(Self {
            endpoint,
            connections: ConnectionManager::with_timeout(config.max_clients, config.client_timeout),
            world,
            herd,
            replication,
            timestep: FixedTimestep::new(config.tick_rate),
            last_update: Instant::now(),
            stats: ServerStats::default(),
            last_stats: Instant::now(),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Reads the socket and runs however many fixed ticks have accumulated.
    pub fn update(&mut self) {
        let now = Instant::now();
        self.timestep
            .accumulate((now - self.last_update).as_secs_f32());
        self.last_update = now;

        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("network error: {}", e),
            });
        }

        while self.timestep.consume_tick() {
            self.tick();
        }

        if self.last_stats.elapsed() >= self.config.stats_interval {
            self.log_stats();
        }
    }

    pub fn tick(&mut self) {
        let started = Instant::now();
        let dt = self.timestep.dt();

        self.herd.simulate(&mut self.world, dt);
        self.move_players();
        self.world.advance_tick();

        let events = self.world.drain_events();
        for event in &events {
            if let WorldEvent::Died(id) = event {
                log::debug!("tick {}: entity {} died", self.world.tick(), id.id());
            }
        }
        self.replication.apply_world_events(&events);

        let receivers = self.receivers();
        let mut outbox = EndpointOutbox {
            endpoint: &mut self.endpoint,
            connections: &mut self.connections,
        };
        let report = self.replication.tick(
            self.world.tick(),
            self.world.server_time_ms(),
            self.world.samples(),
            &receivers,
            &mut outbox,
        );
        self.stats.record(&report, started.elapsed());

        for client in self.connections.cleanup_timed_out() {
            self.drop_client(client.client_id, client.entity_id, DisconnectReason::Timeout);
        }
    }

    fn receivers(&self) -> Vec<ReceiverContext> {
        let default_radius = self.config.replication.interest_radius;
        self.connections
            .connected()
            .map(|client| {
                let center = client
                    .entity_id
                    .and_then(|id| self.world.get(id))
                    .map(|entity| entity.state.position);
                let context = ReceiverContext::new(
                    client.receiver_id(),
                    center,
                    client.interest_radius.unwrap_or(default_radius),
                );
                match client.entity_id {
                    Some(entity) => context.with_entity(entity),
                    None => context,
                }
            })
            .collect()
    }

    fn move_players(&mut self) {
        let elapsed = self.world.server_time_ms() as f32 / 1000.0;
        let players: Vec<(u32, EntityId)> = self
            .connections
            .connected()
            .filter_map(|c| c.entity_id.map(|id| (c.client_id, id)))
            .collect();
        for (client_id, entity_id) in players {
            if let Some(entity) = self.world.get_mut(entity_id) {
                patrol(entity, elapsed, client_id as f32 * 0.7);
            }
        }
    }

    fn log_stats(&mut self) {
        let window = self.last_stats.elapsed().as_secs_f32().max(f32::EPSILON);
        let stats = std::mem::take(&mut self.stats);
        log::info!(
            "tick {} | {} clients | {} entities | {:.1} msg/s {:.1} KiB/s {:.0} upd/s | shed {} dropped {} held back {} failed jobs {} full syncs {} | slowest tick {:.2}ms",
            self.world.tick(),
            self.connections.connected_count(),
            self.world.entity_count(),
            stats.messages as f32 / window,
            stats.bytes as f32 / 1024.0 / window,
            stats.updates as f32 / window,
            stats.shed,
            stats.dropped,
            stats.held_back,
            stats.failed_jobs,
            stats.full_syncs,
            stats.slowest_tick.as_secs_f64() * 1000.0,
        );
        self.last_stats = Instant::now();
    }

    fn process_network(&mut self) -> io::Result<()> {
        let packets = self.endpoint.receive()?;
        for (packet, addr) in packets {
            self.handle_packet(packet, addr)?;
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) -> io::Result<()> {
        match packet.payload {
            PacketType::ConnectionRequest { client_salt } => {
                self.handle_connection_request(addr, client_salt)?;
            }
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt)?;
            }
            PacketType::Ping { timestamp } => {
                let pong = Packet::new(PacketHeader::new(0), PacketType::Pong { timestamp });
                self.endpoint.send_to(&pong, addr)?;
            }
            PacketType::Disconnect => {
                if let Some(client) = self.connections.remove_by_addr(&addr) {
                    self.drop_client(client.client_id, client.entity_id, DisconnectReason::Graceful);
                }
                return Ok(());
            }
            _ => {}
        }

        if let Some(client) = self.connections.get_by_addr_mut(&addr) {
            client.touch();
        }
        Ok(())
    }

    fn handle_connection_request(&mut self, addr: SocketAddr, client_salt: u64) -> io::Result<()> {
        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });

        let client = match self.connections.get_or_create_pending(addr, client_salt) {
            Ok(client) => client,
            Err(reason) => {
                let packet = Packet::new(
                    PacketHeader::new(0),
                    PacketType::ConnectionDenied {
                        reason: reason.to_string(),
                    },
                );
                self.endpoint.send_to(&packet, addr)?;
                self.pending_events.push_back(ServerEvent::ConnectionDenied {
                    addr,
                    reason: reason.to_string(),
                });
                return Ok(());
            }
        };

        let packet = Packet::new(
            PacketHeader::new(client.next_sequence()),
            PacketType::ConnectionChallenge {
                server_salt: client.server_salt,
                challenge: client.combined_salt(),
            },
        );
        self.endpoint.send_to(&packet, addr)?;
        Ok(())
    }

    fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64) -> io::Result<()> {
        let already_connected = self
            .connections
            .get_by_addr(&addr)
            .and_then(|c| c.entity_id);

        let client = match self.connections.accept(&addr, combined_salt) {
            Ok(client) => client,
            Err(e) => {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("rejected challenge response from {}: {}", addr, e),
                });
                return Ok(());
            }
        };

        let entity_id = match already_connected {
            Some(id) => id,
            None => {
                let id = self.world.spawn_player(Vec3::new(0.0, 64.0, 0.0));
                client.entity_id = Some(id);
                id
            }
        };

        let client_id = client.client_id;
        let packet = Packet::new(
            PacketHeader::new(client.next_sequence()),
            PacketType::ConnectionAccepted {
                client_id,
                entity_id: entity_id.id(),
                quantization: self.config.replication.quantizer.into(),
            },
        );
        self.endpoint.send_to(&packet, addr)?;

        self.pending_events.push_back(ServerEvent::ClientConnected {
            client_id,
            addr,
            entity_id,
        });
        Ok(())
    }

    fn drop_client(&mut self, client_id: u32, entity_id: Option<EntityId>, reason: DisconnectReason) {
        if let Some(entity_id) = entity_id {
            self.world.despawn(entity_id);
        }
        self.replication.remove_receiver(ReceiverId(client_id));
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { client_id, reason });
    }

    pub fn shutdown(&mut self) {
        let clients: Vec<(u32, SocketAddr, Option<EntityId>)> = self
            .connections
            .iter()
            .map(|c| (c.client_id, c.addr, c.entity_id))
            .collect();

        for (client_id, addr, entity_id) in clients {
            let packet = Packet::new(PacketHeader::new(0), PacketType::Disconnect);
            if let Err(e) = self.endpoint.send_to(&packet, addr) {
                log::debug!("failed to notify {} of shutdown: {}", addr, e);
            }
            self.connections.remove(client_id);
            self.drop_client(client_id, entity_id, DisconnectReason::Shutdown);
        }
    }

    pub fn network_stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }
}
