use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use flock::net::{rand_u64, QuantizationInfo};
use flock::{
    ConnectionState, EntityId, NetworkEndpoint, NetworkStats, Packet, PacketHeader, PacketType,
    TickMessage,
};

use super::config::ClientConfig;
use super::replica::{ClientReplication, Frame};

pub struct NetworkClient {
    endpoint: NetworkEndpoint,
    config: ClientConfig,
    state: ConnectionState,
    client_id: Option<u32>,
    entity_id: Option<EntityId>,
    client_salt: u64,
    server_salt: Option<u64>,
    sequence: u32,
    replication: Option<ClientReplication>,
    epoch: Instant,
    last_ping_time: Instant,
    connection_start_time: Option<Instant>,
}

impl NetworkClient {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind("0.0.0.0:0")?;
        endpoint.set_timeout(config.connection_timeout);

        Ok(Self {
            endpoint,
            state: ConnectionState::Disconnected,
            client_id: None,
            entity_id: None,
            client_salt: rand_u64(),
            server_salt: None,
            sequence: 0,
            replication: None,
            epoch: Instant::now(),
            last_ping_time: Instant::now(),
            connection_start_time: None,
            config,
        })
    }

    fn local_now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn next_header(&mut self) -> PacketHeader {
        self.sequence = self.sequence.wrapping_add(1);
        PacketHeader::new(self.sequence)
    }

    pub fn connect(&mut self, server_addr: SocketAddr) -> io::Result<()> {
        log::info!("connecting to {}", server_addr);

        self.endpoint.set_remote(server_addr);
        self.endpoint.reset();
        self.state = ConnectionState::Connecting;
        self.connection_start_time = Some(Instant::now());

        let header = self.next_header();
        let packet = Packet::new(
            header,
            PacketType::ConnectionRequest {
                client_salt: self.client_salt,
            },
        );
        self.endpoint.send(&packet)?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            let header = self.next_header();
            if let Err(e) = self.endpoint.send(&Packet::new(header, PacketType::Disconnect)) {
                log::debug!("failed to send disconnect: {}", e);
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.endpoint.set_state(ConnectionState::Disconnected);
        self.client_id = None;
        self.entity_id = None;
        self.server_salt = None;
        self.client_salt = rand_u64();
        self.replication = None;
        self.connection_start_time = None;
    }

    /// Drains the socket and, once connected, renders one frame.
    pub fn update(&mut self, dt: f32) -> io::Result<Option<Frame>> {
        self.process_network()?;

        match self.state {
            ConnectionState::Connecting | ConnectionState::ChallengeResponse => {
                if self
                    .connection_start_time
                    .is_some_and(|start| start.elapsed() > self.config.connection_timeout)
                {
                    log::warn!("connection attempt timed out");
                    self.reset();
                }
                Ok(None)
            }
            ConnectionState::Connected => {
                if self.last_ping_time.elapsed() >= self.config.ping_interval {
                    self.send_ping()?;
                    self.last_ping_time = Instant::now();
                }

                if self.endpoint.is_timed_out() {
                    log::warn!("server connection lost");
                    self.reset();
                    return Ok(None);
                }

                let now = self.local_now();
                Ok(self
                    .replication
                    .as_mut()
                    .map(|replication| replication.render_frame(now, dt)))
            }
            _ => Ok(None),
        }
    }

    fn send_ping(&mut self) -> io::Result<()> {
        let timestamp = self.epoch.elapsed().as_millis() as u64;
        let header = self.next_header();
        self.endpoint
            .send(&Packet::new(header, PacketType::Ping { timestamp }))?;
        Ok(())
    }

    fn process_network(&mut self) -> io::Result<()> {
        let packets = self.endpoint.receive()?;
        for (packet, addr) in packets {
            if self.endpoint.remote_addr() != Some(addr) {
                log::debug!("ignoring packet from unexpected peer {}", addr);
                continue;
            }
            self.handle_payload(packet.payload)?;
        }
        Ok(())
    }

    fn handle_payload(&mut self, payload: PacketType) -> io::Result<()> {
        match payload {
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            } => self.handle_challenge(server_salt, challenge)?,
            PacketType::ConnectionAccepted {
                client_id,
                entity_id,
                quantization,
            } => self.handle_connection_accepted(client_id, entity_id, quantization),
            PacketType::ConnectionDenied { reason } => {
                log::warn!("connection denied: {}", reason);
                self.reset();
            }
            PacketType::Replicate(message) => self.handle_tick(message),
            PacketType::Pong { timestamp } => {
                let now = self.epoch.elapsed().as_millis() as u64;
                let rtt = now.saturating_sub(timestamp);
                self.endpoint.stats_mut().record_rtt(rtt as f32);
                log::debug!("ping rtt {} ms", rtt);
            }
            PacketType::Disconnect => {
                log::info!("disconnected by server");
                self.reset();
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_challenge(&mut self, server_salt: u64, challenge: u64) -> io::Result<()> {
        if self.state != ConnectionState::Connecting {
            return Ok(());
        }

        let expected = self.client_salt ^ server_salt;
        if challenge != expected {
            log::warn!("challenge mismatch");
            return Ok(());
        }

        self.server_salt = Some(server_salt);
        self.state = ConnectionState::ChallengeResponse;
        let header = self.next_header();
        self.endpoint.send(&Packet::new(
            header,
            PacketType::ChallengeResponse {
                combined_salt: expected,
            },
        ))?;
        Ok(())
    }

    fn handle_connection_accepted(
        &mut self,
        client_id: u32,
        entity_id: u32,
        quantization: QuantizationInfo,
    ) {
        if self.state == ConnectionState::Connected {
            return;
        }
        log::info!(
            "connected as client {} controlling entity {}",
            client_id,
            entity_id
        );

        let entity = EntityId(entity_id);
        self.client_id = Some(client_id);
        self.entity_id = Some(entity);
        self.state = ConnectionState::Connected;
        self.endpoint.set_state(ConnectionState::Connected);
        self.replication = Some(ClientReplication::new(
            self.config.clone(),
            quantization.into(),
            Some(entity),
        ));
    }

    fn handle_tick(&mut self, message: TickMessage) {
        let now = self.local_now();
        match self.replication.as_mut() {
            Some(replication) => {
                replication.ingest(message, now);
            }
            None => log::debug!("tick {} arrived before the session was accepted", message.tick),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity_id
    }

    pub fn replication(&self) -> Option<&ClientReplication> {
        self.replication.as_ref()
    }

    pub fn replication_mut(&mut self) -> Option<&mut ClientReplication> {
        self.replication.as_mut()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let client = NetworkClient::new(ClientConfig::default()).unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.replication().is_none());
    }

    #[test]
    fn handshake_against_a_scripted_server() {
        let mut server = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut client = NetworkClient::new(ClientConfig::default()).unwrap();
        let server_addr = server.local_addr();
        client.connect(server_addr).unwrap();

        let (request, from) = wait(&mut server);
        let PacketType::ConnectionRequest { client_salt } = request.payload else {
            panic!("expected ConnectionRequest");
        };
        let server_salt = 99;
        server
            .send_to(
                &Packet::new(
                    PacketHeader::new(1),
                    PacketType::ConnectionChallenge {
                        server_salt,
                        challenge: client_salt ^ server_salt,
                    },
                ),
                from,
            )
            .unwrap();

        pump(&mut client, |c| c.state() == ConnectionState::ChallengeResponse);
        let (response, _) = wait(&mut server);
        assert!(matches!(
            response.payload,
            PacketType::ChallengeResponse { combined_salt } if combined_salt == client_salt ^ server_salt
        ));

        server
            .send_to(
                &Packet::new(
                    PacketHeader::new(2),
                    PacketType::ConnectionAccepted {
                        client_id: 3,
                        entity_id: 12,
                        quantization: flock::Quantizer::default().into(),
                    },
                ),
                from,
            )
            .unwrap();
        pump(&mut client, NetworkClient::is_connected);
        assert_eq!(client.entity_id(), Some(EntityId(12)));
        assert!(client.replication().is_some());
    }

    fn wait(endpoint: &mut NetworkEndpoint) -> (Packet, SocketAddr) {
        let start = Instant::now();
        while start.elapsed().as_millis() < 500 {
            let mut received = endpoint.receive().unwrap();
            if !received.is_empty() {
                return received.remove(0);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("no packet");
    }

    fn pump(client: &mut NetworkClient, done: impl Fn(&NetworkClient) -> bool) {
        let start = Instant::now();
        while start.elapsed().as_millis() < 500 {
            client.update(0.016).unwrap();
            if done(client) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("client never reached the expected state");
    }
}
