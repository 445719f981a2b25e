use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use super::connection::ConnectionState;
use super::protocol::{Packet, MAX_PACKET_SIZE};
use super::stats::{NetworkStats, PacketLossSimulation};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MIN_DATAGRAM: usize = 8;

/// Non-blocking UDP socket that speaks [`Packet`]s.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    state: ConnectionState,
    stats: NetworkStats,
    loss: PacketLossSimulation,
    recv_buffer: Box<[u8]>,
    timeout: Duration,
    last_receive_time: Instant,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            state: ConnectionState::Disconnected,
            stats: NetworkStats::default(),
            loss: PacketLossSimulation::default(),
            recv_buffer: vec![0u8; MAX_PACKET_SIZE].into_boxed_slice(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            last_receive_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    pub fn set_packet_loss(&mut self, loss: PacketLossSimulation) {
        self.loss = loss;
    }

    /// Sends an already encoded datagram. Simulated loss still counts as sent.
    pub fn send_bytes_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("packet of {} bytes exceeds {}", data.len(), MAX_PACKET_SIZE),
            ));
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += data.len() as u64;

        if self.loss.should_drop() {
            self.stats.packets_dropped += 1;
            return Ok(data.len());
        }
        self.socket.send_to(data, addr)
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let data = packet
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.send_bytes_to(&data, addr)
    }

    pub fn send(&mut self, packet: &Packet) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_to(packet, addr)
    }

    /// Drains the socket. Undecodable or foreign datagrams are counted and skipped.
    pub fn receive(&mut self) -> io::Result<Vec<(Packet, SocketAddr)>> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if size < MIN_DATAGRAM {
                        self.stats.packets_rejected += 1;
                        continue;
                    }
                    match Packet::deserialize(&self.recv_buffer[..size]) {
                        Ok(packet) if packet.header.is_valid() => {
                            self.stats.packets_received += 1;
                            self.stats.bytes_received += size as u64;
                            self.last_receive_time = Instant::now();
                            packets.push((packet, addr));
                        }
                        Ok(_) | Err(_) => {
                            log::debug!("rejected {} byte datagram from {}", size, addr);
                            self.stats.packets_rejected += 1;
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(packets)
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_receive_time.elapsed() > self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.stats = NetworkStats::default();
        self.last_receive_time = Instant::now();
    }
}
