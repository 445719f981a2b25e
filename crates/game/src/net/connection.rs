use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::replication::ReceiverId;
use crate::world::EntityId;

use super::stats::rand_u64;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
    Disconnecting,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("server full ({0} clients)")]
    ServerFull(usize),
    #[error("challenge response did not match")]
    BadChallenge,
    #[error("unknown client {0}")]
    UnknownClient(SocketAddr),
}

#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub client_id: u32,
    pub state: ConnectionState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub last_receive_time: Instant,
    pub entity_id: Option<EntityId>,
    pub send_sequence: u32,
    pub interest_radius: Option<f32>,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, client_id: u32, client_salt: u64) -> Self {
        Self {
            addr,
            client_id,
            state: ConnectionState::Connecting,
            client_salt,
            server_salt: rand_u64(),
            last_receive_time: Instant::now(),
            entity_id: None,
            send_sequence: 0,
            interest_radius: None,
        }
    }

    pub fn receiver_id(&self) -> ReceiverId {
        ReceiverId(self.client_id)
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn next_sequence(&mut self) -> u32 {
        self.send_sequence = self.send_sequence.wrapping_add(1);
        self.send_sequence
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    clients_by_addr: HashMap<SocketAddr, u32>,
    clients: HashMap<u32, ClientConnection>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients_by_addr: HashMap::new(),
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
    ) -> Result<&mut ClientConnection, ConnectionError> {
        let client_id = match self.clients_by_addr.get(&addr) {
            Some(&id) => id,
            None => {
                if self.clients.len() >= self.max_clients {
                    return Err(ConnectionError::ServerFull(self.max_clients));
                }
                let id = self.next_client_id;
                self.next_client_id += 1;
                self.clients_by_addr.insert(addr, id);
                id
            }
        };

        Ok(self
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientConnection::new(addr, client_id, client_salt)))
    }

    /// Checks the challenge response and promotes the client to Connected.
    pub fn accept(
        &mut self,
        addr: &SocketAddr,
        combined_salt: u64,
    ) -> Result<&mut ClientConnection, ConnectionError> {
        let conn = self
            .get_by_addr_mut(addr)
            .ok_or(ConnectionError::UnknownClient(*addr))?;
        if conn.combined_salt() != combined_salt {
            return Err(ConnectionError::BadChallenge);
        }
        conn.state = ConnectionState::Connected;
        conn.touch();
        Ok(conn)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientConnection> {
        self.clients_by_addr
            .get(addr)
            .and_then(|id| self.clients.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ClientConnection> {
        let id = self.clients_by_addr.get(addr)?;
        self.clients.get_mut(id)
    }

    pub fn get(&self, client_id: u32) -> Option<&ClientConnection> {
        self.clients.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut ClientConnection> {
        self.clients.get_mut(&client_id)
    }

    pub fn remove(&mut self, client_id: u32) -> Option<ClientConnection> {
        let conn = self.clients.remove(&client_id)?;
        self.clients_by_addr.remove(&conn.addr);
        Some(conn)
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<ClientConnection> {
        let client_id = self.clients_by_addr.remove(addr)?;
        self.clients.remove(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients.values()
    }

    pub fn connected(&self) -> impl Iterator<Item = &ClientConnection> {
        self.clients
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<ClientConnection> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }

    pub fn total_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn pending_is_reused_per_address() {
        let mut manager = ConnectionManager::new(4);
        let first = manager.get_or_create_pending(addr(5000), 11).unwrap().client_id;
        let again = manager.get_or_create_pending(addr(5000), 11).unwrap().client_id;
        assert_eq!(first, again);
        assert_eq!(manager.total_count(), 1);
    }

    #[test]
    fn server_full() {
        let mut manager = ConnectionManager::new(1);
        manager.get_or_create_pending(addr(5000), 1).unwrap();
        assert_eq!(
            manager.get_or_create_pending(addr(5001), 2).unwrap_err(),
            ConnectionError::ServerFull(1)
        );
    }

    #[test]
    fn accept_checks_combined_salt() {
        let mut manager = ConnectionManager::new(4);
        let salt = manager.get_or_create_pending(addr(5000), 7).unwrap().combined_salt();

        assert_eq!(
            manager.accept(&addr(5000), salt ^ 1).unwrap_err(),
            ConnectionError::BadChallenge
        );
        assert_eq!(manager.connected_count(), 0);

        let conn = manager.accept(&addr(5000), salt).unwrap();
        assert_eq!(conn.state, ConnectionState::Connected);
        assert_eq!(manager.connected_count(), 1);
    }

    #[test]
    fn timed_out_clients_are_removed() {
        let mut manager = ConnectionManager::with_timeout(4, Duration::ZERO);
        manager.get_or_create_pending(addr(5000), 1).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let gone = manager.cleanup_timed_out();
        assert_eq!(gone.len(), 1);
        assert!(manager.get_by_addr(&addr(5000)).is_none());
    }
}
