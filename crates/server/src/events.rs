use std::net::SocketAddr;

use flock::EntityId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    ClientConnected {
        client_id: u32,
        addr: SocketAddr,
        entity_id: EntityId,
    },
    ClientDisconnected {
        client_id: u32,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Shutdown => "dropped at shutdown",
        }
    }
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::ClientConnecting { addr } => {
                log::debug!("connection request from {}", addr);
            }
            ServerEvent::ClientConnected {
                client_id,
                addr,
                entity_id,
            } => {
                log::info!(
                    "client {} connected from {} (entity {})",
                    client_id,
                    addr,
                    entity_id.id()
                );
            }
            ServerEvent::ClientDisconnected { client_id, reason } => {
                log::info!("client {} {}", client_id, reason.as_str());
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("connection denied to {}: {}", addr, reason);
            }
            ServerEvent::Error { message } => log::error!("{}", message),
        }
    }
}
