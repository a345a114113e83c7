//! Relay network layer: UDP sockets, membership announcements and delivery

use crate::client_manager::ClientManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Invocation, Packet, ParticipantId, Target, CLIENT_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: ParticipantId,
    },
    Shutdown,
}

/// Messages sent from the relay loop to the sender task
#[derive(Debug)]
pub enum OutgoingMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ParticipantId>,
    },
}

/// Room relay: admits replicas, elects the authority and forwards invocations
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    stats_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outgoing_tx: mpsc::UnboundedSender<OutgoingMessage>,
    outgoing_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        member_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, member_timeout))),
            stats_interval: Duration::from_secs(10),
            server_tx,
            server_rx,
            outgoing_tx,
            outgoing_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that stops [`Server::run`] when given [`ServerMessage::Shutdown`]
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue in order
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut outgoing_rx =
            std::mem::replace(&mut self.outgoing_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                match message {
                    OutgoingMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutgoingMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that drops members who stopped sending heartbeats
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outgoing_tx
            .send(OutgoingMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ParticipantId>) {
        if let Err(e) = self
            .outgoing_tx
            .send(OutgoingMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Tells every member who is in the room and who holds authority
    async fn announce_membership(&self) {
        let (authority, members) = {
            let clients = self.clients.read().await;
            (clients.authority(), clients.members())
        };

        debug!(
            "Membership: {} members, authority {:?}",
            members.len(),
            authority
        );
        self.broadcast_packet(Packet::Membership { authority, members }, None);
    }

    async fn handle_join(&mut self, client_version: u32, name: String, addr: SocketAddr) {
        info!(
            "Client {} connecting from {} (version: {})",
            name, addr, client_version
        );

        if client_version != CLIENT_VERSION {
            self.send_packet(
                Packet::Rejected {
                    reason: format!(
                        "Version mismatch: relay speaks {}, client {}",
                        CLIENT_VERSION, client_version
                    ),
                },
                addr,
            );
            return;
        }

        // A second join from the same address replaces the old member
        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };
        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            let mut clients = self.clients.write().await;
            clients.remove_client(&existing_id);
        }

        let joined = {
            let mut clients = self.clients.write().await;
            clients
                .add_client(addr, name)
                .map(|id| (id, clients.replay_log()))
        };

        match joined {
            Ok((participant_id, replay)) => {
                self.send_packet(Packet::Joined { participant_id }, addr);

                debug!(
                    "Replaying {} buffered invocations to {}",
                    replay.len(),
                    participant_id
                );
                for buffered in replay {
                    self.send_packet(
                        Packet::Deliver {
                            sender: buffered.sender,
                            invocation: buffered.invocation,
                        },
                        addr,
                    );
                }
                self.announce_membership().await;
            }
            Err(e) => {
                warn!("Refusing {}: {}", addr, e);
                self.send_packet(
                    Packet::Rejected {
                        reason: e.to_string(),
                    },
                    addr,
                );
                if existing_client_id.is_some() {
                    self.announce_membership().await;
                }
            }
        }
    }

    async fn handle_invoke(
        &mut self,
        target: Target,
        buffered: bool,
        invocation: Invocation,
        addr: SocketAddr,
    ) {
        let routed = {
            let mut clients = self.clients.write().await;
            let Some(sender) = clients.find_client_by_addr(addr) else {
                debug!("Invocation from unknown address {}", addr);
                return;
            };
            clients.touch(sender);
            clients
                .route(sender, target, buffered, &invocation)
                .map(|recipients| (sender, recipients))
        };

        match routed {
            Ok((sender, recipients)) => {
                debug!(
                    "{:?} from {} to {} recipients",
                    invocation,
                    sender,
                    recipients.len()
                );
                for (_, recipient_addr) in recipients {
                    self.send_packet(
                        Packet::Deliver {
                            sender,
                            invocation: invocation.clone(),
                        },
                        recipient_addr,
                    );
                }
            }
            Err(e) => warn!("Dropped {:?}: {}", invocation, e),
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                client_version,
                name,
            } => {
                self.handle_join(client_version, name, addr).await;
            }

            Packet::Invoke {
                target,
                buffered,
                invocation,
            } => {
                self.handle_invoke(target, buffered, invocation, addr).await;
            }

            Packet::Heartbeat => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.touch(client_id);
                }
            }

            Packet::Leave => {
                let removed = {
                    let mut clients = self.clients.write().await;
                    match clients.find_client_by_addr(addr) {
                        Some(client_id) => clients.remove_client(&client_id),
                        None => false,
                    }
                };

                if removed {
                    self.announce_membership().await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Main relay loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut stats_interval = interval(self.stats_interval);

        info!("Relay started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.announce_membership().await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Relay shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    let clients = self.clients.read().await;
                    if !clients.is_empty() {
                        debug!(
                            "{} members, authority {:?}, {} buffered invocations",
                            clients.len(),
                            clients.authority(),
                            clients.replay_log().len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Join {
            client_version: 1,
            name: "alice".to_string(),
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived { packet, addr };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                match p {
                    Packet::Join { name, .. } => assert_eq!(name, "alice"),
                    _ => panic!("Unexpected packet type"),
                }
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_preserves_delivery_order() {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9000);

        for value in 0..3 {
            let packet = Packet::Deliver {
                sender: 1,
                invocation: Invocation::SetScore { id: 1, value },
            };
            assert!(tx.send(OutgoingMessage::SendPacket { packet, addr }).is_ok());
        }

        for expected in 0..3 {
            match rx.try_recv() {
                Ok(OutgoingMessage::SendPacket {
                    packet:
                        Packet::Deliver {
                            invocation: Invocation::SetScore { value, .. },
                            ..
                        },
                    ..
                }) => assert_eq!(value, expected),
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = tokio_test::assert_ok!(
            Server::new("127.0.0.1:0", 4, Duration::from_secs(5)).await
        );
        let addr = tokio_test::assert_ok!(server.local_addr());

        assert_ne!(addr.port(), 0);
    }
}
