use crate::commands::{Command, HELP};
use crate::hud::Hud;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::gateway::Outbox;
use shared::{
    MatchConfig, MatchPhase, Outbound, Packet, Session, CLIENT_VERSION, HEARTBEAT_INTERVAL_MS,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};

/// Everything a replica needs before it joins the room
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server_addr: String,
    pub name: String,
    pub tick_rate: u32,
    pub fake_ping_ms: u64,
    /// Start rounds automatically while holding authority
    pub auto_start: bool,
    pub seed: Option<u64>,
    pub match_config: MatchConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            name: "player".to_string(),
            tick_rate: 30,
            fake_ping_ms: 0,
            auto_start: false,
            seed: None,
            match_config: MatchConfig::default(),
        }
    }
}

/// Headless replica connected to a room relay
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    name: String,
    session: Session<Outbox>,
    hud: Hud,

    tick_rate: u32,
    fake_ping_ms: u64,
    auto_start: bool,
    connected: bool,
}

impl Client {
    pub async fn new(options: ClientOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = options.server_addr.parse()?;

        let session = match options.seed {
            Some(seed) => Session::with_rng(
                options.match_config,
                Outbox::new(),
                StdRng::seed_from_u64(seed),
            ),
            None => Session::new(options.match_config, Outbox::new()),
        };

        Ok(Client {
            socket,
            server_addr,
            name: options.name,
            session,
            hud: Hud::new(),
            tick_rate: options.tick_rate.max(1),
            fake_ping_ms: options.fake_ping_ms,
            auto_start: options.auto_start,
            connected: false,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn session(&self) -> &Session<Outbox> {
        &self.session
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Joining room at {} as {}", self.server_addr, self.name);

        let packet = Packet::Join {
            client_version: CLIENT_VERSION,
            name: self.name.clone(),
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends whatever the session queued since the last flush, in order
    async fn flush_outbox(&mut self) {
        for outbound in self.session.gateway_mut().drain() {
            let packet = invoke_packet(outbound);
            if let Err(e) = self.send_packet(&packet).await {
                error!("Failed to send invocation: {}", e);
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Joined { participant_id } => {
                info!("Joined! Participant ID: {}", participant_id);
                self.session.gateway_mut().set_local_id(Some(participant_id));
                self.session.on_room_joined();
                self.connected = true;
            }

            Packet::Rejected { reason } => {
                error!("Join rejected: {}", reason);
                return Err(format!("join rejected: {}", reason).into());
            }

            Packet::Membership { authority, members } => {
                let was_authority = self.session.is_authority();
                self.session.gateway_mut().set_authority(authority);
                if self.session.is_authority() && !was_authority {
                    info!("This replica now holds authority");
                }
                self.session.on_membership_changed(&members);
            }

            Packet::Deliver { sender, invocation } => {
                debug!("{:?} from {}", invocation, sender);
                self.session.receive(invocation);
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }

        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => {
                if self.session.is_running() {
                    println!("A match is already running");
                } else {
                    self.session.request_start();
                }
            }
            Command::Score { id, delta } => {
                if self.session.score(id).is_none() {
                    println!("No participant {}", id);
                } else {
                    self.session.award_score(id, delta);
                }
            }
            Command::Roster => Hud::roster(&self.session.display_lines()),
            Command::Quit => return false,
        }
        true
    }

    fn tick(&mut self) {
        let dt = 1.0 / self.tick_rate as f32;
        self.session.tick(dt);

        if self.auto_start && should_auto_start(&self.session) {
            info!("Everyone is ready, starting the next round");
            self.session.request_start();
        }

        let controller = self.session.controller();
        if let Some(text) = self
            .hud
            .countdown(controller.remaining_time(), controller.is_running())
        {
            println!("{}", text);
        }
    }

    fn report_events(&mut self) {
        let events = self.session.drain_events();
        self.hud.report(&events);
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;
        println!("{}", HELP);

        let mut commands = spawn_console_reader();
        let mut tick_interval = interval(Duration::from_secs_f32(1.0 / self.tick_rate as f32));
        let mut heartbeat_interval = interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));

        let mut buffer = [0u8; 4096];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => self.handle_packet(packet)?,
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    if self.connected {
                        self.tick();
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },

                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            debug!("Console closed");
                            commands = spawn_idle_console();
                        }
                    }
                },
            }

            self.report_events();
            self.flush_outbox().await;
        }

        self.leave().await;

        Ok(())
    }

    /// Tells the relay we are gone and drops the room state
    async fn leave(&mut self) {
        if !self.connected {
            return;
        }

        if let Err(e) = self.send_packet(&Packet::Leave).await {
            warn!("Failed to send leave packet: {}", e);
        }
        self.session.on_room_left();
        self.connected = false;
    }
}

/// Wire packet for an invocation the session wants sent
pub fn invoke_packet(outbound: Outbound) -> Packet {
    Packet::Invoke {
        target: outbound.target,
        buffered: outbound.buffered,
        invocation: outbound.invocation,
    }
}

/// The authority begins a round once at least two participants are in the
/// lobby and all of them have loaded
pub fn should_auto_start(session: &Session<Outbox>) -> bool {
    let controller = session.controller();
    session.is_authority()
        && controller.phase() == MatchPhase::Lobby
        && controller.registry().len() >= 2
        && controller.all_ready()
}

/// Reads commands from stdin on a separate task
fn spawn_console_reader() -> mpsc::UnboundedReceiver<Command> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(command) => {
                            if tx.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => println!("{} ({})", e, HELP),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading console: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Receiver that never yields, used once stdin is closed so the replica keeps
/// running headless
fn spawn_idle_console() -> mpsc::UnboundedReceiver<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        tx.closed().await;
    });
    rx
}
