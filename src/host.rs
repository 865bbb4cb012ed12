//! Single-threaded I/O multiplex loop: one TCP listener, one UDP broadcast
//! socket, and every peer connection, all driven from one `tokio::select!`
//! on a `current_thread` runtime so there is exactly one OS thread and no
//! cross-thread shared state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::game::{Game, JoinOutcome, OutMsg};
use crate::peer::player::PlayerEvent;
use crate::peer::potential::PotentialEvent;
use crate::peer::{InboundBuffer, OutboundBuffer, Potential};

const TICK_INTERVAL: Duration = Duration::from_millis(50);
const IDLE_SLEEP: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 8192;
const MAX_INBOUND_BYTES: usize = 64 * 1024;
const LAN_BROADCAST_ADDR: &str = "255.255.255.255:6112";

struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    inbound: InboundBuffer,
    outbound: OutboundBuffer,
    close_after_flush: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            inbound: InboundBuffer::new(),
            outbound: OutboundBuffer::new(),
            close_after_flush: false,
        }
    }

    fn pump_read(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    self.close_after_flush = true;
                    return;
                }
                Ok(n) => {
                    self.inbound.extend(&buf[..n]);
                    if self.inbound.len() > MAX_INBOUND_BYTES {
                        self.close_after_flush = true;
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    self.close_after_flush = true;
                    return;
                }
            }
        }
    }

    fn pump_write(&mut self) {
        while !self.outbound.is_empty() {
            match self.stream.try_write(self.outbound.as_slice()) {
                Ok(0) => break,
                Ok(n) => self.outbound.consume(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.close_after_flush = true;
                    break;
                }
            }
        }
    }

    fn fully_drained(&self) -> bool {
        self.close_after_flush && self.outbound.is_empty()
    }
}

/// Drives one lobby/game to completion: accepts connections while the game
/// allows it, pumps every socket each tick, and routes the game's outbound
/// messages back to the right sockets.
pub struct Host {
    listener: Option<TcpListener>,
    udp: UdpSocket,
    game: Game,
    potentials: Vec<(Connection, Potential)>,
    players: HashMap<u8, Connection>,
    exiting: bool,
}

impl Host {
    pub async fn bind(game: Game, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let udp = UdpSocket::bind(("0.0.0.0", 0)).await?;
        udp.set_broadcast(true)?;
        info!(port, "listening for game connections");
        Ok(Self {
            listener: Some(listener),
            udp,
            game,
            potentials: Vec::new(),
            players: HashMap::new(),
            exiting: false,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let clock = crate::time::SystemClock::new();
        use crate::time::Clock;

        loop {
            if self.exiting || self.game.done {
                break;
            }

            let accepting = self.listener.is_some() && self.game.accepts_new_connections();
            tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    self.exiting = true;
                }
                accepted = accept_next(&self.listener), if accepting => {
                    if let Some((stream, addr)) = accepted {
                        debug!(%addr, "accepted connection");
                        self.potentials.push((Connection::new(stream, addr), Potential::new()));
                    }
                }
                _ = ticker.tick() => {
                    self.tick(clock.now_ms()).await;
                }
            }

            if !self.game.accepts_new_connections() {
                self.listener = None;
            }
            if self.players.is_empty() && self.potentials.is_empty() && self.listener.is_none() {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }

        info!("host loop exiting");
        Ok(())
    }

    async fn tick(&mut self, now_ms: u64) {
        let now_ticks = now_ms as u32;

        self.pump_potentials(now_ms);
        self.pump_players(now_ticks, now_ms);

        let out = self.game.update(now_ms, now_ticks);
        self.dispatch(out).await;

        if matches!(self.game.state, crate::game::GameState::Loading | crate::game::GameState::Loaded)
            && !self.potentials.is_empty()
        {
            debug!(count = self.potentials.len(), "discarding pending potentials at loading");
            self.potentials.clear();
        }

        self.flush_all();
        self.reap_closed();
    }

    fn pump_potentials(&mut self, now_ms: u64) {
        let mut joined = Vec::new();
        for (idx, (conn, potential)) in self.potentials.iter_mut().enumerate() {
            conn.pump_read();
            match potential.poll(&mut conn.inbound) {
                Ok(Some(PotentialEvent::Joined(join))) => joined.push((idx, join, conn.peer_addr)),
                Ok(None) => {}
                Err(_) => conn.close_after_flush = true,
            }
            if potential.delete_me {
                conn.close_after_flush = true;
            }
        }

        for (idx, join, addr) in joined.into_iter().rev() {
            let external_ip = match addr.ip() {
                std::net::IpAddr::V4(v4) => u32::from_le_bytes(v4.octets()),
                std::net::IpAddr::V6(_) => 0,
            };
            let (outcome, out) = self.game.handle_join_request(join, external_ip, now_ms);
            let (mut conn, _potential) = self.potentials.remove(idx);
            match outcome {
                JoinOutcome::Accepted { pid } => {
                    self.route_all(out);
                    self.players.insert(pid, conn);
                }
                JoinOutcome::Rejected(reason) => {
                    conn.outbound.push(&self.game.reject_join(reason));
                    conn.close_after_flush = true;
                    self.potentials.push((conn, Potential::new()));
                }
            }
        }
    }

    fn pump_players(&mut self, now_ticks: u32, now_ms: u64) {
        let pids: Vec<u8> = self.players.keys().copied().collect();
        let any_downloading = self.game.players.iter().any(|p| p.download_started && !p.download_finished);
        let last_lag_screen_ms = self.game.last_lag_screen_ms;

        for pid in pids {
            let Some(conn) = self.players.get_mut(&pid) else { continue };
            conn.pump_read();
            let Some(player) = self.game.players.iter_mut().find(|p| p.pid == pid) else { continue };

            if player.is_timed_out(now_ms, last_lag_screen_ms) {
                let out = self.game.handle_player_event(pid, PlayerEvent::DisconnectTimedOut, now_ticks);
                self.route_all(out);
                continue;
            }

            let ctx = crate::peer::player::PollContext {
                now_ticks,
                now_ms,
                last_lag_screen_reset_ms: last_lag_screen_ms,
                any_peer_downloading: any_downloading,
            };
            let events = player.poll(&mut conn.inbound, &ctx);
            for event in events {
                let out = self.game.handle_player_event(pid, event, now_ticks);
                self.route_all(out);
            }
        }
    }

    async fn dispatch(&mut self, out: Vec<OutMsg>) {
        for msg in out {
            match msg {
                OutMsg::Lan(bytes) => {
                    if let Err(e) = self.udp.send_to(&bytes, LAN_BROADCAST_ADDR).await {
                        warn!(error = %e, "lan broadcast failed");
                    }
                }
                other => self.route(other),
            }
        }
    }

    fn route_all(&mut self, out: Vec<OutMsg>) {
        for msg in out {
            self.route(msg);
        }
    }

    fn route(&mut self, msg: OutMsg) {
        match msg {
            OutMsg::ToPlayer(pid, bytes) => {
                if let Some(conn) = self.players.get_mut(&pid) {
                    conn.outbound.push(&bytes);
                }
            }
            OutMsg::Broadcast(bytes) => {
                for conn in self.players.values_mut() {
                    conn.outbound.push(&bytes);
                }
            }
            OutMsg::BroadcastExcept(pid, bytes) => {
                for (&p, conn) in self.players.iter_mut() {
                    if p != pid {
                        conn.outbound.push(&bytes);
                    }
                }
            }
            OutMsg::Lan(bytes) => {
                debug!(len = bytes.len(), "dropped lan message routed synchronously");
            }
        }
    }

    fn flush_all(&mut self) {
        for (conn, _) in self.potentials.iter_mut() {
            conn.pump_write();
        }
        for conn in self.players.values_mut() {
            conn.pump_write();
        }
    }

    fn reap_closed(&mut self) {
        self.potentials.retain(|(conn, _)| !conn.fully_drained());

        let dead_pids: Vec<u8> =
            self.players.iter().filter(|(_, conn)| conn.fully_drained()).map(|(&pid, _)| pid).collect();
        for pid in dead_pids {
            self.players.remove(&pid);
            if self.game.players.iter().any(|p| p.pid == pid) {
                let out = self.game.handle_player_event(pid, PlayerEvent::DisconnectTimedOut, 0);
                self.route_all(out);
            }
        }
    }
}

async fn accept_next(listener: &Option<TcpListener>) -> Option<(TcpStream, SocketAddr)> {
    match listener {
        Some(l) => l.accept().await.ok(),
        None => std::future::pending().await,
    }
}
