//! Post-join peer state: once a join request has been accepted, every
//! subsequent packet on the connection is dispatched through here instead
//! of the pre-join acceptor.

use std::collections::VecDeque;

use crate::error::Result;
use crate::peer::InboundBuffer;
use crate::protocol::messages::ChatToHostBody;
use crate::protocol::packet::{parse_frame, Opcode};
use crate::protocol::{
    decode_chat_to_host, decode_drop_req, decode_game_loaded_self, decode_leave_game,
    decode_map_size, decode_outgoing_action, decode_outgoing_keepalive, decode_pong_to_host,
};

const RECV_TIMEOUT_MS: u64 = 30_000;
const LAG_SCREEN_GRACE_MS: u64 = 10_000;
const PING_RING_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct Action {
    pub pid: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Left { reason: u32 },
    Loaded,
    Action(Action),
    KeepAlive { checksum: u32 },
    Chat { recipients: Vec<u8>, from_pid: u8, body: ChatToHostBody },
    DropRequest,
    MapSize { size_flag: u8, map_size: u32 },
    Pong { rtt_ticks: u32 },
    DisconnectTimedOut,
    ProtocolError,
}

/// Context the Game must supply each poll because these two rules depend on
/// state that lives above a single player.
pub struct PollContext {
    pub now_ticks: u32,
    pub now_ms: u64,
    pub last_lag_screen_reset_ms: u64,
    pub any_peer_downloading: bool,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub pid: u8,
    pub name: String,
    pub internal_ip: u32,
    pub external_ip: u32,
    pub sync_counter: u32,
    pub checksum_queue: VecDeque<u32>,
    pub left_code: u32,
    pub left_reason: String,
    pub last_map_part_sent: u32,
    pub last_map_part_acked: u32,
    pub download_started: bool,
    pub download_finished: bool,
    pub finished_loading: bool,
    pub lagging: bool,
    pub started_lagging_ticks: u32,
    pub drop_vote: bool,
    pub left_message_sent: bool,
    pub delete_me: bool,
    pub ping_samples: VecDeque<u32>,
    pub last_recv_ms: u64,
    sent_drop_req: bool,
}

impl Player {
    pub fn new(pid: u8, name: String, internal_ip: u32, external_ip: u32, now_ms: u64) -> Self {
        Self {
            pid,
            name,
            internal_ip,
            external_ip,
            sync_counter: 0,
            checksum_queue: VecDeque::new(),
            left_code: 0,
            left_reason: String::new(),
            last_map_part_sent: 0,
            last_map_part_acked: 0,
            download_started: false,
            download_finished: false,
            finished_loading: false,
            lagging: false,
            started_lagging_ticks: 0,
            drop_vote: false,
            left_message_sent: false,
            delete_me: false,
            ping_samples: VecDeque::with_capacity(PING_RING_CAPACITY),
            last_recv_ms: now_ms,
            sent_drop_req: false,
        }
    }

    pub fn average_ping_ms(&self) -> Option<u32> {
        if self.ping_samples.is_empty() {
            return None;
        }
        let sum: u64 = self.ping_samples.iter().map(|&v| v as u64).sum();
        Some((sum / self.ping_samples.len() as u64) as u32)
    }

    fn push_ping_sample(&mut self, rtt_ticks: u32) {
        if self.ping_samples.len() == PING_RING_CAPACITY {
            self.ping_samples.pop_front();
        }
        self.ping_samples.push_back(rtt_ticks);
    }

    /// No bytes for >=30s, with a 10s grace period measured from the last
    /// lag-screen reset so legitimate lag-screen silence isn't mistaken for
    /// a dead connection.
    pub fn is_timed_out(&self, now_ms: u64, ctx_last_lag_screen_reset_ms: u64) -> bool {
        let quiet_for = now_ms.saturating_sub(self.last_recv_ms);
        let since_lag_reset = now_ms.saturating_sub(ctx_last_lag_screen_reset_ms);
        quiet_for >= RECV_TIMEOUT_MS && since_lag_reset >= LAG_SCREEN_GRACE_MS
    }

    /// Drain and dispatch every complete frame currently buffered.
    pub fn poll(&mut self, inbound: &mut InboundBuffer, ctx: &PollContext) -> Vec<PlayerEvent> {
        let mut events = Vec::new();

        loop {
            let frame = match parse_frame(inbound.as_slice()) {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(_) => {
                    self.delete_me = true;
                    events.push(PlayerEvent::ProtocolError);
                    break;
                }
            };
            let consumed = frame.consumed;
            let opcode = frame.opcode;
            let body = frame.body.to_vec();
            inbound.consume(consumed);
            self.last_recv_ms = ctx.now_ms;

            if let Some(event) = self.dispatch(opcode, &body, ctx) {
                events.push(event);
            }
        }

        events
    }

    fn dispatch(&mut self, opcode: Opcode, body: &[u8], ctx: &PollContext) -> Option<PlayerEvent> {
        match opcode {
            Opcode::LeaveGame => {
                let reason = decode_leave_game(body).ok()?;
                self.left_code = reason;
                Some(PlayerEvent::Left { reason })
            }
            Opcode::GameLoadedSelf => {
                decode_game_loaded_self(body).ok()?;
                if self.finished_loading {
                    None
                } else {
                    self.finished_loading = true;
                    Some(PlayerEvent::Loaded)
                }
            }
            Opcode::OutgoingAction => {
                if self.pid == 255 {
                    return None;
                }
                let action = decode_outgoing_action(body).ok()?;
                Some(PlayerEvent::Action(Action { pid: self.pid, payload: action.payload }))
            }
            Opcode::OutgoingKeepAlive => {
                let checksum = decode_outgoing_keepalive(body).ok()?;
                self.checksum_queue.push_back(checksum);
                self.sync_counter += 1;
                Some(PlayerEvent::KeepAlive { checksum })
            }
            Opcode::ChatToHost => {
                let chat = decode_chat_to_host(body).ok()?;
                // the packet carries its own from_pid field, but we never trust a
                // client's claimed identity over the connection's authenticated pid.
                Some(PlayerEvent::Chat {
                    recipients: chat.recipients,
                    from_pid: self.pid,
                    body: chat.body,
                })
            }
            Opcode::DropReq => {
                decode_drop_req(body).ok()?;
                if self.sent_drop_req {
                    None
                } else {
                    self.sent_drop_req = true;
                    self.drop_vote = true;
                    Some(PlayerEvent::DropRequest)
                }
            }
            Opcode::MapSize => {
                let report = decode_map_size(body).ok()?;
                Some(PlayerEvent::MapSize { size_flag: report.size_flag, map_size: report.map_size })
            }
            Opcode::PongToHost => {
                let echoed = decode_pong_to_host(body).ok()?;
                let rtt = ctx.now_ticks.saturating_sub(echoed);
                if rtt <= 1 || ctx.any_peer_downloading {
                    None
                } else {
                    self.push_ping_sample(rtt);
                    Some(PlayerEvent::Pong { rtt_ticks: rtt })
                }
            }
            _ => None,
        }
    }

    /// Reset the per-countdown drop-request latch; called whenever the
    /// lobby (re-)enters Waiting so a former drop vote doesn't linger.
    pub fn reset_drop_vote(&mut self) {
        self.drop_vote = false;
        self.sent_drop_req = false;
    }
}

pub fn decode_ok<T>(r: Result<T>) -> Option<T> {
    r.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BinaryWriter;
    use crate::protocol::packet::{finish_packet, start_packet};

    fn ctx() -> PollContext {
        PollContext { now_ticks: 1000, now_ms: 0, last_lag_screen_reset_ms: 0, any_peer_downloading: false }
    }

    fn player() -> Player {
        Player::new(1, "alice".into(), 0x0100007F, 0, 0)
    }

    #[test]
    fn game_loaded_self_fires_only_once() {
        let mut p = player();
        let mut inbound = InboundBuffer::new();
        inbound.extend(&finish_packet(start_packet(Opcode::GameLoadedSelf)));
        inbound.extend(&finish_packet(start_packet(Opcode::GameLoadedSelf)));
        let events = p.poll(&mut inbound, &ctx());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PlayerEvent::Loaded));
        assert!(p.finished_loading);
    }

    #[test]
    fn keepalive_increments_sync_counter_and_queues_checksum() {
        let mut p = player();
        let mut inbound = InboundBuffer::new();
        let mut w = start_packet(Opcode::OutgoingKeepAlive);
        w.write_u8(0);
        w.write_u32_le(0xAAAA);
        inbound.extend(&finish_packet(w));
        let events = p.poll(&mut inbound, &ctx());
        assert_eq!(p.sync_counter, 1);
        assert_eq!(p.checksum_queue.len(), 1);
        assert!(matches!(events[0], PlayerEvent::KeepAlive { checksum: 0xAAAA }));
    }

    #[test]
    fn outgoing_action_ignored_when_pid_is_255() {
        let mut p = Player::new(255, "virtual".into(), 0, 0, 0);
        let mut inbound = InboundBuffer::new();
        let mut w = start_packet(Opcode::OutgoingAction);
        w.write_u32_le(0);
        w.write_bytes(&[1, 2, 3]);
        inbound.extend(&finish_packet(w));
        let events = p.poll(&mut inbound, &ctx());
        assert!(events.is_empty());
    }

    #[test]
    fn pong_discards_samples_le_1_and_during_download() {
        let mut p = player();
        let mut inbound = InboundBuffer::new();
        let mut w = start_packet(Opcode::PongToHost);
        w.write_u32_le(999); // now_ticks(1000) - 999 = 1, discarded
        inbound.extend(&finish_packet(w));
        let events = p.poll(&mut inbound, &ctx());
        assert!(events.is_empty());
        assert!(p.ping_samples.is_empty());

        let mut inbound2 = InboundBuffer::new();
        let mut w2 = start_packet(Opcode::PongToHost);
        w2.write_u32_le(900); // rtt = 100, valid
        inbound2.extend(&finish_packet(w2));
        let mut downloading_ctx = ctx();
        downloading_ctx.any_peer_downloading = true;
        let events2 = p.poll(&mut inbound2, &downloading_ctx);
        assert!(events2.is_empty());
    }

    #[test]
    fn drop_request_only_fires_once() {
        let mut p = player();
        let mut inbound = InboundBuffer::new();
        inbound.extend(&finish_packet(start_packet(Opcode::DropReq)));
        inbound.extend(&finish_packet(start_packet(Opcode::DropReq)));
        let events = p.poll(&mut inbound, &ctx());
        assert_eq!(events.len(), 1);
        assert!(p.drop_vote);
    }

    #[test]
    fn chat_to_host_ignores_spoofed_from_pid() {
        let mut p = Player::new(7, "alice".into(), 0x0100007F, 0, 0);
        let mut inbound = InboundBuffer::new();
        let mut w = start_packet(Opcode::ChatToHost);
        w.write_u8(1); // recipient count
        w.write_u8(1); // recipient pid
        w.write_u8(99); // claimed from_pid, not this connection's pid
        w.write_u8(0x11); // CTH_TEAMCHANGE
        w.write_u8(2);
        inbound.extend(&finish_packet(w));
        let events = p.poll(&mut inbound, &ctx());
        match &events[0] {
            PlayerEvent::Chat { from_pid, .. } => assert_eq!(*from_pid, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn timeout_respects_lag_screen_grace() {
        let mut p = player();
        p.last_recv_ms = 0;
        // 35s quiet but lag screen reset 5s ago: still within grace.
        assert!(!p.is_timed_out(35_000, 30_000));
        // 35s quiet, lag screen reset 40s ago: timed out.
        assert!(p.is_timed_out(35_000, 0));
    }
}
