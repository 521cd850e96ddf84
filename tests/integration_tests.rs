//! Integration tests for the relay server
//!
//! These tests run a real server on loopback ports and drive it with plain
//! TCP, UDP and WebSocket clients.

use futures_util::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::network::{Relay, Server};
use shared::{encode, Frame, Opcode, Player, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

struct Addrs {
    tcp: SocketAddr,
    udp: SocketAddr,
    ws: SocketAddr,
}

async fn start_server(max_players: usize) -> (Addrs, Relay) {
    let config = ServerConfig {
        ip: "127.0.0.1".to_string(),
        tcp_port: 0,
        udp_port: 0,
        ws_port: 0,
        max_players,
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await.expect("bind relay");
    let addrs = Addrs {
        tcp: server.tcp_addr().unwrap(),
        udp: server.udp_addr().unwrap(),
        ws: server.ws_addr().unwrap(),
    };
    let relay = server.relay();
    tokio::spawn(server.run());
    (addrs, relay)
}

struct StreamClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    player_id: String,
}

impl StreamClient {
    /// Connects and waits for the `HOLA` greeting
    async fn join(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = StreamClient {
            lines: BufReader::new(reader).lines(),
            writer,
            player_id: String::new(),
        };
        let hello = client.next_matching(|f| f.opcode() == Opcode::Hello).await;
        client.player_id = hello.payload().to_string();
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Option<Frame> {
        match timeout(WAIT, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Some(Frame::decode(&line)),
            _ => None,
        }
    }

    async fn next_matching(&mut self, predicate: impl Fn(&Frame) -> bool) -> Frame {
        loop {
            let frame = self.next().await.expect("connection produced no matching frame");
            if predicate(&frame) {
                return frame;
            }
        }
    }

    /// Skips everything queued until a fresh `PONG` arrives
    async fn sync(&mut self) -> Vec<Frame> {
        self.send("PING").await;
        let mut skipped = Vec::new();
        loop {
            let frame = self.next().await.expect("no PONG");
            if frame.opcode() == Opcode::Pong {
                return skipped;
            }
            skipped.push(frame);
        }
    }
}

fn roster(frame: &Frame) -> Vec<Player> {
    serde_json::from_str(frame.payload()).unwrap()
}

/// STREAM TRANSPORT TESTS
mod stream_tests {
    use super::*;

    #[tokio::test]
    async fn admission_greeting_sequence() {
        let (addrs, _relay) = start_server(8).await;
        let stream = TcpStream::connect(addrs.tcp).await.unwrap();
        let mut lines = BufReader::new(stream).lines();

        let mut frames = Vec::new();
        for _ in 0..4 {
            let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
            frames.push(Frame::decode(&line));
        }

        assert_eq!(frames[0].opcode(), Opcode::PlayerList);
        let players = roster(&frames[0]);
        assert_eq!(players.len(), 1);
        assert_eq!(frames[1].opcode(), Opcode::Hello);
        assert_eq!(frames[1].payload(), players[0].id);
        assert_eq!(frames[2].raw(), "MAPS");
        assert_eq!(frames[3].raw(), format!("VCHK{}", PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn nickname_announcement_reaches_everyone() {
        let (addrs, _relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;
        let mut c = StreamClient::join(addrs.tcp).await;

        let join_order = vec![
            a.player_id.clone(),
            b.player_id.clone(),
            c.player_id.clone(),
        ];

        c.send("USER Bob").await;

        for client in [&mut a, &mut b, &mut c] {
            let list = client
                .next_matching(|f| {
                    f.opcode() == Opcode::PlayerList
                        && roster(f).iter().any(|p| p.nickname == "Bob")
                })
                .await;
            let players = roster(&list);
            let ids: Vec<String> = players.iter().map(|p| p.id.clone()).collect();
            assert_eq!(ids, join_order);
            assert_eq!(players[2].nickname, "Bob");

            let announcement = client.next().await.unwrap();
            assert_eq!(announcement.raw(), "SMSGBob Just Joined...");
        }
    }

    async fn greeting(addr: SocketAddr) -> Vec<String> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let mut greeting = Vec::new();
        for _ in 0..4 {
            let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
            greeting.push(line);
        }
        greeting
    }

    #[tokio::test]
    async fn map_request_sets_map_for_newcomers() {
        let (addrs, relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;
        b.sync().await;

        a.send("MAPS forest").await;
        let reply = a.next_matching(|f| f.opcode() == Opcode::MapCurrent).await;
        assert_eq!(reply.raw(), "MAPC forest");

        let seen_by_b = b.sync().await;
        assert!(seen_by_b.iter().all(|f| f.opcode() != Opcode::MapCurrent));

        let greeting = greeting(addrs.tcp).await;
        assert_eq!(greeting[2], "MAPC forest");
        assert!(!greeting.contains(&"MAPS".to_string()));

        assert_eq!(relay.heartbeat_info().await.map, " forest");
    }

    #[tokio::test]
    async fn later_map_request_replaces_map() {
        let (addrs, _relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;

        a.send("MAPS forest").await;
        a.next_matching(|f| f.opcode() == Opcode::MapCurrent).await;
        b.send("MAPS desert").await;
        let reply = b.next_matching(|f| f.opcode() == Opcode::MapCurrent).await;
        assert_eq!(reply.raw(), "MAPC desert");

        assert_eq!(greeting(addrs.tcp).await[2], "MAPC desert");
    }

    #[tokio::test]
    async fn vehicle_update_skips_sender() {
        let (addrs, _relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;
        a.sync().await;
        b.sync().await;

        a.send("U-VI{\"jbm\":\"pickup\"}").await;

        let relayed = b.next().await.unwrap();
        assert_eq!(relayed.raw(), "U-VI{\"jbm\":\"pickup\"}");

        // Per-connection ordering: anything relayed to A would precede PONG
        let before_pong = a.sync().await;
        assert!(before_pong.is_empty());
    }

    #[tokio::test]
    async fn chat_and_unknown_reach_sender_too() {
        let (addrs, _relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;
        a.sync().await;
        b.sync().await;

        a.send("CHAThello").await;
        a.send("XYZWopaque").await;

        for client in [&mut a, &mut b] {
            assert_eq!(client.next().await.unwrap().raw(), "CHAThello");
            assert_eq!(client.next().await.unwrap().raw(), "XYZWopaque");
        }
    }

    #[tokio::test]
    async fn disconnect_updates_survivor_roster() {
        let (addrs, relay) = start_server(8).await;
        let a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;
        b.sync().await;
        assert_eq!(relay.player_count().await, 2);

        drop(a);

        let list = b
            .next_matching(|f| f.opcode() == Opcode::PlayerList)
            .await;
        let players = roster(&list);
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, b.player_id);
        assert_eq!(relay.player_count().await, 1);
    }

    #[tokio::test]
    async fn quit_removes_player_immediately() {
        let (addrs, relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        let mut b = StreamClient::join(addrs.tcp).await;
        b.sync().await;

        a.send("QUIT").await;

        let list = b
            .next_matching(|f| f.opcode() == Opcode::PlayerList)
            .await;
        assert_eq!(roster(&list).len(), 1);
        assert_eq!(relay.player_count().await, 1);

        // The server closes its side after quit
        let rest = timeout(WAIT, async {
            while let Ok(Some(_)) = a.lines.next_line().await {}
        })
        .await;
        assert!(rest.is_ok());
    }

    #[tokio::test]
    async fn full_server_refuses_connection() {
        let (addrs, relay) = start_server(1).await;
        let _a = StreamClient::join(addrs.tcp).await;

        let stream = TcpStream::connect(addrs.tcp).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let first = timeout(WAIT, lines.next_line()).await.unwrap();
        assert!(matches!(first, Ok(None) | Err(_)));
        assert_eq!(relay.player_count().await, 1);
    }

    #[tokio::test]
    async fn console_say_reaches_players() {
        let (addrs, relay) = start_server(8).await;
        let mut a = StreamClient::join(addrs.tcp).await;
        a.sync().await;

        relay.say("maintenance in 5").await;

        assert_eq!(a.next().await.unwrap().raw(), "SMSGmaintenance in 5");
    }
}

/// DATAGRAM TRANSPORT TESTS
mod datagram_tests {
    use super::*;

    async fn recv(socket: &UdpSocket, wait: Duration) -> Option<String> {
        let mut buf = [0u8; 2048];
        match timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(String::from_utf8_lossy(&buf[..len]).to_string()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let (addrs, relay) = start_server(8).await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        peer.send_to(encode("PING", "").as_bytes(), addrs.udp).await.unwrap();

        assert_eq!(recv(&peer, WAIT).await.as_deref(), Some("PONG\n"));
        assert_eq!(relay.datagram_peer_count().await, 1);
    }

    #[tokio::test]
    async fn vehicle_updates_flood_other_peers() {
        let (addrs, _relay) = start_server(8).await;
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Register both peers
        b.send_to(b"PING", addrs.udp).await.unwrap();
        assert_eq!(recv(&b, WAIT).await.as_deref(), Some("PONG\n"));
        a.send_to(b"PING", addrs.udp).await.unwrap();
        assert_eq!(recv(&a, WAIT).await.as_deref(), Some("PONG\n"));

        a.send_to(b"U-VP{\"x\":1}\n", addrs.udp).await.unwrap();
        assert_eq!(recv(&b, WAIT).await.as_deref(), Some("U-VP{\"x\":1}\n"));
        assert_eq!(recv(&a, QUIET).await, None);

        a.send_to(b"U-VC{}", addrs.udp).await.unwrap();
        assert_eq!(recv(&a, WAIT).await.as_deref(), Some("U-VC{}\n"));
        assert_eq!(recv(&b, WAIT).await.as_deref(), Some("U-VC{}\n"));
    }

    #[tokio::test]
    async fn datagram_peers_are_not_players() {
        let (addrs, relay) = start_server(8).await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        peer.send_to(b"USER Ghost", addrs.udp).await.unwrap();
        assert_eq!(recv(&peer, WAIT).await.as_deref(), Some("USER Ghost\n"));

        assert_eq!(relay.player_count().await, 0);
        assert_eq!(relay.datagram_peer_count().await, 1);
    }
}

/// WEBSOCKET MIRROR TESTS
mod mirror_tests {
    use super::*;

    #[tokio::test]
    async fn messages_flood_all_subscribers() {
        let (addrs, relay) = start_server(8).await;
        let url = format!("ws://{}", addrs.ws);

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let welcome = timeout(WAIT, first.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(welcome, Message::text("Welcome!"));

        let (mut second, _) = connect_async(url.as_str()).await.unwrap();
        let welcome = timeout(WAIT, second.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(welcome, Message::text("Welcome!"));

        tokio_test::assert_ok!(first.send(Message::text("hi browsers")).await);

        for ws in [&mut first, &mut second] {
            let relayed = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
            assert_eq!(relayed, Message::text("hi browsers"));
        }

        assert_eq!(relay.player_count().await, 0);
    }
}
