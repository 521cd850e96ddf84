//! Wire types shared by the relay server and its clients
//!
//! Every message on every transport is one text frame: a four character
//! opcode, an opaque payload and a single newline terminator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

pub const OPCODE_LEN: usize = 4;
pub const PROTOCOL_VERSION: &str = "0.0.4";
pub const PLACEHOLDER_NICKNAME: &str = "New User, Loading...";
pub const NO_VEHICLE: &str = "0";
pub const DEFAULT_TCP_PORT: u16 = 30813;
pub const JOIN_SUFFIX: &str = " Just Joined...";
/// Longest stream frame accepted, terminator included
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Vehicle state opcodes relayed to everyone except the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleUpdate {
    Info,
    Edit,
    New,
    Position,
    Livery,
    Reset,
}

impl VehicleUpdate {
    pub const ALL: [VehicleUpdate; 6] = [
        VehicleUpdate::Info,
        VehicleUpdate::Edit,
        VehicleUpdate::New,
        VehicleUpdate::Position,
        VehicleUpdate::Livery,
        VehicleUpdate::Reset,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            VehicleUpdate::Info => "U-VI",
            VehicleUpdate::Edit => "U-VE",
            VehicleUpdate::New => "U-VN",
            VehicleUpdate::Position => "U-VP",
            VehicleUpdate::Livery => "U-VL",
            VehicleUpdate::Reset => "U-VR",
        }
    }
}

/// Operation code carried in the first four characters of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Ping,
    Pong,
    Chat,
    MapRequest,
    MapCurrent,
    User,
    PlayerList,
    ServerMessage,
    Quit,
    QuitCode,
    Hello,
    VersionCheck,
    Environment,
    SetEnvironment,
    VehicleUpdate(VehicleUpdate),
    VehicleChange,
    NewVehicle,
    VehicleSelect,
    Unknown,
}

impl Opcode {
    /// Exact, case-sensitive match against the protocol token list
    pub fn parse(code: &str) -> Self {
        match code {
            "PING" => Opcode::Ping,
            "PONG" => Opcode::Pong,
            "CHAT" => Opcode::Chat,
            "MAPS" => Opcode::MapRequest,
            "MAPC" => Opcode::MapCurrent,
            "USER" => Opcode::User,
            "PLST" => Opcode::PlayerList,
            "SMSG" => Opcode::ServerMessage,
            "QUIT" => Opcode::Quit,
            "2001" => Opcode::QuitCode,
            "HOLA" => Opcode::Hello,
            "VCHK" => Opcode::VersionCheck,
            "ENVT" => Opcode::Environment,
            "SENV" => Opcode::SetEnvironment,
            "U-VC" => Opcode::VehicleChange,
            "U-NV" => Opcode::NewVehicle,
            "C-VS" => Opcode::VehicleSelect,
            other => VehicleUpdate::ALL
                .iter()
                .find(|kind| kind.token() == other)
                .map(|kind| Opcode::VehicleUpdate(*kind))
                .unwrap_or(Opcode::Unknown),
        }
    }

    /// Wire token for this opcode, `None` for unrecognized codes
    pub fn token(&self) -> Option<&'static str> {
        let token = match self {
            Opcode::Ping => "PING",
            Opcode::Pong => "PONG",
            Opcode::Chat => "CHAT",
            Opcode::MapRequest => "MAPS",
            Opcode::MapCurrent => "MAPC",
            Opcode::User => "USER",
            Opcode::PlayerList => "PLST",
            Opcode::ServerMessage => "SMSG",
            Opcode::Quit => "QUIT",
            Opcode::QuitCode => "2001",
            Opcode::Hello => "HOLA",
            Opcode::VersionCheck => "VCHK",
            Opcode::Environment => "ENVT",
            Opcode::SetEnvironment => "SENV",
            Opcode::VehicleUpdate(kind) => kind.token(),
            Opcode::VehicleChange => "U-VC",
            Opcode::NewVehicle => "U-NV",
            Opcode::VehicleSelect => "C-VS",
            Opcode::Unknown => return None,
        };
        Some(token)
    }
}

/// A single text frame: four character code followed by an opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    code: String,
    payload: String,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<String>) -> Self {
        Self {
            code: opcode.token().unwrap_or_default().to_string(),
            payload: payload.into(),
        }
    }

    /// Splits a raw frame into code and payload.
    ///
    /// A trailing line terminator is dropped. Frames shorter than the code
    /// length become an unrecognized code holding the whole text and an
    /// empty payload. Splitting is done on character boundaries so
    /// multi-byte input never panics.
    pub fn decode(raw: &str) -> Self {
        let text = raw.trim_end_matches(['\r', '\n']);

        match text.char_indices().nth(OPCODE_LEN) {
            Some((split, _)) => Self {
                code: text[..split].to_string(),
                payload: text[split..].to_string(),
            },
            None => Self {
                code: text.to_string(),
                payload: String::new(),
            },
        }
    }

    pub fn opcode(&self) -> Opcode {
        if self.code.chars().count() < OPCODE_LEN {
            return Opcode::Unknown;
        }
        Opcode::parse(&self.code)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Code and payload as received, without terminator
    pub fn raw(&self) -> String {
        format!("{}{}", self.code, self.payload)
    }

    /// Serializes to exactly one newline-terminated frame
    pub fn encode(&self) -> String {
        encode(&self.code, &self.payload)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.code, self.payload)
    }
}

pub fn encode(code: &str, payload: &str) -> String {
    let mut frame = String::with_capacity(code.len() + payload.len() + 1);
    frame.push_str(code);
    frame.push_str(payload);
    frame.push('\n');
    frame
}

/// Roster entry as clients receive it inside `PLST`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub remote_address: IpAddr,
    pub remote_port: u16,
    pub nickname: String,
    pub id: String,
    #[serde(rename = "currentVehID")]
    pub current_veh_id: String,
}

impl Player {
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            remote_address: addr.ip(),
            remote_port: addr.port(),
            nickname: PLACEHOLDER_NICKNAME.to_string(),
            id: id.into(),
            current_veh_id: NO_VEHICLE.to_string(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_address, self.remote_port)
    }

    /// True when this player is bound to the connection at `addr`
    pub fn is_at(&self, addr: &SocketAddr) -> bool {
        same_endpoint(&self.addr(), addr)
    }
}

/// The exclusion test used for sender-excluded relays.
///
/// A recipient is skipped only when both its address and its port equal the
/// sender's. Same address on another port, or another address on the same
/// port, still receives the message.
pub fn same_endpoint(sender: &SocketAddr, recipient: &SocketAddr) -> bool {
    sender.ip() == recipient.ip() && sender.port() == recipient.port()
}

/// Builds the `PLST<json>` roster frame
pub fn player_list_frame(players: &[Player]) -> serde_json::Result<String> {
    let list = serde_json::to_string(players)?;
    Ok(encode("PLST", &list))
}
