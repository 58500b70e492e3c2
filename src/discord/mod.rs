use serde::{Serialize, Serializer};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_FRAME_LEN: u32 = 1 << 20;
const SOCKET_SLOTS: u32 = 10;

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("no Discord IPC socket found")]
    NotRunning,
    #[error("Discord IPC I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Discord IPC payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(u32),
    #[error("Discord closed the connection: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<u32> for Opcode {
    type Error = DiscordError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(DiscordError::UnknownOpcode(other)),
        }
    }
}

/// Write one frame: opcode and payload length as little-endian `u32`, then the payload.
pub fn write_frame<W: Write>(writer: &mut W, op: Opcode, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&(op as u32).to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf)?;
    writer.flush()
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<(Opcode, Vec<u8>), DiscordError> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;

    let op = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let op = Opcode::try_from(op)?;
    if len > MAX_FRAME_LEN {
        return Err(DiscordError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok((op, payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ActivityType {
    #[default]
    Game = 0,
    Streaming = 1,
    Listening = 2,
    Custom = 4,
}

impl Serialize for ActivityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Assets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Party {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Secrets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectate: Option<String>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Secrets>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<bool>,
}

#[derive(Serialize)]
struct ActivityArgs<'a> {
    pid: u32,
    activity: Option<&'a Activity>,
}

#[derive(Serialize)]
struct Command<'a> {
    cmd: &'static str,
    args: ActivityArgs<'a>,
    nonce: String,
}

/// Directories Discord may place its IPC sockets in.
pub fn socket_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(PathBuf::from)
        .collect();
    dirs.push(PathBuf::from("/tmp"));
    dirs.dedup();
    dirs
}

pub fn candidate_paths(dirs: &[PathBuf]) -> Vec<PathBuf> {
    dirs.iter()
        .flat_map(|dir| (0..SOCKET_SLOTS).map(move |i| dir.join(format!("discord-ipc-{i}"))))
        .collect()
}

/// A handshaken connection to the local Discord client.
pub struct DiscordRpc<S: Read + Write> {
    stream: S,
}

impl DiscordRpc<interprocess::local_socket::Stream> {
    /// Connect to the first reachable socket and handshake.
    pub fn connect(client_id: &str) -> Result<Self, DiscordError> {
        use interprocess::local_socket::GenericFilePath;
        use interprocess::local_socket::prelude::*;

        for path in candidate_paths(&socket_dirs()) {
            if !path.exists() {
                continue;
            }
            let Ok(name) = path.as_os_str().to_fs_name::<GenericFilePath>() else {
                continue;
            };
            match interprocess::local_socket::Stream::connect(name) {
                Ok(stream) => {
                    info!("Connected to Discord at {}", path.display());
                    return Self::handshake(stream, client_id);
                }
                Err(e) => debug!("Could not connect to {}: {e}", path.display()),
            }
        }

        Err(DiscordError::NotRunning)
    }
}

impl<S: Read + Write> DiscordRpc<S> {
    pub fn handshake(mut stream: S, client_id: &str) -> Result<Self, DiscordError> {
        let payload = serde_json::json!({ "v": 1, "client_id": client_id });
        write_frame(&mut stream, Opcode::Handshake, &serde_json::to_vec(&payload)?)?;

        let mut rpc = Self { stream };
        rpc.read_reply()?;
        Ok(rpc)
    }

    pub fn set_activity(&mut self, activity: &Activity) -> Result<(), DiscordError> {
        self.send_activity(Some(activity))
    }

    pub fn clear_activity(&mut self) -> Result<(), DiscordError> {
        self.send_activity(None)
    }

    fn send_activity(&mut self, activity: Option<&Activity>) -> Result<(), DiscordError> {
        let command = Command {
            cmd: "SET_ACTIVITY",
            args: ActivityArgs {
                pid: std::process::id(),
                activity,
            },
            nonce: Uuid::new_v4().to_string(),
        };
        write_frame(
            &mut self.stream,
            Opcode::Frame,
            &serde_json::to_vec(&command)?,
        )?;
        self.read_reply()
    }

    /// Read until a non-ping frame arrives, answering pings on the way.
    fn read_reply(&mut self) -> Result<(), DiscordError> {
        loop {
            let (op, payload) = read_frame(&mut self.stream)?;
            match op {
                Opcode::Ping => write_frame(&mut self.stream, Opcode::Pong, &payload)?,
                Opcode::Close => {
                    return Err(DiscordError::Closed(
                        String::from_utf8_lossy(&payload).into_owned(),
                    ));
                }
                _ => {
                    debug!("Discord replied: {}", String::from_utf8_lossy(&payload));
                    return Ok(());
                }
            }
        }
    }

    pub fn close(mut self) -> Result<(), DiscordError> {
        write_frame(&mut self.stream, Opcode::Close, b"{}")?;
        Ok(())
    }
}
