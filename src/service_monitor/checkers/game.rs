//! Game server queries: Source A2S_INFO over UDP and Minecraft Server List Ping over TCP.
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};

use super::{host_port, require, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::{GameConfig, HostPortConfig};

const DEFAULT_SOURCE_PORT: u16 = 27015;
const DEFAULT_MINECRAFT_PORT: u16 = 25565;

const A2S_INFO_REQUEST: &[u8] = b"\xFF\xFF\xFF\xFFTSource Engine Query\0";
const A2S_CHALLENGE: u8 = 0x41;
const A2S_INFO_REPLY: u8 = 0x49;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
}

impl ServerInfo {
    fn summary(&self) -> String {
        if self.map.is_empty() {
            format!("{} ({}/{} players)", self.name, self.players, self.max_players)
        } else {
            format!(
                "{} on {} ({}/{} players)",
                self.name, self.map, self.players, self.max_players
            )
        }
    }
}

pub async fn check_steam(config: &HostPortConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    let port = config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_SOURCE_PORT);
    let info = with_timeout(timeout, query_source(hostname, port)).await?;
    Ok(ProbeOutcome::up(info.summary()))
}

pub async fn check_gamedig(config: &GameConfig, timeout: Duration) -> ProbeResult {
    let game = require(&config.game, "Game")?.to_lowercase();
    let hostname = require(&config.hostname, "Hostname")?;
    let info = if game == "minecraft" {
        let port = config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_MINECRAFT_PORT);
        with_timeout(timeout, query_minecraft(hostname, port)).await?
    } else {
        let port = config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_SOURCE_PORT);
        with_timeout(timeout, query_source(hostname, port)).await?
    };
    Ok(ProbeOutcome::up(info.summary()))
}

async fn query_source(hostname: &str, port: u16) -> Result<ServerInfo, CheckError> {
    let target = lookup_host(host_port(hostname, port))
        .await
        .map_err(|e| CheckError::Probe(format!("Failed to resolve {hostname}: {e}")))?
        .next()
        .ok_or_else(|| CheckError::Probe(format!("No addresses found for {hostname}")))?;
    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await.map_err(CheckError::probe)?;
    socket.connect(target).await.map_err(CheckError::probe)?;

    let mut request = A2S_INFO_REQUEST.to_vec();
    let mut buffer = vec![0u8; 1400];
    // one challenge round trip at most
    for _ in 0..2 {
        socket.send(&request).await.map_err(CheckError::probe)?;
        let read = socket.recv(&mut buffer).await.map_err(CheckError::probe)?;
        let reply = &buffer[..read];
        if reply.len() < 5 || reply[..4] != [0xFF; 4] {
            return Err(CheckError::Probe("Malformed A2S reply".to_string()));
        }
        match reply[4] {
            A2S_CHALLENGE if reply.len() >= 9 => {
                request = A2S_INFO_REQUEST.to_vec();
                request.extend_from_slice(&reply[5..9]);
            }
            A2S_INFO_REPLY => return parse_a2s_info(&reply[5..]),
            other => {
                return Err(CheckError::Probe(format!(
                    "Unexpected A2S reply type 0x{other:02X}"
                )))
            }
        }
    }
    Err(CheckError::Probe("Server kept answering with challenges".to_string()))
}

struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, CheckError> {
        let value = *self
            .data
            .get(self.position)
            .ok_or_else(|| CheckError::Probe("Truncated A2S_INFO reply".to_string()))?;
        self.position += 1;
        Ok(value)
    }

    fn c_string(&mut self) -> Result<String, CheckError> {
        let rest = &self.data[self.position.min(self.data.len())..];
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| CheckError::Probe("Truncated A2S_INFO reply".to_string()))?;
        self.position += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).to_string())
    }
}

/// Parses the A2S_INFO payload that follows the `0x49` header byte.
pub fn parse_a2s_info(payload: &[u8]) -> Result<ServerInfo, CheckError> {
    let mut cursor = Cursor {
        data: payload,
        position: 0,
    };
    let _protocol = cursor.byte()?;
    let name = cursor.c_string()?;
    let map = cursor.c_string()?;
    let _folder = cursor.c_string()?;
    let _game = cursor.c_string()?;
    let _app_id = [cursor.byte()?, cursor.byte()?];
    let players = cursor.byte()? as u32;
    let max_players = cursor.byte()? as u32;
    Ok(ServerInfo {
        name,
        map,
        players,
        max_players,
    })
}

fn write_varint(buffer: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buffer.push(value as u8);
            return;
        }
        buffer.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

async fn read_varint(stream: &mut TcpStream) -> Result<i32, CheckError> {
    let mut result: u32 = 0;
    for shift in 0..5 {
        let byte = stream.read_u8().await.map_err(CheckError::probe)?;
        result |= ((byte & 0x7F) as u32) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(CheckError::Probe("VarInt too long".to_string()))
}

fn minecraft_handshake(hostname: &str, port: u16) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, 0x00);
    write_varint(&mut body, -1); // protocol version, -1 when only pinging
    write_varint(&mut body, hostname.len() as i32);
    body.extend_from_slice(hostname.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, 1); // next state: status

    let mut packet = Vec::with_capacity(body.len() + 5);
    write_varint(&mut packet, body.len() as i32);
    packet.extend_from_slice(&body);
    // status request: length 1, packet id 0
    packet.extend_from_slice(&[0x01, 0x00]);
    packet
}

async fn query_minecraft(hostname: &str, port: u16) -> Result<ServerInfo, CheckError> {
    let mut stream = TcpStream::connect(host_port(hostname, port))
        .await
        .map_err(|e| CheckError::Probe(format!("Connection failed: {e}")))?;
    stream
        .write_all(&minecraft_handshake(hostname, port))
        .await
        .map_err(CheckError::probe)?;

    let _packet_length = read_varint(&mut stream).await?;
    let packet_id = read_varint(&mut stream).await?;
    if packet_id != 0x00 {
        return Err(CheckError::Probe(format!(
            "Unexpected status packet id {packet_id}"
        )));
    }
    let json_length = read_varint(&mut stream).await?;
    if !(0..=1 << 20).contains(&json_length) {
        return Err(CheckError::Probe("Invalid status payload length".to_string()));
    }
    let mut payload = vec![0u8; json_length as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(CheckError::probe)?;

    let status: Value = serde_json::from_slice(&payload)
        .map_err(|e| CheckError::Probe(format!("Invalid status JSON: {e}")))?;
    Ok(parse_minecraft_status(&status))
}

fn parse_minecraft_status(status: &Value) -> ServerInfo {
    let name = match &status["description"] {
        Value::String(text) => text.clone(),
        Value::Object(description) => description
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    };
    ServerInfo {
        name: if name.trim().is_empty() {
            "Minecraft server".to_string()
        } else {
            name.trim().to_string()
        },
        map: status["version"]["name"].as_str().unwrap_or_default().to_string(),
        players: status["players"]["online"].as_u64().unwrap_or(0) as u32,
        max_players: status["players"]["max"].as_u64().unwrap_or(0) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn a2s_payload() -> Vec<u8> {
        let mut payload = vec![17u8];
        for field in ["My Server", "de_dust2", "csgo", "Counter-Strike"] {
            payload.extend_from_slice(field.as_bytes());
            payload.push(0);
        }
        payload.extend_from_slice(&[0xDA, 0x02, 12, 24, 0]);
        payload
    }

    #[test]
    fn test_parse_a2s_info() {
        let info = parse_a2s_info(&a2s_payload()).unwrap();
        assert_eq!(info.name, "My Server");
        assert_eq!(info.map, "de_dust2");
        assert_eq!(info.players, 12);
        assert_eq!(info.max_players, 24);
        assert_eq!(info.summary(), "My Server on de_dust2 (12/24 players)");

        assert!(parse_a2s_info(&a2s_payload()[..8]).is_err());
    }

    #[test]
    fn test_varint_encoding() {
        let mut buffer = Vec::new();
        write_varint(&mut buffer, 300);
        assert_eq!(buffer, vec![0xAC, 0x02]);

        buffer.clear();
        write_varint(&mut buffer, -1);
        assert_eq!(buffer, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_parse_minecraft_status() {
        let status = json!({
            "version": { "name": "1.20.4", "protocol": 765 },
            "players": { "max": 20, "online": 3 },
            "description": { "text": "A Minecraft Server" }
        });
        let info = parse_minecraft_status(&status);
        assert_eq!(info.name, "A Minecraft Server");
        assert_eq!(info.players, 3);
        assert_eq!(info.max_players, 20);
    }

    #[tokio::test]
    async fn test_steam_query_with_challenge() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buffer = [0u8; 1400];
            let (_, peer) = server.recv_from(&mut buffer).await.unwrap();
            server
                .send_to(&[0xFF, 0xFF, 0xFF, 0xFF, A2S_CHALLENGE, 1, 2, 3, 4], peer)
                .await
                .unwrap();
            let (read, peer) = server.recv_from(&mut buffer).await.unwrap();
            assert_eq!(&buffer[read - 4..read], &[1, 2, 3, 4]);
            let mut reply = vec![0xFF, 0xFF, 0xFF, 0xFF, A2S_INFO_REPLY];
            reply.extend_from_slice(&a2s_payload());
            server.send_to(&reply, peer).await.unwrap();
        });

        let config = HostPortConfig {
            hostname: "127.0.0.1".to_string(),
            port: Some(port),
        };
        let outcome = check_steam(&config, Duration::from_secs(2)).await.unwrap();
        assert!(outcome.up);
        assert!(outcome.message.starts_with("My Server"));
    }
}
