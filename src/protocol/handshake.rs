//! Connection-phase packets: server greeting, handshake response, SSL request,
//! auth switch and COM_CHANGE_USER.

use crate::attrs::ConnectAttrs;
use crate::constant::{CapabilityFlags, CommandByte, StatusFlags};
use crate::error::{Error, Result};
use crate::protocol::codec::{
    read_bytes, read_cstring, read_u8, read_u16, read_u32, write_bytes, write_cstring,
    write_lenenc_bytes, write_u8, write_u16, write_u32,
};
use crate::protocol::packet::PacketBuilder;
use crate::protocol::response::parse_err;

/// Initial handshake packet (protocol version 10) sent by the server.
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    /// Protocol version (always 10 for supported servers)
    pub protocol_version: u8,
    /// Human-readable server version, e.g. `8.0.36`
    pub server_version: String,
    /// Connection (thread) id, the target of `KILL QUERY`
    pub connection_id: u32,
    /// Nonce used by the auth plugins (8 + 12 bytes, trailing NUL removed)
    pub auth_plugin_data: Vec<u8>,
    /// Capabilities offered by the server
    pub capability_flags: CapabilityFlags,
    /// Server default collation
    pub charset: u8,
    /// Server status
    pub status_flags: StatusFlags,
    /// Default auth plugin, `None` if the server predates plugin negotiation
    pub auth_plugin_name: Option<String>,
}

impl InitialHandshake {
    /// Parse the greeting payload. An ERR payload (e.g. too many connections) is
    /// returned as `Error::Server`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (protocol_version, data) = read_u8(payload)?;
        if protocol_version == 0xFF {
            return Err(Error::Server(parse_err(payload)?));
        }
        if protocol_version != 10 {
            return Err(Error::Unsupported(format!(
                "handshake protocol version {protocol_version}"
            )));
        }

        let (server_version, data) = read_cstring(data)?;
        let (connection_id, data) = read_u32(data)?;
        let (scramble_1, data) = read_bytes(data, 8)?;
        let (_filler, data) = read_u8(data)?;
        let (caps_lower, data) = read_u16(data)?;

        let mut handshake = Self {
            protocol_version,
            server_version: String::from_utf8_lossy(server_version).into_owned(),
            connection_id,
            auth_plugin_data: scramble_1.to_vec(),
            capability_flags: CapabilityFlags::new(u32::from(caps_lower)),
            charset: 0,
            status_flags: StatusFlags::default(),
            auth_plugin_name: None,
        };

        if data.is_empty() {
            return Ok(handshake);
        }

        let (charset, data) = read_u8(data)?;
        let (status, data) = read_u16(data)?;
        let (caps_upper, data) = read_u16(data)?;
        let (auth_data_len, data) = read_u8(data)?;
        let (_reserved, mut data) = read_bytes(data, 10)?;

        handshake.charset = charset;
        handshake.status_flags = StatusFlags::new(status);
        handshake.capability_flags =
            CapabilityFlags::new(u32::from(caps_lower) | (u32::from(caps_upper) << 16));
        let caps = handshake.capability_flags;

        if caps.has(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let len = usize::from(auth_data_len).saturating_sub(8).max(13);
            let (scramble_2, rest) = read_bytes(data, len.min(data.len()))?;
            let scramble_2 = scramble_2.strip_suffix(&[0]).unwrap_or(scramble_2);
            handshake.auth_plugin_data.extend_from_slice(scramble_2);
            data = rest;
        }

        if caps.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !data.is_empty() {
            // Some servers omit the terminating NUL
            let name = match read_cstring(data) {
                Ok((name, _)) => name,
                Err(_) => data,
            };
            handshake.auth_plugin_name = Some(String::from_utf8_lossy(name).into_owned());
        }

        Ok(handshake)
    }
}

/// Fields of a HandshakeResponse41 packet.
#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    /// Negotiated capabilities
    pub capability_flags: CapabilityFlags,
    /// Max packet size announced to the server
    pub max_packet_size: u32,
    /// Connection collation
    pub charset: u8,
    /// User name
    pub user: &'a str,
    /// Plugin-specific auth response
    pub auth_response: &'a [u8],
    /// Initial database (sent if `CLIENT_CONNECT_WITH_DB`)
    pub database: Option<&'a str>,
    /// Plugin the auth response was computed with
    pub auth_plugin_name: &'a str,
    /// Connection attributes (sent if `CLIENT_CONNECT_ATTRS`)
    pub attrs: Option<&'a ConnectAttrs>,
}

fn write_fixed_header(out: &mut Vec<u8>, caps: CapabilityFlags, max_packet_size: u32, charset: u8) {
    write_u32(out, caps.0);
    write_u32(out, max_packet_size);
    write_u8(out, charset);
    write_bytes(out, &[0u8; 23]);
}

/// Write an SSLRequest packet: the fixed part of the handshake response, no credentials.
pub fn write_ssl_request(
    out: &mut Vec<u8>,
    sequence_id: &mut u8,
    caps: CapabilityFlags,
    max_packet_size: u32,
    charset: u8,
) {
    let mut packet = PacketBuilder::new(out);
    write_fixed_header(packet.buf(), caps, max_packet_size, charset);
    packet.finish(sequence_id);
}

fn write_auth_response(out: &mut Vec<u8>, caps: CapabilityFlags, auth_response: &[u8]) {
    if caps.has(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        write_lenenc_bytes(out, auth_response);
    } else if caps.has(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        write_u8(out, auth_response.len().min(255) as u8);
        write_bytes(out, &auth_response[..auth_response.len().min(255)]);
    } else {
        write_cstring(out, auth_response);
    }
}

/// Write a HandshakeResponse41 packet.
pub fn write_handshake_response(
    out: &mut Vec<u8>,
    sequence_id: &mut u8,
    response: &HandshakeResponse<'_>,
) {
    let caps = response.capability_flags;
    let mut packet = PacketBuilder::new(out);
    let buf = packet.buf();
    write_fixed_header(buf, caps, response.max_packet_size, response.charset);
    write_cstring(buf, response.user.as_bytes());
    write_auth_response(buf, caps, response.auth_response);
    if caps.has(CapabilityFlags::CLIENT_CONNECT_WITH_DB) {
        write_cstring(buf, response.database.unwrap_or_default().as_bytes());
    }
    if caps.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        write_cstring(buf, response.auth_plugin_name.as_bytes());
    }
    if caps.has(CapabilityFlags::CLIENT_CONNECT_ATTRS) {
        if let Some(attrs) = response.attrs {
            attrs.write_to(buf);
        } else {
            write_u8(buf, 0);
        }
    }
    packet.finish(sequence_id);
}

/// Write a COM_CHANGE_USER packet.
pub fn write_change_user(
    out: &mut Vec<u8>,
    sequence_id: &mut u8,
    response: &HandshakeResponse<'_>,
) {
    let caps = response.capability_flags;
    let mut packet = PacketBuilder::new(out);
    let buf = packet.buf();
    write_u8(buf, CommandByte::ChangeUser as u8);
    write_cstring(buf, response.user.as_bytes());
    if caps.has(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        write_u8(buf, response.auth_response.len().min(255) as u8);
        write_bytes(buf, &response.auth_response[..response.auth_response.len().min(255)]);
    } else {
        write_cstring(buf, response.auth_response);
    }
    write_cstring(buf, response.database.unwrap_or_default().as_bytes());
    if caps.has(CapabilityFlags::CLIENT_PROTOCOL_41) {
        write_u16(buf, u16::from(response.charset));
    }
    if caps.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        write_cstring(buf, response.auth_plugin_name.as_bytes());
    }
    if caps.has(CapabilityFlags::CLIENT_CONNECT_ATTRS) {
        if let Some(attrs) = response.attrs {
            attrs.write_to(buf);
        } else {
            write_u8(buf, 0);
        }
    }
    packet.finish(sequence_id);
}

/// Write a bare auth-data packet (reply to auth switch / more data).
pub fn write_auth_data(out: &mut Vec<u8>, sequence_id: &mut u8, data: &[u8]) {
    let mut packet = PacketBuilder::new(out);
    write_bytes(packet.buf(), data);
    packet.finish(sequence_id);
}

/// Auth switch request (0xFE) sent by the server during authentication.
#[derive(Debug, Clone, Copy)]
pub struct AuthSwitchRequest<'a> {
    /// Plugin the client must switch to
    pub plugin_name: &'a str,
    /// New nonce for that plugin
    pub plugin_data: &'a [u8],
}

impl<'a> AuthSwitchRequest<'a> {
    /// Parse an auth switch payload (including the 0xFE status byte).
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (status, data) = read_u8(payload)?;
        if status != 0xFE {
            return Err(Error::Protocol(format!(
                "expected auth switch request, got {status:#04x}"
            )));
        }
        let (name, data) = read_cstring(data)?;
        let plugin_name = simdutf8::compat::from_utf8(name)
            .map_err(|e| Error::Protocol(format!("auth plugin name: invalid UTF-8: {e}")))?;
        let plugin_data = data.strip_suffix(&[0]).unwrap_or(data);
        Ok(Self {
            plugin_name,
            plugin_data,
        })
    }
}

/// Auth more data (0x01): plugin-specific payload.
pub fn parse_auth_more_data(payload: &[u8]) -> Result<&[u8]> {
    match payload.split_first() {
        Some((&0x01, data)) => Ok(data),
        _ => Err(Error::Protocol("expected auth more data packet".into())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a greeting payload the way a MySQL 8 server does.
    pub(crate) fn greeting(caps: u32, plugin: Option<&str>) -> Vec<u8> {
        let mut out = vec![10];
        out.extend_from_slice(b"8.0.36\0");
        out.extend_from_slice(&42u32.to_le_bytes());
        out.extend_from_slice(b"abcdefgh");
        out.push(0);
        out.extend_from_slice(&(caps as u16).to_le_bytes());
        out.push(45);
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        out.push(21);
        out.extend_from_slice(&[0; 10]);
        out.extend_from_slice(b"ijklmnopqrst\0");
        if let Some(plugin) = plugin {
            out.extend_from_slice(plugin.as_bytes());
            out.push(0);
        }
        out
    }

    #[test]
    fn test_parse_greeting() {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH;
        let handshake =
            InitialHandshake::parse(&greeting(caps, Some("caching_sha2_password"))).unwrap();
        assert_eq!(handshake.server_version, "8.0.36");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(handshake.auth_plugin_data, b"abcdefghijklmnopqrst");
        assert_eq!(handshake.capability_flags.0, caps);
        assert_eq!(
            handshake.auth_plugin_name.as_deref(),
            Some("caching_sha2_password")
        );
    }

    #[test]
    fn test_parse_greeting_without_plugin_auth() {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SECURE_CONNECTION;
        let handshake = InitialHandshake::parse(&greeting(caps, None)).unwrap();
        assert!(handshake.auth_plugin_name.is_none());
        assert_eq!(handshake.auth_plugin_data.len(), 20);
    }

    #[test]
    fn test_greeting_error_packet() {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&1040u16.to_le_bytes());
        payload.extend_from_slice(b"Too many connections");
        let err = InitialHandshake::parse(&payload).unwrap_err();
        assert_eq!(err.server_error().map(|e| e.code), Some(1040));
    }

    #[test]
    fn test_handshake_response_layout() {
        let caps = CapabilityFlags::new(
            CapabilityFlags::CLIENT_PROTOCOL_41
                | CapabilityFlags::CLIENT_SECURE_CONNECTION
                | CapabilityFlags::CLIENT_PLUGIN_AUTH
                | CapabilityFlags::CLIENT_CONNECT_WITH_DB,
        );
        let mut out = Vec::new();
        let mut seq = 1;
        write_handshake_response(
            &mut out,
            &mut seq,
            &HandshakeResponse {
                capability_flags: caps,
                max_packet_size: 1 << 24,
                charset: 45,
                user: "root",
                auth_response: &[1, 2, 3],
                database: Some("db"),
                auth_plugin_name: "mysql_native_password",
                attrs: None,
            },
        );
        assert_eq!(seq, 2);
        assert_eq!(out[3], 1);
        let payload = &out[4..];
        assert_eq!(&payload[..4], &caps.0.to_le_bytes());
        assert_eq!(payload[8], 45);
        assert_eq!(&payload[32..37], b"root\0");
        assert_eq!(&payload[37..41], &[3, 1, 2, 3]);
        assert_eq!(&payload[41..44], b"db\0");
        assert_eq!(&payload[44..], b"mysql_native_password\0");
    }

    #[test]
    fn test_ssl_request_has_no_credentials() {
        let mut out = Vec::new();
        let mut seq = 1;
        write_ssl_request(
            &mut out,
            &mut seq,
            CapabilityFlags::new(CapabilityFlags::CLIENT_SSL),
            1 << 24,
            45,
        );
        assert_eq!(out.len(), 4 + 32);
    }

    #[test]
    fn test_auth_switch() {
        let switch =
            AuthSwitchRequest::parse(b"\xFEmysql_native_password\0abcdefghijklmnopqrst\0").unwrap();
        assert_eq!(switch.plugin_name, "mysql_native_password");
        assert_eq!(switch.plugin_data, b"abcdefghijklmnopqrst");
    }
}
