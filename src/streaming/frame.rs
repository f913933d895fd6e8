//! WebSocket frame codec (RFC 6455 subset: no extensions, no
//! negotiated subprotocols).
//!
//! The codec works over any blocking `Read`/`Write` pair, which under the
//! `may` runtime means coroutine-aware sockets: a blocked read parks the
//! coroutine, not the OS thread. Server-to-client frames are never masked;
//! client-to-server frames must be.

use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::StreamError;

/// Largest single frame accepted from a peer.
pub const MAX_FRAME_SIZE: usize = 1 << 20;
/// Largest reassembled message accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 4 << 20;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Close codes used by the engine.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Server going away (shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Internal error (protocol violation, missed pong).
    pub const INTERNAL: u16 = 1011;
    /// Overloaded: the peer consumed too slowly.
    pub const OVERLOADED: u16 = 1013;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_u8(byte: u8) -> Result<Self, StreamError> {
        match byte & 0x0F {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(StreamError::Protocol(format!("unknown opcode {other:#x}"))),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single decoded frame.
#[derive(Debug, Clone)]
struct Frame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

/// A complete inbound message, control frames included.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<u16>, Option<String>),
}

/// Compute the `Sec-WebSocket-Accept` value for a client key
/// (RFC 6455 §4.2.2).
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validate an upgrade request (RFC 6455 §4.2.1) and return the client
/// key. Header names are expected lowercased.
pub fn validate_upgrade(
    method: &http::Method,
    headers: &HashMap<String, String>,
) -> Result<String, StreamError> {
    if method != http::Method::GET {
        return Err(StreamError::Handshake(
            "upgrade requires the GET method".to_string(),
        ));
    }

    let token_listed = |header: &str, token: &str| {
        headers
            .get(header)
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    };

    if !token_listed("upgrade", "websocket") {
        return Err(StreamError::Handshake(
            "missing Upgrade: websocket header".to_string(),
        ));
    }
    if !token_listed("connection", "upgrade") {
        return Err(StreamError::Handshake(
            "missing Connection: upgrade header".to_string(),
        ));
    }
    match headers.get("sec-websocket-version").map(|v| v.trim()) {
        Some("13") => {}
        other => {
            return Err(StreamError::Handshake(format!(
                "unsupported websocket version {other:?}"
            )))
        }
    }

    let key = headers
        .get("sec-websocket-key")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StreamError::Handshake("missing Sec-WebSocket-Key header".to_string()))?;

    match general_purpose::STANDARD.decode(&key) {
        Ok(decoded) if decoded.len() == 16 => Ok(key),
        _ => Err(StreamError::Handshake(
            "Sec-WebSocket-Key must be 16 base64-encoded bytes".to_string(),
        )),
    }
}

/// Build the `101 Switching Protocols` response head.
pub fn accept_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), StreamError> {
    reader.read_exact(buf).map_err(StreamError::Io)
}

/// Read one frame. Client frames must be masked; control frames must be
/// unfragmented and ≤ 125 bytes.
fn read_frame(reader: &mut impl Read) -> Result<Frame, StreamError> {
    let mut header = [0u8; 2];
    read_exact(reader, &mut header)?;

    let fin = (header[0] & 0x80) != 0;
    if (header[0] >> 4) & 0x07 != 0 {
        return Err(StreamError::Protocol(
            "reserved bits set without negotiated extension".to_string(),
        ));
    }
    let opcode = Opcode::from_u8(header[0])?;
    let masked = (header[1] & 0x80) != 0;
    if !masked {
        return Err(StreamError::Protocol(
            "client frames must be masked".to_string(),
        ));
    }

    let payload_len = match header[1] & 0x7F {
        n @ 0..=125 => n as usize,
        126 => {
            let mut len = [0u8; 2];
            read_exact(reader, &mut len)?;
            u16::from_be_bytes(len) as usize
        }
        _ => {
            let mut len = [0u8; 8];
            read_exact(reader, &mut len)?;
            let len = u64::from_be_bytes(len);
            usize::try_from(len).map_err(|_| StreamError::TooLarge {
                size: usize::MAX,
                limit: MAX_FRAME_SIZE,
            })?
        }
    };

    if opcode.is_control() {
        if !fin {
            return Err(StreamError::Protocol(
                "control frames must not be fragmented".to_string(),
            ));
        }
        if payload_len > 125 {
            return Err(StreamError::Protocol(
                "control frame payload exceeds 125 bytes".to_string(),
            ));
        }
    }
    if payload_len > MAX_FRAME_SIZE {
        return Err(StreamError::TooLarge {
            size: payload_len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut mask = [0u8; 4];
    read_exact(reader, &mut mask)?;

    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        read_exact(reader, &mut payload)?;
    }
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Write one frame. Pass a mask key to produce client-side frames (used by
/// test harnesses); the server always writes unmasked.
pub fn write_frame(
    writer: &mut impl Write,
    fin: bool,
    opcode_byte: u8,
    payload: &[u8],
    mask: Option<[u8; 4]>,
) -> Result<(), StreamError> {
    let mut header = Vec::with_capacity(14);
    header.push(if fin { 0x80 } else { 0x00 } | (opcode_byte & 0x0F));

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len < 126 {
        header.push(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        header.push(mask_bit | 126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(mask_bit | 127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    writer.write_all(&header)?;
    match mask {
        Some(key) => {
            writer.write_all(&key)?;
            let mut masked = payload.to_vec();
            for (i, byte) in masked.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
            writer.write_all(&masked)?;
        }
        None => writer.write_all(payload)?,
    }
    writer.flush()?;
    Ok(())
}

pub fn write_text(writer: &mut impl Write, text: &str) -> Result<(), StreamError> {
    write_frame(writer, true, Opcode::Text.to_u8(), text.as_bytes(), None)
}

pub fn write_ping(writer: &mut impl Write, payload: &[u8]) -> Result<(), StreamError> {
    write_frame(writer, true, Opcode::Ping.to_u8(), payload, None)
}

pub fn write_pong(writer: &mut impl Write, payload: &[u8]) -> Result<(), StreamError> {
    write_frame(writer, true, Opcode::Pong.to_u8(), payload, None)
}

pub fn write_close(writer: &mut impl Write, code: u16, reason: &str) -> Result<(), StreamError> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    write_frame(writer, true, Opcode::Close.to_u8(), &payload, None)
}

/// Client-side text frame with masking; test harness helper.
pub fn write_text_masked(
    writer: &mut impl Write,
    text: &str,
    mask: [u8; 4],
) -> Result<(), StreamError> {
    write_frame(writer, true, Opcode::Text.to_u8(), text.as_bytes(), Some(mask))
}

fn parse_close_payload(payload: &[u8]) -> Result<(Option<u16>, Option<String>), StreamError> {
    match payload.len() {
        0 => Ok((None, None)),
        1 => Err(StreamError::Protocol(
            "close payload must be empty or at least 2 bytes".to_string(),
        )),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = if payload.len() > 2 {
                Some(String::from_utf8_lossy(&payload[2..]).into_owned())
            } else {
                None
            };
            Ok((Some(code), reason))
        }
    }
}

/// Inbound message assembler.
///
/// Control frames are surfaced immediately so the caller can answer pings
/// and track pongs; fragmented data frames accumulate across calls until a
/// FIN arrives.
#[derive(Default)]
pub struct MessageReader {
    partial: Option<(Opcode, Vec<u8>)>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until one complete message (or control frame) is available.
    pub fn next(&mut self, reader: &mut impl Read) -> Result<WsMessage, StreamError> {
        loop {
            let frame = read_frame(reader)?;

            if frame.opcode.is_control() {
                return match frame.opcode {
                    Opcode::Ping => Ok(WsMessage::Ping(frame.payload)),
                    Opcode::Pong => Ok(WsMessage::Pong(frame.payload)),
                    Opcode::Close => {
                        let (code, reason) = parse_close_payload(&frame.payload)?;
                        Ok(WsMessage::Close(code, reason))
                    }
                    _ => unreachable!("is_control covers close/ping/pong"),
                };
            }

            match (frame.opcode, &mut self.partial) {
                (Opcode::Continuation, None) => {
                    return Err(StreamError::Protocol(
                        "continuation frame without an initial frame".to_string(),
                    ));
                }
                (Opcode::Continuation, Some((_, buffer))) => {
                    if buffer.len() + frame.payload.len() > MAX_MESSAGE_SIZE {
                        return Err(StreamError::TooLarge {
                            size: buffer.len() + frame.payload.len(),
                            limit: MAX_MESSAGE_SIZE,
                        });
                    }
                    buffer.extend_from_slice(&frame.payload);
                }
                (opcode, Some(_)) => {
                    return Err(StreamError::Protocol(format!(
                        "new {opcode:?} frame while a fragmented message is incomplete"
                    )));
                }
                (opcode, slot @ None) => {
                    if frame.payload.len() > MAX_MESSAGE_SIZE {
                        return Err(StreamError::TooLarge {
                            size: frame.payload.len(),
                            limit: MAX_MESSAGE_SIZE,
                        });
                    }
                    *slot = Some((opcode, frame.payload));
                }
            }

            if frame.fin {
                let (opcode, data) = self.partial.take().expect("fin with buffered fragment");
                return match opcode {
                    Opcode::Text => String::from_utf8(data)
                        .map(WsMessage::Text)
                        .map_err(|_| StreamError::Protocol("text frame is not UTF-8".to_string())),
                    Opcode::Binary => Ok(WsMessage::Binary(data)),
                    _ => unreachable!("data frames are text or binary"),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // RFC 6455 §1.3 sample handshake values.
    #[test]
    fn accept_key_matches_rfc_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn masked_text_round_trips() {
        let mut wire = Vec::new();
        write_text_masked(&mut wire, "hello stream", [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let mut reader = MessageReader::new();
        let msg = reader.next(&mut Cursor::new(wire)).unwrap();
        assert_eq!(msg, WsMessage::Text("hello stream".to_string()));
    }

    #[test]
    fn unmasked_client_frame_is_a_protocol_error() {
        let mut wire = Vec::new();
        write_text(&mut wire, "nope").unwrap();

        let mut reader = MessageReader::new();
        let err = reader.next(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mask = [1, 2, 3, 4];
        let mut wire = Vec::new();
        write_frame(&mut wire, false, 0x1, b"hel", Some(mask)).unwrap();
        // An interleaved ping surfaces before the message completes.
        write_frame(&mut wire, true, 0x9, b"hb", Some(mask)).unwrap();
        write_frame(&mut wire, true, 0x0, b"lo", Some(mask)).unwrap();

        let mut cursor = Cursor::new(wire);
        let mut reader = MessageReader::new();
        assert_eq!(reader.next(&mut cursor).unwrap(), WsMessage::Ping(b"hb".to_vec()));
        assert_eq!(
            reader.next(&mut cursor).unwrap(),
            WsMessage::Text("hello".to_string())
        );
    }

    #[test]
    fn close_frame_carries_code_and_reason() {
        let mask = [9, 9, 9, 9];
        let mut payload = Vec::new();
        payload.extend_from_slice(&1000u16.to_be_bytes());
        payload.extend_from_slice(b"done");
        let mut wire = Vec::new();
        write_frame(&mut wire, true, 0x8, &payload, Some(mask)).unwrap();

        let mut reader = MessageReader::new();
        match reader.next(&mut Cursor::new(wire)).unwrap() {
            WsMessage::Close(code, reason) => {
                assert_eq!(code, Some(1000));
                assert_eq!(reason.as_deref(), Some("done"));
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn oversize_control_frame_rejected() {
        // Hand-build a ping header claiming 126 bytes.
        let wire = vec![0x89, 0x80 | 126, 0x00, 0x90];
        let mut reader = MessageReader::new();
        let err = reader.next(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn upgrade_validation_checks_headers() {
        let mut headers = HashMap::new();
        headers.insert("upgrade".to_string(), "websocket".to_string());
        headers.insert("connection".to_string(), "keep-alive, Upgrade".to_string());
        headers.insert("sec-websocket-version".to_string(), "13".to_string());
        headers.insert(
            "sec-websocket-key".to_string(),
            "dGhlIHNhbXBsZSBub25jZQ==".to_string(),
        );

        let key = validate_upgrade(&http::Method::GET, &headers).unwrap();
        assert_eq!(key, "dGhlIHNhbXBsZSBub25jZQ==");

        headers.remove("sec-websocket-key");
        assert!(validate_upgrade(&http::Method::GET, &headers).is_err());
        assert!(validate_upgrade(&http::Method::POST, &headers).is_err());
    }
}
