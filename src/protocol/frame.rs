//! Binary framing shared by the broker and its clients.
//!
//! Every frame is `[u32 body_len][body]`, all integers big-endian. Strings
//! are length-prefixed UTF-8 (`str8` = u8 length, `str16` = u16 length).
//!
//! Request body, version 2:
//!
//! ```text
//! [u8 version][u8 object][u8 command][u8 ack_policy][u32 timeout_ms]
//! [str8 uid][str16 return_address][str8 arg1][str8 arg2][str8 arg3][str8 arg4]
//! [bytes16 payload]
//! ```
//!
//! Version 1 omits `ack_policy` and `timeout_ms`; such requests are served
//! but never acknowledged.
//!
//! Ack body:
//!
//! ```text
//! [u8 version][u8 object=ACK][u8 status][str8 uid][u16 delivered][u16 failed]
//! [u8 reject_code][str8 route][str8 channel][str16 detail]
//! ```

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::ack::{AckPolicy, AckResponse, AckStatus, Rejection};
use crate::protocol::command::{Command, Request};
use crate::protocol::endpoint::Endpoint;
use crate::utils::{FrameError, RegistryError};

pub const PROTOCOL_VERSION: u8 = 2;
pub const LEGACY_PROTOCOL_VERSION: u8 = 1;

/// Upper bound on a frame body unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

mod object {
    pub const MESSAGE: u8 = 1;
    pub const TRANSFORMER: u8 = 2;
    pub const SUBSCRIBER: u8 = 3;
    pub const ROUTE: u8 = 4;
    pub const CHANNEL: u8 = 5;
    pub const ACTION: u8 = 50;
    pub const ACK: u8 = 100;
}

mod cmd {
    pub const SEND: u8 = 1;
    pub const ADD: u8 = 2;
    pub const REMOVE: u8 = 3;
    pub const SIGTERM: u8 = 50;
}

mod status {
    pub const ACCEPTED: u8 = 1;
    pub const DELIVERED: u8 = 2;
    pub const REJECTED: u8 = 3;
}

mod reject {
    pub const NONE: u8 = 0;
    pub const DUPLICATE_ROUTE: u8 = 1;
    pub const DUPLICATE_CHANNEL: u8 = 2;
    pub const UNKNOWN_ROUTE: u8 = 3;
    pub const UNKNOWN_CHANNEL: u8 = 4;
    pub const INVALID: u8 = 5;
}

/// Anything that can travel over a broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(Request),
    Ack(AckResponse),
}

impl Packet {
    /// Encodes the packet including its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut enc = Encoder::default();
        match self {
            Packet::Request(request) => encode_request(request, &mut enc)?,
            Packet::Ack(ack) => encode_ack(ack, &mut enc)?,
        }

        let body = enc.buf;
        let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
            len: body.len(),
            max: u32::MAX as usize,
        })?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes a frame body, i.e. everything after the length prefix.
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let mut dec = Decoder { buf: body };
        let version = dec.u8()?;
        if version != PROTOCOL_VERSION && version != LEGACY_PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let object = dec.u8()?;

        let packet = if object == object::ACK {
            Packet::Ack(decode_ack(&mut dec)?)
        } else {
            Packet::Request(decode_request(version, object, &mut dec)?)
        };
        dec.finish()?;
        Ok(packet)
    }
}

/// Reads one frame. Returns `None` when the peer closed the connection
/// before sending another length prefix.
pub async fn read_packet<R>(reader: &mut R, max_len: usize) -> Result<Option<Packet>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Packet::decode(&body).map(Some)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn encode_request(request: &Request, enc: &mut Encoder) -> Result<(), FrameError> {
    if request.version != PROTOCOL_VERSION && request.version != LEGACY_PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(request.version));
    }
    if request.uid.is_empty() {
        return Err(FrameError::MissingField("uid"));
    }
    if request.return_address.is_empty() {
        return Err(FrameError::MissingField("return_address"));
    }

    let (object, command, args, payload) = command_layout(&request.command);

    enc.u8(request.version);
    enc.u8(object);
    enc.u8(command);
    if request.version >= PROTOCOL_VERSION {
        enc.u8(request.ack_policy.code());
        enc.u32(timeout_to_millis(request.timeout));
    }
    enc.str8("uid", &request.uid)?;
    enc.str16("return_address", &request.return_address)?;
    for (field, arg) in ["arg1", "arg2", "arg3", "arg4"].into_iter().zip(args.iter()) {
        enc.str8(field, arg)?;
    }
    enc.bytes16("payload", payload)?;
    Ok(())
}

fn decode_request(version: u8, object: u8, dec: &mut Decoder<'_>) -> Result<Request, FrameError> {
    let command = dec.u8()?;
    let (ack_policy, timeout) = if version >= PROTOCOL_VERSION {
        let policy = AckPolicy::from_code(dec.u8()?)?;
        let timeout = match dec.u32()? {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        };
        (policy, timeout)
    } else {
        (AckPolicy::OnSent, None)
    };

    let uid = dec.str8("uid")?;
    let return_address = dec.str16("return_address")?;
    let args = [
        dec.str8("arg1")?,
        dec.str8("arg2")?,
        dec.str8("arg3")?,
        dec.str8("arg4")?,
    ];
    let payload = dec.bytes16()?;

    if uid.is_empty() {
        return Err(FrameError::MissingField("uid"));
    }
    if return_address.is_empty() {
        return Err(FrameError::MissingField("return_address"));
    }

    Ok(Request {
        version,
        uid,
        return_address,
        ack_policy,
        timeout,
        command: parse_command(object, command, args, payload)?,
    })
}

/// Maps a command onto its object type, sub-command, arguments and payload.
fn command_layout(command: &Command) -> (u8, u8, [String; 4], &[u8]) {
    let none = String::new;
    match command {
        Command::SendMessage {
            route,
            channel,
            payload,
        } => (
            object::MESSAGE,
            cmd::SEND,
            [route.clone(), channel.clone().unwrap_or_default(), none(), none()],
            payload.as_slice(),
        ),
        Command::AddRoute { route } => (
            object::ROUTE,
            cmd::ADD,
            [route.clone(), none(), none(), none()],
            &[],
        ),
        Command::AddChannel { route, channel } => (
            object::CHANNEL,
            cmd::ADD,
            [route.clone(), channel.clone(), none(), none()],
            &[],
        ),
        Command::AddSubscriber {
            route,
            channel,
            endpoint,
        } => endpoint_layout(object::SUBSCRIBER, cmd::ADD, route, channel, endpoint),
        Command::RemoveSubscriber {
            route,
            channel,
            endpoint,
        } => endpoint_layout(object::SUBSCRIBER, cmd::REMOVE, route, channel, endpoint),
        Command::AddTransformer {
            route,
            channel,
            endpoint,
        } => endpoint_layout(object::TRANSFORMER, cmd::ADD, route, channel, endpoint),
        Command::RemoveTransformer {
            route,
            channel,
            endpoint,
        } => endpoint_layout(object::TRANSFORMER, cmd::REMOVE, route, channel, endpoint),
        Command::Shutdown => (
            object::ACTION,
            cmd::SIGTERM,
            [none(), none(), none(), none()],
            &[],
        ),
    }
}

fn endpoint_layout(
    object: u8,
    command: u8,
    route: &str,
    channel: &str,
    endpoint: &Endpoint,
) -> (u8, u8, [String; 4], &'static [u8]) {
    (
        object,
        command,
        [
            route.to_string(),
            channel.to_string(),
            endpoint.to_string(),
            String::new(),
        ],
        &[],
    )
}

fn parse_command(
    object: u8,
    command: u8,
    args: [String; 4],
    payload: Vec<u8>,
) -> Result<Command, FrameError> {
    let [arg1, arg2, arg3, _] = args;

    match (object, command) {
        (object::MESSAGE, cmd::SEND) => Ok(Command::SendMessage {
            route: required(arg1, "route")?,
            channel: (!arg2.is_empty()).then_some(arg2),
            payload,
        }),
        (object::ROUTE, cmd::ADD) => Ok(Command::AddRoute {
            route: required(arg1, "route")?,
        }),
        (object::CHANNEL, cmd::ADD) => Ok(Command::AddChannel {
            route: required(arg1, "route")?,
            channel: required(arg2, "channel")?,
        }),
        (object::SUBSCRIBER | object::TRANSFORMER, cmd::ADD | cmd::REMOVE) => {
            let route = required(arg1, "route")?;
            let channel = required(arg2, "channel")?;
            let endpoint: Endpoint = required(arg3, "address")?.parse()?;
            Ok(match (object, command) {
                (object::SUBSCRIBER, cmd::ADD) => Command::AddSubscriber {
                    route,
                    channel,
                    endpoint,
                },
                (object::SUBSCRIBER, _) => Command::RemoveSubscriber {
                    route,
                    channel,
                    endpoint,
                },
                (_, cmd::ADD) => Command::AddTransformer {
                    route,
                    channel,
                    endpoint,
                },
                _ => Command::RemoveTransformer {
                    route,
                    channel,
                    endpoint,
                },
            })
        }
        (object::ACTION, cmd::SIGTERM) => Ok(Command::Shutdown),
        (
            object::MESSAGE
            | object::ROUTE
            | object::CHANNEL
            | object::SUBSCRIBER
            | object::TRANSFORMER
            | object::ACTION,
            _,
        ) => Err(FrameError::UnknownCommand { object, command }),
        (other, _) => Err(FrameError::UnknownObject(other)),
    }
}

fn required(value: String, field: &'static str) -> Result<String, FrameError> {
    if value.is_empty() {
        Err(FrameError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn encode_ack(ack: &AckResponse, enc: &mut Encoder) -> Result<(), FrameError> {
    let (status, delivered, failed) = match &ack.ack {
        AckStatus::Accepted => (status::ACCEPTED, 0, 0),
        AckStatus::Delivered { delivered, failed } => (status::DELIVERED, *delivered, *failed),
        AckStatus::Rejected(_) => (status::REJECTED, 0, 0),
    };
    let (code, route, channel, detail) = match &ack.ack {
        AckStatus::Rejected(rejection) => rejection_layout(rejection),
        _ => (reject::NONE, "", "", ""),
    };

    enc.u8(PROTOCOL_VERSION);
    enc.u8(object::ACK);
    enc.u8(status);
    enc.str8("uid", &ack.uid)?;
    enc.u16(delivered);
    enc.u16(failed);
    enc.u8(code);
    enc.str8("route", route)?;
    enc.str8("channel", channel)?;
    enc.str16("detail", detail)?;
    Ok(())
}

fn rejection_layout(rejection: &Rejection) -> (u8, &str, &str, &str) {
    match rejection {
        Rejection::Registry(RegistryError::DuplicateRoute(route)) => {
            (reject::DUPLICATE_ROUTE, route, "", "")
        }
        Rejection::Registry(RegistryError::DuplicateChannel { route, channel }) => {
            (reject::DUPLICATE_CHANNEL, route, channel, "")
        }
        Rejection::Registry(RegistryError::UnknownRoute(route)) => {
            (reject::UNKNOWN_ROUTE, route, "", "")
        }
        Rejection::Registry(RegistryError::UnknownChannel { route, channel }) => {
            (reject::UNKNOWN_CHANNEL, route, channel, "")
        }
        Rejection::Invalid(reason) => (reject::INVALID, "", "", reason),
    }
}

fn decode_ack(dec: &mut Decoder<'_>) -> Result<AckResponse, FrameError> {
    let status = dec.u8()?;
    let uid = dec.str8("uid")?;
    let delivered = dec.u16()?;
    let failed = dec.u16()?;
    let code = dec.u8()?;
    let route = dec.str8("route")?;
    let channel = dec.str8("channel")?;
    let detail = dec.str16("detail")?;

    let ack = match status {
        status::ACCEPTED => AckStatus::Accepted,
        status::DELIVERED => AckStatus::Delivered { delivered, failed },
        status::REJECTED => AckStatus::Rejected(match code {
            reject::DUPLICATE_ROUTE => RegistryError::DuplicateRoute(route).into(),
            reject::DUPLICATE_CHANNEL => RegistryError::DuplicateChannel { route, channel }.into(),
            reject::UNKNOWN_ROUTE => RegistryError::UnknownRoute(route).into(),
            reject::UNKNOWN_CHANNEL => RegistryError::UnknownChannel { route, channel }.into(),
            reject::INVALID => Rejection::Invalid(detail),
            other => return Err(FrameError::UnknownRejectCode(other)),
        }),
        other => return Err(FrameError::UnknownAckStatus(other)),
    };

    Ok(AckResponse { uid, ack })
}

/// `0` on the wire means "no timeout", so real timeouts round up to 1ms.
fn timeout_to_millis(timeout: Option<Duration>) -> u32 {
    match timeout {
        None => 0,
        Some(t) => u32::try_from(t.as_millis()).unwrap_or(u32::MAX).max(1),
    }
}

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn str8(&mut self, field: &'static str, s: &str) -> Result<(), FrameError> {
        let len = u8::try_from(s.len()).map_err(|_| FrameError::FieldTooLong {
            field,
            max: u8::MAX as usize,
        })?;
        self.u8(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn str16(&mut self, field: &'static str, s: &str) -> Result<(), FrameError> {
        self.bytes16(field, s.as_bytes())
    }

    fn bytes16(&mut self, field: &'static str, b: &[u8]) -> Result<(), FrameError> {
        let len = u16::try_from(b.len()).map_err(|_| FrameError::FieldTooLong {
            field,
            max: u16::MAX as usize,
        })?;
        self.u16(len);
        self.buf.extend_from_slice(b);
        Ok(())
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.buf.len() < n {
            return Err(FrameError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn str8(&mut self, field: &'static str) -> Result<String, FrameError> {
        let len = self.u8()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8(field))
    }

    fn str16(&mut self, field: &'static str) -> Result<String, FrameError> {
        let raw = self.bytes16()?;
        String::from_utf8(raw).map_err(|_| FrameError::InvalidUtf8(field))
    }

    fn bytes16(&mut self) -> Result<Vec<u8>, FrameError> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(self) -> Result<(), FrameError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(FrameError::TrailingBytes(self.buf.len()))
        }
    }
}
