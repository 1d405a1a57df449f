use log::trace;
use std::io::{self, BufReader, BufWriter, Read, Take, Write};
use std::net::TcpStream;
use strum::Display;
use thiserror::Error;

/// Size of the fixed frame header: one type byte followed by a big-endian i32 length.
pub const HEADER_SIZE: usize = 5;

/// Discriminant reserved for error responses. It is checked before the table lookup.
pub const ERROR_SENTINEL: u8 = 0xFF;

/// Largest string payload we are willing to buffer (16MB)
pub const MAX_STRING_PAYLOAD: usize = 16 * 1024 * 1024;

/// Buffer size for the read half of a connection
pub const READ_BUFFER_SIZE: usize = 2048;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Truncated header: connection closed after {received} of 5 bytes")]
    TruncatedHeader { received: usize },

    #[error("Truncated payload: expected {expected} bytes, received {received}")]
    TruncatedPayload { expected: usize, received: usize },

    #[error("Negative payload length: {0}")]
    NegativePayloadLength(i32),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid string encoding")]
    InvalidString,

    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Message carried by an `ErrorResponse`, kept verbatim.
    #[error("{0}")]
    Server(String),
}

impl ProtocolError {
    /// The peer sent something that does not fit the framing rules.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::TruncatedHeader { .. }
                | ProtocolError::TruncatedPayload { .. }
                | ProtocolError::NegativePayloadLength(_)
                | ProtocolError::PayloadTooLarge(_)
                | ProtocolError::InvalidString
                | ProtocolError::InvalidMessageType(_)
        )
    }

    /// Connecting, reading or writing failed at the socket level.
    pub fn is_network(&self) -> bool {
        matches!(self, ProtocolError::Connect { .. } | ProtocolError::Io(_))
    }

    /// The error message sent by the server, if this is an application error.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ProtocolError::Server(message) => Some(message),
            _ => None,
        }
    }
}

/// Logical message kinds, each bound to a fixed wire discriminant.
///
/// The mapping lives in [`MessageKind::discriminant`] and [`MessageKind::resolve`];
/// declaration order carries no meaning on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MessageKind {
    ListRequest,
    ListResponse,
    InfoRequest,
    InfoResponse,
    PlayRequest,
    PlayResponse,
    StopRequest,
    AudioData,
    StreamEnd,
    /// Reserved so older servers keep their numbering. Never sent or expected.
    LegacyRequest,
    /// Reserved so older servers keep their numbering. Never sent or expected.
    LegacyResponse,
    ErrorResponse,
    /// Any discriminant outside the table. Decode-only: a header carrying it
    /// cannot be built for sending.
    Invalid(u8),
}

impl MessageKind {
    /// Every kind that owns a fixed discriminant.
    pub const DEFINED: [MessageKind; 12] = [
        MessageKind::ListRequest,
        MessageKind::ListResponse,
        MessageKind::InfoRequest,
        MessageKind::InfoResponse,
        MessageKind::PlayRequest,
        MessageKind::PlayResponse,
        MessageKind::StopRequest,
        MessageKind::AudioData,
        MessageKind::StreamEnd,
        MessageKind::LegacyRequest,
        MessageKind::LegacyResponse,
        MessageKind::ErrorResponse,
    ];

    pub const fn discriminant(self) -> u8 {
        match self {
            MessageKind::ListRequest => 0x00,
            MessageKind::ListResponse => 0x01,
            MessageKind::InfoRequest => 0x02,
            MessageKind::InfoResponse => 0x03,
            MessageKind::PlayRequest => 0x04,
            MessageKind::PlayResponse => 0x05,
            MessageKind::StopRequest => 0x06,
            MessageKind::AudioData => 0x07,
            MessageKind::StreamEnd => 0x08,
            MessageKind::LegacyRequest => 0x09,
            MessageKind::LegacyResponse => 0x0A,
            MessageKind::ErrorResponse => ERROR_SENTINEL,
            MessageKind::Invalid(raw) => raw,
        }
    }

    /// Map a wire discriminant to its kind. Unknown values become `Invalid`, never an error.
    pub const fn resolve(discriminant: u8) -> Self {
        if discriminant == ERROR_SENTINEL {
            return MessageKind::ErrorResponse;
        }

        match discriminant {
            0x00 => MessageKind::ListRequest,
            0x01 => MessageKind::ListResponse,
            0x02 => MessageKind::InfoRequest,
            0x03 => MessageKind::InfoResponse,
            0x04 => MessageKind::PlayRequest,
            0x05 => MessageKind::PlayResponse,
            0x06 => MessageKind::StopRequest,
            0x07 => MessageKind::AudioData,
            0x08 => MessageKind::StreamEnd,
            0x09 => MessageKind::LegacyRequest,
            0x0A => MessageKind::LegacyResponse,
            other => MessageKind::Invalid(other),
        }
    }

    pub fn is_legacy(self) -> bool {
        matches!(self, MessageKind::LegacyRequest | MessageKind::LegacyResponse)
    }

    pub fn is_invalid(self) -> bool {
        matches!(self, MessageKind::Invalid(_))
    }
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        MessageKind::resolve(value)
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.discriminant()
    }
}

/// Fixed 5 byte prefix of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    message_kind: MessageKind,
    payload_length: i32,
}

impl ProtocolHeader {
    /// Header for an outgoing message. `Invalid` kinds and negative lengths
    /// have no wire form and are rejected.
    pub fn new(message_kind: MessageKind, payload_length: i32) -> Result<Self, ProtocolError> {
        if let MessageKind::Invalid(raw) = message_kind {
            return Err(ProtocolError::InvalidMessageType(raw));
        }
        if payload_length < 0 {
            return Err(ProtocolError::NegativePayloadLength(payload_length));
        }

        Ok(Self {
            message_kind,
            payload_length,
        })
    }

    pub fn message_kind(&self) -> MessageKind {
        self.message_kind
    }

    pub fn payload_length(&self) -> i32 {
        self.payload_length
    }

    /// Serialize to wire format: [type:u8][length:i32 big endian]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.message_kind.discriminant();
        bytes[1..].copy_from_slice(&self.payload_length.to_be_bytes());
        bytes
    }

    /// Parse wire bytes. A negative length is rejected; an unknown kind
    /// decodes as `Invalid` and is left to the caller.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let message_kind = MessageKind::resolve(bytes[0]);
        let payload_length = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

        if payload_length < 0 {
            return Err(ProtocolError::NegativePayloadLength(payload_length));
        }

        Ok(Self {
            message_kind,
            payload_length,
        })
    }

    /// Read and decode a header, failing with `TruncatedHeader` if the peer closes early.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ProtocolError> {
        let mut bytes = [0u8; HEADER_SIZE];
        let received = read_up_to(reader, &mut bytes)?;
        if received < HEADER_SIZE {
            return Err(ProtocolError::TruncatedHeader { received });
        }

        Self::decode(&bytes)
    }

    /// Declared payload length. Headers are never negative.
    pub fn payload_len(&self) -> usize {
        usize::try_from(self.payload_length).unwrap_or(0)
    }
}

/// Build the 5 header bytes for `kind` with the given payload `length`.
pub fn encode_header(
    kind: MessageKind,
    length: i32,
) -> Result<[u8; HEADER_SIZE], ProtocolError> {
    Ok(ProtocolHeader::new(kind, length)?.encode())
}

/// Fill `buf` from `reader` until it is full or the reader hits EOF.
/// Returns how many bytes were read.
pub fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// One TCP connection to the jukebox, framed with [`ProtocolHeader`]s
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let reader_stream = stream.try_clone()?;
        let reader = BufReader::with_capacity(READ_BUFFER_SIZE, reader_stream);
        let writer = BufWriter::new(stream);

        Ok(Connection { reader, writer })
    }

    /// Send a header with no payload
    pub fn send_simple(&mut self, kind: MessageKind) -> Result<(), ProtocolError> {
        self.write_frame(kind, &[])
    }

    /// Send a header followed by a single big-endian i32 (song ids)
    pub fn send_with_int32_payload(
        &mut self,
        kind: MessageKind,
        value: i32,
    ) -> Result<(), ProtocolError> {
        self.write_frame(kind, &value.to_be_bytes())
    }

    /// Send a header followed by the UTF-8 bytes of `text`
    pub fn send_with_string_payload(
        &mut self,
        kind: MessageKind,
        text: &str,
    ) -> Result<(), ProtocolError> {
        self.write_frame(kind, text.as_bytes())
    }

    fn write_frame(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), ProtocolError> {
        let length = i32::try_from(payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
        let header = ProtocolHeader::new(kind, length)?;

        trace!("📤 {} ({} byte payload)", kind, length);

        // Header and payload go out in one flush
        self.writer.write_all(&header.encode())?;
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read the next header. The payload is left on the wire.
    pub fn receive(&mut self) -> Result<ProtocolHeader, ProtocolError> {
        let header = ProtocolHeader::read_from(&mut self.reader)?;
        trace!(
            "📥 {} ({} byte payload)",
            header.message_kind(),
            header.payload_length()
        );
        Ok(header)
    }

    /// Lazy source over the payload declared by `header`
    pub fn payload(&mut self, header: &ProtocolHeader) -> Take<&mut BufReader<TcpStream>> {
        (&mut self.reader).take(header.payload_len() as u64)
    }

    /// Read exactly the declared payload and decode it as UTF-8
    pub fn receive_string(&mut self, header: &ProtocolHeader) -> Result<String, ProtocolError> {
        let expected = header.payload_len();
        if expected > MAX_STRING_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(expected));
        }

        let mut payload = vec![0u8; expected];
        let received = read_up_to(&mut self.payload(header), &mut payload)?;
        if received < expected {
            return Err(ProtocolError::TruncatedPayload { expected, received });
        }

        String::from_utf8(payload).map_err(|_| ProtocolError::InvalidString)
    }

    /// Turn an `ErrorResponse` header into the error it carries.
    /// Framing problems while reading the message take precedence.
    pub fn receive_error(&mut self, header: &ProtocolHeader) -> ProtocolError {
        match self.receive_string(header) {
            Ok(message) => ProtocolError::Server(message),
            Err(e) => e,
        }
    }

    /// Give up framing and hand out the buffered read half plus the raw socket.
    /// Bytes already buffered past the last header stay in the returned reader.
    pub fn into_parts(self) -> Result<(BufReader<TcpStream>, TcpStream), ProtocolError> {
        let stream = self
            .writer
            .into_inner()
            .map_err(|e| ProtocolError::Io(e.into_error()))?;
        Ok((self.reader, stream))
    }
}
