//! # Jukebox Protocol
//!
//! Binary framing and TCP client for the jukebox streaming music server.
//!
//! Every message starts with a 5 byte header: a one byte message type followed
//! by the payload length as a big-endian `i32`.
//!
//! This crate provides:
//! - The message type registry and header codec
//! - [`Connection`], framed reads and writes over one `TcpStream`
//! - [`JukeboxClient`], one connection per request/response exchange
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use jukebox_protocol::JukeboxClient;
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = JukeboxClient::new("127.0.0.1:5100");
//!
//! println!("{}", client.list()?);
//! println!("{}", client.info(0)?);
//!
//! // The play connection stays open and carries raw audio bytes
//! let stream = client.play(0)?;
//! let (mut audio, _control) = stream.into_parts();
//! let mut first = [0u8; 2048];
//! let n = audio.read(&mut first)?;
//! println!("Received {} bytes", n);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod protocol;

// Re-export commonly used types
pub use client::{JukeboxClient, PlayStream};
pub use protocol::{
    encode_header, Connection, MessageKind, ProtocolError, ProtocolHeader, HEADER_SIZE,
};
