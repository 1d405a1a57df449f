use crate::playback_sink::SinkError;
use crate::stream_session::StreamError;
use jukebox_protocol::ProtocolError;
use strum::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Playback error: {0}")]
    Sink(#[from] SinkError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Invalid song num: {0}")]
    InvalidSongId(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("No song is currently playing")]
    NoActiveSession,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Where a failure came from, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorClass {
    /// Header or payload cut short or malformed
    Framing,
    /// The server answered with an error message
    Application,
    /// Bad user input, caught before touching the network
    InputValidation,
    /// Connect, read or write failed
    Network,
    /// A running stream broke
    StreamIo,
    /// The playback sink could not be opened or written
    Sink,
    Config,
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Protocol(e) if e.server_message().is_some() => ErrorClass::Application,
            ClientError::Protocol(e) if e.is_framing() => ErrorClass::Framing,
            ClientError::Protocol(_) => ErrorClass::Network,
            ClientError::Sink(_) => ErrorClass::Sink,
            ClientError::Stream(_) => ErrorClass::StreamIo,
            ClientError::InvalidSongId(_)
            | ClientError::UnknownCommand(_)
            | ClientError::NoActiveSession => ErrorClass::InputValidation,
            ClientError::Config(_) => ErrorClass::Config,
        }
    }
}
