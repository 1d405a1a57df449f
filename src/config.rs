use crate::error::{ClientError, Result};
use crate::playback_sink::SinkConfig;
use crate::stream_session::SessionOptions;
use jukebox_protocol::JukeboxClient;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the client needs to talk to one jukebox server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` of the jukebox server
    pub server_address: String,
    pub connect_timeout: Duration,
    /// Read/write timeout for request/response exchanges
    pub io_timeout: Duration,
    pub session: SessionOptions,
    pub sink: SinkConfig,
}

impl ClientConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            server_address: server_address(host, port),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
            session: SessionOptions::default(),
            sink: SinkConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_address.is_empty() {
            return Err(ClientError::Config("server address is empty".to_string()));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(ClientError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        // A zero read timeout is rejected by the socket layer
        if self.session.poll_interval.is_zero() {
            return Err(ClientError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.session.chunk_size == 0 {
            return Err(ClientError::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if let SinkConfig::Player(command) = &self.sink {
            if command.trim().is_empty() {
                return Err(ClientError::Config("player command is empty".to_string()));
            }
        }
        Ok(())
    }

    /// Protocol client configured with these timeouts
    pub fn client(&self) -> JukeboxClient {
        JukeboxClient::new(self.server_address.clone())
            .with_timeouts(self.connect_timeout, self.io_timeout)
    }
}

impl SinkConfig {
    /// Pick a sink from the command line options. At most one may be given;
    /// with none the default player is used.
    pub fn from_options(
        player: Option<String>,
        output: Option<PathBuf>,
        discard: bool,
    ) -> Result<Self> {
        match (player, output, discard) {
            (None, None, false) => Ok(SinkConfig::default()),
            (Some(command), None, false) => Ok(SinkConfig::Player(command)),
            (None, Some(path), false) => Ok(SinkConfig::File(path)),
            (None, None, true) => Ok(SinkConfig::Discard),
            _ => Err(ClientError::Config(
                "--player, --output and --discard are mutually exclusive".to_string(),
            )),
        }
    }
}

/// Join host and port, bracketing bare IPv6 literals
pub fn server_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
