use log::{debug, info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;

/// Player used when nothing else is configured. Reads the stream from stdin.
pub const DEFAULT_PLAYER: &str = "ffplay -nodisp -autoexit -loglevel quiet -";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to start player '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Player command is empty")]
    EmptyCommand,

    #[error("Failed to write audio data: {0}")]
    Io(#[from] io::Error),

    #[error("Playback sink already closed")]
    Closed,
}

/// Destination for streamed audio. The bytes are opaque here; decoding is
/// the sink's business.
pub trait PlaybackSink: Send {
    /// Forward the next chunk of the stream
    fn write(&mut self, audio_data: &[u8]) -> Result<(), SinkError>;

    /// The stream ended normally. Flush and let playback run out.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// The stream was cancelled. Drop anything buffered and tear down.
    fn stop(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Handle another thread can use to break a `write` that is stuck.
    /// Sinks whose writes cannot block return `None`.
    fn abort_handle(&self) -> Option<Box<dyn SinkAbort>> {
        None
    }
}

/// Tears a sink down from outside the thread that writes to it
pub trait SinkAbort: Send {
    fn abort(&self);
}

/// Opens one sink per play request, so sessions never share a sink
pub trait SinkFactory: Send {
    fn open(&self, song_id: i32) -> Result<Box<dyn PlaybackSink>, SinkError>;
}

/// Which sink the client plays into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    /// Pipe audio into the stdin of an external player
    Player(String),
    /// Write audio to a file, truncated on every play
    File(PathBuf),
    /// Count and drop audio
    Discard,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Player(DEFAULT_PLAYER.to_string())
    }
}

impl SinkFactory for SinkConfig {
    fn open(&self, song_id: i32) -> Result<Box<dyn PlaybackSink>, SinkError> {
        match self {
            SinkConfig::Player(command) => Ok(Box::new(CommandSink::spawn(command)?)),
            SinkConfig::File(path) => Ok(Box::new(FileSink::create(path)?)),
            SinkConfig::Discard => {
                debug!("🔇 Discarding audio for song {}", song_id);
                Ok(Box::new(NullSink::default()))
            }
        }
    }
}

/// Sink that drops everything it receives
#[derive(Debug, Default)]
pub struct NullSink {
    bytes_received: u64,
}

impl NullSink {
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

impl PlaybackSink for NullSink {
    fn write(&mut self, audio_data: &[u8]) -> Result<(), SinkError> {
        self.bytes_received += audio_data.len() as u64;
        Ok(())
    }
}

/// Sink that writes the raw stream to a file
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = File::create(&path)?;
        info!("💾 Writing audio to {}", path.display());

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }
}

impl PlaybackSink for FileSink {
    fn write(&mut self, audio_data: &[u8]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_all(audio_data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("💾 Finished writing {}", self.path.display());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        // A partial song is still worth keeping on disk
        self.finish()
    }
}

/// Sink that pipes audio into an external player process
pub struct CommandSink {
    command: String,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Option<ChildStdin>,
}

impl CommandSink {
    /// Start `command` (split on whitespace) with a piped stdin
    pub fn spawn(command: &str) -> Result<Self, SinkError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(SinkError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SinkError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        info!("🔊 Started player '{}' (pid {})", command, child.id());

        Ok(Self {
            command: command.to_string(),
            child: Arc::new(Mutex::new(Some(child))),
            stdin,
        })
    }

    fn take_child(&self) -> Option<Child> {
        self.child.lock().ok().and_then(|mut child| child.take())
    }
}

/// Kills the player so a write blocked on a full pipe fails with a broken pipe
struct PlayerKill {
    command: String,
    child: Arc<Mutex<Option<Child>>>,
}

impl SinkAbort for PlayerKill {
    fn abort(&self) {
        let Ok(mut guard) = self.child.lock() else {
            return;
        };
        if let Some(child) = guard.as_mut() {
            match child.kill() {
                Ok(()) => debug!("🛑 Killed player '{}'", self.command),
                Err(e) => debug!("Player kill failed: {}", e),
            }
        }
    }
}

impl PlaybackSink for CommandSink {
    fn write(&mut self, audio_data: &[u8]) -> Result<(), SinkError> {
        let stdin = self.stdin.as_mut().ok_or(SinkError::Closed)?;
        match stdin.write_all(audio_data) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                warn!("⚠️ Player '{}' exited early", self.command);
                self.stdin = None;
                Err(SinkError::Closed)
            }
            Err(e) => Err(SinkError::Io(e)),
        }
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        // Closing stdin lets the player drain what it has and exit on its own
        self.stdin = None;
        if let Some(mut child) = self.take_child() {
            let command = self.command.clone();
            thread::spawn(move || match child.wait() {
                Ok(status) => debug!("Player '{}' exited with {}", command, status),
                Err(e) => warn!("⚠️ Failed to wait for player '{}': {}", command, e),
            });
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.stdin = None;
        if let Some(mut child) = self.take_child() {
            if let Err(e) = child.kill() {
                // Already exited
                debug!("Player kill failed: {}", e);
            }
            child.wait()?;
            debug!("🛑 Player '{}' stopped", self.command);
        }
        Ok(())
    }

    fn abort_handle(&self) -> Option<Box<dyn SinkAbort>> {
        Some(Box::new(PlayerKill {
            command: self.command.clone(),
            child: Arc::clone(&self.child),
        }))
    }
}

impl Drop for CommandSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
