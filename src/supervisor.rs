use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::playback_sink::SinkFactory;
use crate::stream_session::{SessionFinished, SessionOptions, SessionOutcome, StreamingSession};
use crossbeam_channel::{unbounded, Receiver, Sender};
use jukebox_protocol::JukeboxClient;
use log::{debug, info, warn};
use std::fmt;

/// What a command produced, for the caller to show
#[derive(Debug)]
pub enum CommandOutcome {
    /// List or info text from the server
    Text(String),
    /// A stream started. `replaced` holds the session that was cancelled to make room.
    Playing {
        song_id: i32,
        expected_bytes: u64,
        replaced: Option<PlaybackReport>,
    },
    Stopped(PlaybackReport),
    /// The user asked to leave. Holds the session cancelled on the way out.
    Exit(Option<PlaybackReport>),
}

/// Final state of one streaming session
#[derive(Debug)]
pub struct PlaybackReport {
    pub session_id: u64,
    pub song_id: i32,
    pub outcome: SessionOutcome,
}

impl fmt::Display for PlaybackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            SessionOutcome::Completed { bytes } => {
                write!(f, "Song {} finished ({} bytes)", self.song_id, bytes)
            }
            SessionOutcome::Cancelled { bytes } => {
                write!(f, "Song {} stopped after {} bytes", self.song_id, bytes)
            }
            SessionOutcome::Failed { bytes, error } => write!(
                f,
                "Song {} failed after {} bytes: {}",
                self.song_id, bytes, error
            ),
        }
    }
}

/// Runs commands and owns the single active streaming session.
///
/// Only the supervisor assigns or clears the session slot. Consumers report
/// that they exited through the completion channel, and the owner of the
/// supervisor feeds those notifications back through
/// [`Supervisor::handle_finished`].
pub struct Supervisor {
    client: JukeboxClient,
    sinks: Box<dyn SinkFactory>,
    options: SessionOptions,
    active: Option<StreamingSession>,
    next_session_id: u64,
    finished_tx: Sender<SessionFinished>,
    finished_rx: Receiver<SessionFinished>,
}

impl Supervisor {
    pub fn new(
        client: JukeboxClient,
        sinks: Box<dyn SinkFactory>,
        options: SessionOptions,
    ) -> Self {
        let (finished_tx, finished_rx) = unbounded();
        Self {
            client,
            sinks,
            options,
            active: None,
            next_session_id: 1,
            finished_tx,
            finished_rx,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.client(), Box::new(config.sink.clone()), config.session)
    }

    /// Completion notifications from stream consumers, for use in `select!`
    pub fn completions(&self) -> Receiver<SessionFinished> {
        self.finished_rx.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_song(&self) -> Option<i32> {
        self.active.as_ref().map(StreamingSession::song_id)
    }

    pub fn execute(&mut self, command: Command) -> Result<CommandOutcome> {
        debug!("Executing {:?}", command);
        match command {
            Command::List => Ok(CommandOutcome::Text(self.client.list()?)),
            Command::Info { song_id } => Ok(CommandOutcome::Text(self.client.info(song_id)?)),
            Command::Play { song_id } => self.play(song_id),
            Command::Stop => self.stop(),
            Command::Exit => Ok(CommandOutcome::Exit(self.shutdown())),
        }
    }

    fn play(&mut self, song_id: i32) -> Result<CommandOutcome> {
        // Never two consumers at once: the old stream goes before the new one is requested
        let replaced = self.active.take().map(|session| {
            info!("🔁 Replacing song {} with song {}", session.song_id(), song_id);
            Self::cancel(session)
        });

        let stream = self.client.play(song_id)?;
        let sink = self.sinks.open(song_id)?;

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let session = StreamingSession::start(
            session_id,
            stream,
            sink,
            self.options,
            self.finished_tx.clone(),
        )?;
        let expected_bytes = session.expected_bytes();
        self.active = Some(session);

        Ok(CommandOutcome::Playing {
            song_id,
            expected_bytes,
            replaced,
        })
    }

    fn stop(&mut self) -> Result<CommandOutcome> {
        let session = self.active.take().ok_or(ClientError::NoActiveSession)?;
        debug!(
            "Stopping song {} after {:.1?}",
            session.song_id(),
            session.elapsed()
        );
        let report = Self::cancel(session);
        self.notify_server_stop();
        Ok(CommandOutcome::Stopped(report))
    }

    /// Cancel any active session, then tell the server
    pub fn shutdown(&mut self) -> Option<PlaybackReport> {
        let session = self.active.take()?;
        let report = Self::cancel(session);
        self.notify_server_stop();
        Some(report)
    }

    /// Clear the slot if `event` belongs to the active session.
    /// Notifications from sessions that were already cancelled are ignored.
    pub fn handle_finished(&mut self, event: SessionFinished) -> Option<PlaybackReport> {
        let is_active = self
            .active
            .as_ref()
            .is_some_and(|session| session.id() == event.session_id);
        if !is_active {
            debug!("Ignoring stale completion of session {}", event.session_id);
            return None;
        }

        let session = self.active.take()?;
        Some(Self::report(session.id(), session.song_id(), session.join()))
    }

    /// Handle every completion notification that is already queued
    pub fn poll_finished(&mut self) -> Vec<PlaybackReport> {
        let pending: Vec<SessionFinished> = self.finished_rx.try_iter().collect();
        pending
            .into_iter()
            .filter_map(|event| self.handle_finished(event))
            .collect()
    }

    fn notify_server_stop(&self) {
        match self.client.stop() {
            Ok(()) => {}
            Err(e) if e.is_network() => {
                warn!("⚠️ Server unreachable, stop request not delivered: {}", e)
            }
            Err(e) => warn!("⚠️ Could not send stop request: {}", e),
        }
    }

    /// Stop forwarding now; the consumer is gone when this returns
    fn cancel(session: StreamingSession) -> PlaybackReport {
        Self::report(session.id(), session.song_id(), session.cancel())
    }

    fn report(session_id: u64, song_id: i32, outcome: SessionOutcome) -> PlaybackReport {
        PlaybackReport {
            session_id,
            song_id,
            outcome,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            let _ = session.cancel();
        }
    }
}
