//! Background consumer for an accepted play request.
//!
//! A [`StreamingSession`] owns the connection left open by
//! [`JukeboxClient::play`](jukebox_protocol::JukeboxClient::play) and runs one
//! thread that copies audio bytes into a [`PlaybackSink`] until the stream
//! completes, is cancelled, or fails.
//!
//! Cancellation is cooperative. The consumer checks a cancel channel between
//! reads, the socket carries a short read timeout so a quiet server cannot
//! pin a read forever, and [`StreamingSession::cancel`] also shuts the socket
//! down so a pending read returns at once. A write stuck in a sink that
//! stopped draining is broken through the sink's
//! [`abort_handle`](PlaybackSink::abort_handle). Any read or sink error seen
//! after a cancel was requested counts as part of the cancel.

use crate::playback_sink::{PlaybackSink, SinkAbort, SinkError};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use jukebox_protocol::PlayStream;
use log::{debug, error, info, warn};
use std::io::{self, BufReader, Read};
use std::net::{Shutdown, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Playback sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Failed to start stream consumer: {0}")]
    Spawn(#[source] io::Error),

    #[error("Stream consumer panicked")]
    ConsumerPanicked,
}

/// Tuning for the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Read timeout on the stream socket. Upper bound on how long a cancel can go unnoticed.
    pub poll_interval: Duration,
    /// Bytes requested per read
    pub chunk_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            chunk_size: 2048,
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Peer closed the stream or the announced song length was reached
    Completed { bytes: u64 },
    /// The supervisor cancelled the stream
    Cancelled { bytes: u64 },
    /// Reading or playback failed
    Failed { bytes: u64, error: StreamError },
}

impl SessionOutcome {
    /// Bytes forwarded to the sink before the session ended
    pub fn bytes(&self) -> u64 {
        match self {
            SessionOutcome::Completed { bytes }
            | SessionOutcome::Cancelled { bytes }
            | SessionOutcome::Failed { bytes, .. } => *bytes,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionOutcome::Cancelled { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SessionOutcome::Failed { .. })
    }
}

/// Sent by the consumer thread when it exits, whatever the reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFinished {
    pub session_id: u64,
}

/// A running stream. Dropping it cancels the stream.
pub struct StreamingSession {
    id: u64,
    song_id: i32,
    expected_bytes: u64,
    started: Instant,
    cancel_tx: Sender<()>,
    control: TcpStream,
    sink_abort: Option<Box<dyn SinkAbort>>,
    consumer: Option<JoinHandle<SessionOutcome>>,
}

impl StreamingSession {
    /// Take over `stream` and start forwarding its bytes into `sink`.
    /// `finished_tx` receives a [`SessionFinished`] once the consumer exits.
    pub fn start(
        id: u64,
        stream: PlayStream,
        sink: Box<dyn PlaybackSink>,
        options: SessionOptions,
        finished_tx: Sender<SessionFinished>,
    ) -> Result<Self, StreamError> {
        let song_id = stream.song_id();
        let expected_bytes = stream.expected_bytes();
        debug!(
            "Session {} taking over the {} connection",
            id,
            stream.header().message_kind()
        );
        let (reader, control) = stream.into_parts();
        let sink_abort = sink.abort_handle();

        control
            .set_read_timeout(Some(options.poll_interval))
            .map_err(StreamError::Spawn)?;

        let (cancel_tx, cancel_rx) = bounded(1);
        let consumer = Consumer {
            session_id: id,
            reader,
            sink,
            cancel_rx,
            cancelled: false,
            expected_bytes,
            chunk_size: options.chunk_size.max(1),
            forwarded: 0,
        };

        let handle = thread::Builder::new()
            .name(format!("jukebox-stream-{}", id))
            .spawn(move || {
                let outcome = consumer.run();
                // The supervisor may already be gone during shutdown
                let _ = finished_tx.send(SessionFinished { session_id: id });
                outcome
            })
            .map_err(StreamError::Spawn)?;

        info!(
            "🎵 Session {} streaming song {} ({} bytes announced)",
            id, song_id, expected_bytes
        );

        Ok(Self {
            id,
            song_id,
            expected_bytes,
            started: Instant::now(),
            cancel_tx,
            control,
            sink_abort,
            consumer: Some(handle),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn song_id(&self) -> i32 {
        self.song_id
    }

    pub fn expected_bytes(&self) -> u64 {
        self.expected_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once the consumer thread has exited
    pub fn is_finished(&self) -> bool {
        self.consumer
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Stop forwarding, release the connection and wait for the consumer.
    pub fn cancel(mut self) -> SessionOutcome {
        self.signal_cancel();
        self.wait()
    }

    /// Collect the outcome of a consumer that already reported it finished.
    pub fn join(mut self) -> SessionOutcome {
        self.wait()
    }

    fn signal_cancel(&self) {
        debug!("🛑 Cancelling session {}", self.id);
        // Full means a cancel is already pending
        let _ = self.cancel_tx.try_send(());
        // Wakes a blocked read; errors mean the socket is already closed
        let _ = self.control.shutdown(Shutdown::Both);
        // Wakes a blocked sink write
        if let Some(abort) = &self.sink_abort {
            abort.abort();
        }
    }

    fn wait(&mut self) -> SessionOutcome {
        let Some(handle) = self.consumer.take() else {
            return SessionOutcome::Failed {
                bytes: 0,
                error: StreamError::ConsumerPanicked,
            };
        };

        let outcome = handle.join().unwrap_or_else(|_| {
            error!("❌ Stream consumer for session {} panicked", self.id);
            SessionOutcome::Failed {
                bytes: 0,
                error: StreamError::ConsumerPanicked,
            }
        });

        let _ = self.control.shutdown(Shutdown::Both);
        outcome
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            self.signal_cancel();
            let _ = self.wait();
        }
    }
}

/// State owned by the consumer thread
struct Consumer {
    session_id: u64,
    reader: BufReader<TcpStream>,
    sink: Box<dyn PlaybackSink>,
    cancel_rx: Receiver<()>,
    cancelled: bool,
    expected_bytes: u64,
    chunk_size: usize,
    forwarded: u64,
}

impl Consumer {
    fn run(mut self) -> SessionOutcome {
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            if self.cancel_requested() {
                return self.cancelled();
            }

            let want = self.next_read_len();
            match self.reader.read(&mut buffer[..want]) {
                Ok(0) => {
                    if self.cancel_requested() {
                        return self.cancelled();
                    }
                    if self.expected_bytes > 0 && self.forwarded < self.expected_bytes {
                        warn!(
                            "⚠️ Session {}: server closed after {} of {} bytes",
                            self.session_id, self.forwarded, self.expected_bytes
                        );
                    }
                    return self.completed();
                }
                Ok(n) => {
                    if self.cancel_requested() {
                        return self.cancelled();
                    }
                    if let Err(e) = self.sink.write(&buffer[..n]) {
                        if self.cancel_requested() {
                            return self.cancelled();
                        }
                        return self.failed(StreamError::Sink(e));
                    }
                    self.forwarded += n as u64;

                    if self.expected_bytes > 0 && self.forwarded >= self.expected_bytes {
                        return self.completed();
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    // Poll tick, go check the cancel channel again
                    continue;
                }
                Err(e) => {
                    if self.cancel_requested() {
                        return self.cancelled();
                    }
                    return self.failed(StreamError::Read(e));
                }
            }
        }
    }

    /// Never read past the announced song length
    fn next_read_len(&self) -> usize {
        if self.expected_bytes == 0 {
            return self.chunk_size;
        }
        let remaining = self.expected_bytes.saturating_sub(self.forwarded);
        self.chunk_size.min(remaining.try_into().unwrap_or(usize::MAX))
    }

    /// Latches: once a cancel is seen it stays seen
    fn cancel_requested(&mut self) -> bool {
        if !self.cancelled {
            self.cancelled = match self.cancel_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
        }
        self.cancelled
    }

    fn completed(mut self) -> SessionOutcome {
        if let Err(e) = self.sink.finish() {
            return self.failed(StreamError::Sink(e));
        }
        info!(
            "✅ Session {} finished after {} bytes",
            self.session_id, self.forwarded
        );
        SessionOutcome::Completed {
            bytes: self.forwarded,
        }
    }

    fn cancelled(mut self) -> SessionOutcome {
        if let Err(e) = self.sink.stop() {
            warn!("⚠️ Session {}: sink stop failed: {}", self.session_id, e);
        }
        info!(
            "⏹️ Session {} cancelled after {} bytes",
            self.session_id, self.forwarded
        );
        SessionOutcome::Cancelled {
            bytes: self.forwarded,
        }
    }

    fn failed(mut self, error: StreamError) -> SessionOutcome {
        error!(
            "❌ Session {} failed after {} bytes: {}",
            self.session_id, self.forwarded, error
        );
        if let Err(e) = self.sink.stop() {
            debug!("Sink stop after failure: {}", e);
        }
        SessionOutcome::Failed {
            bytes: self.forwarded,
            error,
        }
    }
}
