//! Interactive client for the jukebox streaming music server.
//!
//! Short request/response exchanges (list, info, stop) run to completion on
//! the caller's thread. A play request hands its connection to a
//! [`StreamingSession`] whose consumer thread feeds a [`PlaybackSink`] while
//! the [`Supervisor`] keeps accepting commands.

pub mod command;
pub mod config;
pub mod error;
pub mod playback_sink;
pub mod stream_session;
pub mod supervisor;

pub use command::Command;
pub use config::ClientConfig;
pub use error::{ClientError, ErrorClass, Result};
pub use playback_sink::{PlaybackSink, SinkAbort, SinkConfig, SinkError, SinkFactory};
pub use stream_session::{SessionFinished, SessionOptions, SessionOutcome, StreamingSession};
pub use supervisor::{CommandOutcome, PlaybackReport, Supervisor};
