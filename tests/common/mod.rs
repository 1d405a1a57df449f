//! Shared helpers for integration tests: an in-process jukebox server and a
//! sink factory that records what every session wrote.

#![allow(dead_code)]

use jukebox_client::{PlaybackSink, SinkError, SinkFactory};
use jukebox_protocol::protocol::read_up_to;
use jukebox_protocol::{MessageKind, ProtocolHeader};
use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STREAM_CHUNK: usize = 512;

/// How the mock server streams a song after the play response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Announce `audio.len()`, send it, close
    Finite,
    /// Announce 0 and send filler until the client goes away
    Endless,
    /// Announce 0, send `audio`, then go quiet with the connection open
    Stalled,
}

/// A song the mock server can serve
#[derive(Debug, Clone)]
pub struct Song {
    pub info: String,
    pub audio: Vec<u8>,
    pub delivery: Delivery,
}

impl Song {
    pub fn finite(info: &str, audio: Vec<u8>) -> Self {
        Self {
            info: info.to_string(),
            audio,
            delivery: Delivery::Finite,
        }
    }

    pub fn endless(info: &str) -> Self {
        Self {
            info: info.to_string(),
            audio: Vec::new(),
            delivery: Delivery::Endless,
        }
    }

    pub fn stalled(info: &str, audio: Vec<u8>) -> Self {
        Self {
            info: info.to_string(),
            audio,
            delivery: Delivery::Stalled,
        }
    }
}

/// Requests seen by the server with their arrival time, in arrival order
pub type RequestLog = Arc<Mutex<Vec<(MessageKind, Option<i32>, Instant)>>>;

/// Minimal jukebox: list, info, play and stop over the real wire format
pub struct MockJukeboxServer {
    address: String,
    running: Arc<AtomicBool>,
    requests: RequestLog,
    handle: Option<JoinHandle<()>>,
}

impl MockJukeboxServer {
    /// Start serving `songs` on a random local port. `pace` is the delay between stream chunks.
    pub fn start(songs: Vec<Song>, pace: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener
            .set_nonblocking(true)
            .expect("nonblocking listener");
        let address = listener.local_addr().unwrap().to_string();

        let running = Arc::new(AtomicBool::new(true));
        let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let songs = Arc::new(songs);

        let handle = {
            let running = Arc::clone(&running);
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false).unwrap();
                            let running = Arc::clone(&running);
                            let requests = Arc::clone(&requests);
                            let songs = Arc::clone(&songs);
                            thread::spawn(move || {
                                handle_client(stream, &songs, pace, &requests, &running)
                            });
                        }
                        Err(_) => thread::sleep(Duration::from_millis(5)),
                    }
                }
            })
        };

        Self {
            address,
            running,
            requests,
            handle: Some(handle),
        }
    }

    pub fn address(&self) -> String {
        self.address.clone()
    }

    pub fn requests(&self) -> Vec<(MessageKind, Option<i32>)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, song_id, _)| (*kind, *song_id))
            .collect()
    }

    /// When `kind` first arrived
    pub fn seen_at(&self, kind: MessageKind) -> Option<Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|(seen, _, _)| *seen == kind)
            .map(|(_, _, at)| *at)
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.requests()
            .iter()
            .filter(|(seen, _)| *seen == kind)
            .count()
    }

    /// Poll until `kind` has been seen `times` times or `timeout` passes
    pub fn wait_for(&self, kind: MessageKind, times: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.count(kind) >= times {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl Drop for MockJukeboxServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn respond(stream: &mut TcpStream, kind: MessageKind, payload: &[u8]) {
    let header = ProtocolHeader::new(kind, payload.len() as i32).unwrap();
    let _ = stream.write_all(&header.encode());
    let _ = stream.write_all(payload);
}

fn handle_client(
    mut stream: TcpStream,
    songs: &[Song],
    pace: Duration,
    requests: &RequestLog,
    running: &AtomicBool,
) {
    let Ok(header) = ProtocolHeader::read_from(&mut stream) else {
        return;
    };
    let mut payload = vec![0u8; header.payload_len()];
    if read_up_to(&mut stream, &mut payload).unwrap_or(0) < payload.len() {
        return;
    }
    let song_id = <[u8; 4]>::try_from(payload.as_slice())
        .ok()
        .map(i32::from_be_bytes);

    requests
        .lock()
        .unwrap()
        .push((header.message_kind(), song_id, Instant::now()));

    let song = song_id
        .and_then(|id| usize::try_from(id).ok())
        .and_then(|index| songs.get(index));

    match (header.message_kind(), song) {
        (MessageKind::ListRequest, _) => {
            let listing: String = songs
                .iter()
                .enumerate()
                .map(|(id, song)| format!("{}. {}\n", id, song.info))
                .collect();
            respond(&mut stream, MessageKind::ListResponse, listing.as_bytes());
        }
        (MessageKind::InfoRequest, Some(song)) => {
            respond(&mut stream, MessageKind::InfoResponse, song.info.as_bytes());
        }
        (MessageKind::PlayRequest, Some(song)) if song.delivery == Delivery::Endless => {
            respond(&mut stream, MessageKind::PlayResponse, &[]);
            let filler = [0xAAu8; STREAM_CHUNK];
            while running.load(Ordering::SeqCst) {
                if stream.write_all(&filler).is_err() {
                    break;
                }
                thread::sleep(pace);
            }
        }
        (MessageKind::PlayRequest, Some(song)) if song.delivery == Delivery::Stalled => {
            respond(&mut stream, MessageKind::PlayResponse, &[]);
            let _ = stream.write_all(&song.audio);
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
            }
        }
        (MessageKind::PlayRequest, Some(song)) => {
            let length = song.audio.len() as i32;
            let header = ProtocolHeader::new(MessageKind::PlayResponse, length).unwrap();
            let _ = stream.write_all(&header.encode());
            for chunk in song.audio.chunks(STREAM_CHUNK) {
                if !running.load(Ordering::SeqCst) || stream.write_all(chunk).is_err() {
                    break;
                }
                thread::sleep(pace);
            }
        }
        (MessageKind::StopRequest, _) => {
            let _ = stream.shutdown(Shutdown::Write);
        }
        (MessageKind::InfoRequest | MessageKind::PlayRequest, None) => {
            respond(&mut stream, MessageKind::ErrorResponse, b"Invalid songID");
        }
        _ => {
            respond(&mut stream, MessageKind::ErrorResponse, b"Unknown Request Type");
        }
    }
}

/// Everything one session's sink saw
#[derive(Debug, Default)]
pub struct SinkRecord {
    pub song_id: i32,
    pub bytes: Vec<u8>,
    pub finished: bool,
    pub stopped: bool,
    pub stopped_at: Option<Instant>,
}

/// Sink factory handing out [`RecordingSink`]s and keeping their records
#[derive(Clone, Default)]
pub struct RecordingSinks {
    records: Arc<Mutex<Vec<Arc<Mutex<SinkRecord>>>>>,
}

impl RecordingSinks {
    pub fn record(&self, index: usize) -> Arc<Mutex<SinkRecord>> {
        Arc::clone(&self.records.lock().unwrap()[index])
    }

    pub fn opened(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn bytes_written(&self, index: usize) -> usize {
        self.record(index).lock().unwrap().bytes.len()
    }

    /// Poll until sink `index` has seen at least `bytes` bytes
    pub fn wait_for_bytes(&self, index: usize, bytes: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.opened() > index && self.bytes_written(index) >= bytes {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl SinkFactory for RecordingSinks {
    fn open(&self, song_id: i32) -> Result<Box<dyn PlaybackSink>, SinkError> {
        let record = Arc::new(Mutex::new(SinkRecord {
            song_id,
            ..Default::default()
        }));
        self.records.lock().unwrap().push(Arc::clone(&record));
        Ok(Box::new(RecordingSink { record }))
    }
}

pub struct RecordingSink {
    record: Arc<Mutex<SinkRecord>>,
}

impl PlaybackSink for RecordingSink {
    fn write(&mut self, audio_data: &[u8]) -> Result<(), SinkError> {
        self.record
            .lock()
            .unwrap()
            .bytes
            .extend_from_slice(audio_data);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.record.lock().unwrap().finished = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        let mut record = self.record.lock().unwrap();
        record.stopped = true;
        record.stopped_at = Some(Instant::now());
        Ok(())
    }
}

/// Sink whose writes always fail
pub struct BrokenSink;

impl PlaybackSink for BrokenSink {
    fn write(&mut self, _audio_data: &[u8]) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

/// Song bytes with a recognisable pattern
pub fn song_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
