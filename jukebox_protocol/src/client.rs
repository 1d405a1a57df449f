use crate::protocol::{Connection, MessageKind, ProtocolError, ProtocolHeader};
use log::{debug, info, warn};
use std::io::{self, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// High-level client for the jukebox server.
///
/// Every call opens its own connection and closes it before returning, except
/// [`JukeboxClient::play`], which hands the open connection to the caller.
#[derive(Debug, Clone)]
pub struct JukeboxClient {
    server_address: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl JukeboxClient {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Override the connect timeout and the read/write timeout used for request/response exchanges
    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    fn connect(&self) -> Result<Connection, ProtocolError> {
        debug!("📡 Connecting to jukebox at {}", self.server_address);

        let connect_error = |source: io::Error| ProtocolError::Connect {
            address: self.server_address.clone(),
            source,
        };

        let mut last_error = None;
        for address in self.server_address.to_socket_addrs().map_err(connect_error)? {
            match TcpStream::connect_timeout(&address, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    stream.set_nodelay(true)?;
                    return Connection::new(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", address, e);
                    last_error = Some(e);
                }
            }
        }

        Err(connect_error(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        })))
    }

    /// Fetch the song list as the server formats it
    pub fn list(&self) -> Result<String, ProtocolError> {
        self.text_exchange(MessageKind::ListRequest, None, MessageKind::ListResponse)
    }

    /// Fetch the info text for one song
    pub fn info(&self, song_id: i32) -> Result<String, ProtocolError> {
        self.text_exchange(
            MessageKind::InfoRequest,
            Some(song_id),
            MessageKind::InfoResponse,
        )
    }

    fn text_exchange(
        &self,
        request: MessageKind,
        song_id: Option<i32>,
        expected: MessageKind,
    ) -> Result<String, ProtocolError> {
        let mut connection = self.connect()?;

        match song_id {
            Some(id) => connection.send_with_int32_payload(request, id)?,
            None => connection.send_simple(request)?,
        }

        let header = connection.receive()?;
        debug!(
            "📥 {} answered with {} ({} bytes)",
            request,
            header.message_kind(),
            header.payload_length()
        );
        check_response(&mut connection, &header, expected)?;

        connection.receive_string(&header)
    }

    /// Request playback. On success the connection stays open and the audio
    /// bytes that follow the response header belong to the returned stream.
    pub fn play(&self, song_id: i32) -> Result<PlayStream, ProtocolError> {
        let mut connection = self.connect()?;
        connection.send_with_int32_payload(MessageKind::PlayRequest, song_id)?;

        let header = connection.receive()?;
        check_response(&mut connection, &header, MessageKind::PlayResponse)?;

        info!(
            "▶️ Song {} accepted, server announced {} bytes",
            song_id,
            header.payload_length()
        );

        let (reader, control) = connection.into_parts()?;
        Ok(PlayStream {
            song_id,
            header,
            reader,
            control,
        })
    }

    /// Best-effort stop notification on a fresh connection. Nothing is read back.
    pub fn stop(&self) -> Result<(), ProtocolError> {
        let mut connection = self.connect()?;
        connection.send_simple(MessageKind::StopRequest)?;
        debug!("⏹️ Stop request sent to {}", self.server_address);
        Ok(())
    }
}

/// Error responses become `Server` errors, undecodable kinds abort the exchange,
/// and any other kind than `expected` is tolerated with a warning.
fn check_response(
    connection: &mut Connection,
    header: &ProtocolHeader,
    expected: MessageKind,
) -> Result<(), ProtocolError> {
    match header.message_kind() {
        MessageKind::ErrorResponse => Err(connection.receive_error(header)),
        MessageKind::Invalid(raw) => Err(ProtocolError::InvalidMessageType(raw)),
        kind if kind == expected => Ok(()),
        kind if kind.is_legacy() => {
            warn!(
                "⚠️ Server answered with reserved kind {} (0x{:02X}) instead of {}",
                kind,
                kind.discriminant(),
                expected
            );
            Ok(())
        }
        kind => {
            warn!("⚠️ Expected {} but server answered {}", expected, kind);
            Ok(())
        }
    }
}

/// Open connection left behind by a successful play request
pub struct PlayStream {
    song_id: i32,
    header: ProtocolHeader,
    reader: BufReader<TcpStream>,
    control: TcpStream,
}

impl PlayStream {
    pub fn song_id(&self) -> i32 {
        self.song_id
    }

    pub fn header(&self) -> &ProtocolHeader {
        &self.header
    }

    /// Song size announced in the play response, 0 if unknown
    pub fn expected_bytes(&self) -> u64 {
        self.header.payload_len() as u64
    }

    /// Split into the buffered audio source and a handle on the same socket
    /// that can adjust timeouts or shut the connection down.
    pub fn into_parts(self) -> (BufReader<TcpStream>, TcpStream) {
        (self.reader, self.control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_up_to;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    /// Accept one connection, capture the request frame, answer with `response`.
    fn one_shot_server(response: Vec<u8>) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let header = ProtocolHeader::read_from(&mut stream).unwrap();
            let mut payload = vec![0u8; header.payload_len()];
            read_up_to(&mut stream, &mut payload).unwrap();

            stream.write_all(&response).unwrap();

            let mut request = header.encode().to_vec();
            request.extend_from_slice(&payload);
            request
        });

        (address, handle)
    }

    fn frame(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
        let mut bytes = ProtocolHeader::new(kind, payload.len() as i32)
            .unwrap()
            .encode()
            .to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_list_exchange() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (address, server) = one_shot_server(frame(MessageKind::ListResponse, b"0. Song"));

        let listing = JukeboxClient::new(address).list().unwrap();

        assert_eq!(listing, "0. Song");
        assert_eq!(server.join().unwrap(), vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_info_sends_song_id() {
        let (address, server) = one_shot_server(frame(MessageKind::InfoResponse, b"by someone"));

        let text = JukeboxClient::new(address).info(3).unwrap();

        assert_eq!(text, "by someone");
        assert_eq!(server.join().unwrap(), vec![2, 0, 0, 0, 4, 0, 0, 0, 3]);
    }

    #[test]
    fn test_error_response_is_surfaced() {
        let (address, server) = one_shot_server(frame(MessageKind::ErrorResponse, b"boom!"));

        let err = JukeboxClient::new(address).info(99).unwrap_err();

        assert_eq!(err.server_message(), Some("boom!"));
        assert!(!err.is_framing());
        server.join().unwrap();
    }

    #[test]
    fn test_invalid_response_kind_aborts() {
        let (address, server) = one_shot_server(vec![0x42, 0, 0, 0, 0]);

        let err = JukeboxClient::new(address).list().unwrap_err();

        assert!(matches!(err, ProtocolError::InvalidMessageType(0x42)));
        server.join().unwrap();
    }

    #[test]
    fn test_legacy_response_kind_is_tolerated() {
        let (address, server) = one_shot_server(frame(MessageKind::LegacyResponse, b"old"));

        let listing = JukeboxClient::new(address).list().unwrap();

        assert_eq!(listing, "old");
        server.join().unwrap();
    }

    #[test]
    fn test_truncated_response_header() {
        let (address, server) = one_shot_server(vec![0x01, 0x00]);

        let err = JukeboxClient::new(address).list().unwrap_err();

        assert!(matches!(err, ProtocolError::TruncatedHeader { received: 2 }));
        server.join().unwrap();
    }

    #[test]
    fn test_play_hands_over_buffered_audio() {
        let mut response = ProtocolHeader::new(MessageKind::PlayResponse, 6)
            .unwrap()
            .encode()
            .to_vec();
        response.extend_from_slice(&[9, 8, 7, 6, 5, 4]);
        let (address, server) = one_shot_server(response);

        let stream = JukeboxClient::new(address).play(3).unwrap();
        assert_eq!(server.join().unwrap(), vec![4, 0, 0, 0, 4, 0, 0, 0, 3]);
        assert_eq!(stream.song_id(), 3);
        assert_eq!(stream.expected_bytes(), 6);

        let (mut reader, _control) = stream.into_parts();
        let mut audio = Vec::new();
        reader.read_to_end(&mut audio).unwrap();
        assert_eq!(audio, vec![9, 8, 7, 6, 5, 4]);
    }

    #[test]
    fn test_stop_request_bytes() {
        let (address, server) = one_shot_server(Vec::new());

        JukeboxClient::new(address).stop().unwrap();

        assert_eq!(server.join().unwrap(), vec![6, 0, 0, 0, 0]);
    }

    #[test]
    fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port nobody listens on
        let address = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();

        let err = JukeboxClient::new(address)
            .with_timeouts(Duration::from_millis(500), Duration::from_secs(1))
            .list()
            .unwrap_err();

        assert!(matches!(err, ProtocolError::Connect { .. }));
        assert!(err.is_network());
    }
}
