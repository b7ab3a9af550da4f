//! Control channel client
//!
//! Connects to the supervisor over TCP, authenticates with the shared secret
//! and splits the connection into a cloneable [`ControlSender`] backed by a
//! single writer task and a [`ControlReader`] yielding raw protocol lines.
//!
//! Inbound lines are framed as bytes. A line that is not UTF-8 or exceeds
//! [`MAX_LINE_LENGTH`] is reported as a [`ProtocolError`] and the reader
//! moves on to the next line; only I/O failures end the stream.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ControlError;
use super::messages::{HandshakeReply, HandshakeRequest, ProcessMessage, ProtocolError};
use crate::config::ControlConfig;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Longest inbound line accepted, newline excluded
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Where the supervisor listens and how to authenticate
#[derive(Clone)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub authkey: String,
}

impl ConnectionInfo {
    /// Read the port and secret from the environment variables named in `config`
    pub fn from_env(config: &ControlConfig) -> Result<Self, ControlError> {
        debug!(port_env = %config.port_env, authkey_env = %config.authkey_env, "ConnectionInfo::from_env: called");
        let port = std::env::var(&config.port_env).map_err(|_| ControlError::MissingEnv(config.port_env.clone()))?;
        let port = port.trim().parse().map_err(|_| ControlError::InvalidPort {
            var: config.port_env.clone(),
            value: port.clone(),
        })?;
        let authkey =
            std::env::var(&config.authkey_env).map_err(|_| ControlError::MissingEnv(config.authkey_env.clone()))?;
        Ok(Self {
            host: config.host.clone(),
            port,
            authkey,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("authkey", &"<redacted>")
            .finish()
    }
}

/// Cloneable handle for sending messages to the supervisor
///
/// Sending never blocks: messages queue up for the writer task.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: mpsc::UnboundedSender<ProcessMessage>,
}

impl ControlSender {
    pub fn send(&self, message: ProcessMessage) -> Result<(), ControlError> {
        debug!(kind = message.kind(), "ControlSender::send: called");
        self.tx.send(message).map_err(|_| ControlError::Closed)
    }

    /// A sender whose messages land in the returned receiver
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<ProcessMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Inbound half of the control channel
pub struct ControlReader {
    reader: BufReader<BoxedReader>,
    line: Vec<u8>,
    overflow: bool,
    max_line: usize,
}

impl ControlReader {
    fn new(reader: BoxedReader) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            overflow: false,
            max_line: MAX_LINE_LENGTH,
        }
    }

    #[cfg(test)]
    fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Next non-empty line; `None` once the supervisor closed its end
    ///
    /// An undecodable or oversized line comes back as `Some(Err(..))`.
    /// Cancel safe: a partially read line is kept for the next call.
    pub async fn next_line(&mut self) -> Result<Option<Result<String, ProtocolError>>, ControlError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() && !self.overflow {
                    return Ok(None);
                }
                // Final line without a trailing newline
                if let Some(frame) = self.take_frame() {
                    return Ok(Some(frame));
                }
                continue;
            }

            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            if !self.overflow {
                if self.line.len() + used > self.max_line + 1 {
                    self.overflow = true;
                    self.line.clear();
                } else {
                    self.line.extend_from_slice(&available[..used]);
                }
            }
            self.reader.consume(used);

            if complete {
                if let Some(frame) = self.take_frame() {
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Decode the buffered line; `None` for blank lines
    fn take_frame(&mut self) -> Option<Result<String, ProtocolError>> {
        let bytes = std::mem::take(&mut self.line);
        if std::mem::take(&mut self.overflow) {
            warn!(max = self.max_line, "Discarded oversized control line");
            return Some(Err(ProtocolError::Malformed(format!(
                "line longer than {} bytes",
                self.max_line
            ))));
        }
        match String::from_utf8(bytes) {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(Ok(line.trim_end_matches(['\r', '\n']).to_string())),
            Err(e) => Some(Err(ProtocolError::Malformed(format!("invalid UTF-8: {}", e.utf8_error())))),
        }
    }
}

impl std::fmt::Debug for ControlReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlReader").finish_non_exhaustive()
    }
}

/// An authenticated connection to the supervisor
#[derive(Debug)]
pub struct ControlChannel {
    pub sender: ControlSender,
    pub reader: ControlReader,
    /// Ends with an error when a write fails; watch it to detect a dead channel
    pub writer: JoinHandle<Result<(), ControlError>>,
}

impl ControlChannel {
    /// Connect, retrying with a fixed backoff, then authenticate
    ///
    /// Only the TCP connect is retried; a rejected handshake fails at once.
    pub async fn connect(info: &ConnectionInfo, attempts: u32, backoff: Duration) -> Result<Self, ControlError> {
        let address = info.address();
        debug!(%address, attempts, ?backoff, "ControlChannel::connect: called");
        let attempts = attempts.max(1);

        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match TcpStream::connect(address.as_str()).await {
                Ok(stream) => break stream,
                Err(e) if attempt < attempts => {
                    debug!(%address, attempt, error = %e, "connect: attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(%address, attempts, error = %e, "Failed to connect to supervisor");
                    return Err(ControlError::Connect {
                        address,
                        attempts,
                        source: e,
                    });
                }
            }
        };
        let _ = stream.set_nodelay(true);
        info!(%address, attempt, "Connected to supervisor");

        Self::handshake(stream, &info.authkey).await
    }

    /// Authenticate over an established stream and start the writer task
    pub async fn handshake<S>(stream: S, authkey: &str) -> Result<Self, ControlError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        debug!("ControlChannel::handshake: called");
        let (read_half, write_half) = tokio::io::split(stream);
        let mut writer: BoxedWriter = Box::new(write_half);
        let mut reader = ControlReader::new(Box::new(read_half));

        let request = HandshakeRequest {
            authkey: authkey.to_string(),
        };
        write_line(&mut writer, &serde_json::to_string(&request)?).await?;

        let line = match reader.next_line().await? {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(ControlError::Handshake(e.to_string())),
            None => return Err(ControlError::Rejected),
        };
        let reply: HandshakeReply =
            serde_json::from_str(line.trim()).map_err(|e| ControlError::Handshake(e.to_string()))?;
        if !reply.ok {
            return Err(ControlError::Rejected);
        }
        debug!("handshake: accepted");

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(writer, rx));
        Ok(Self {
            sender: ControlSender { tx },
            reader,
            writer,
        })
    }
}

async fn write_line(writer: &mut BoxedWriter, json: &str) -> Result<(), ControlError> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Drains the outbound queue until every sender is gone or a write fails
async fn run_writer(mut writer: BoxedWriter, mut rx: mpsc::UnboundedReceiver<ProcessMessage>) -> Result<(), ControlError> {
    debug!("run_writer: started");
    while let Some(message) = rx.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to serialize control message");
                continue;
            }
        };
        if let Err(e) = write_line(&mut writer, &json).await {
            error!(kind = message.kind(), error = %e, "Failed to write control message, stopping writer");
            return Err(e);
        }
        debug!(kind = message.kind(), "run_writer: sent");
    }
    let _ = writer.shutdown().await;
    debug!("run_writer: all senders dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn info(port: u16) -> ConnectionInfo {
        ConnectionInfo {
            host: "127.0.0.1".to_string(),
            port,
            authkey: "secret".to_string(),
        }
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let config = ControlConfig {
            port_env: "DL_TEST_PORT".to_string(),
            authkey_env: "DL_TEST_KEY".to_string(),
            ..Default::default()
        };
        unsafe {
            std::env::set_var("DL_TEST_PORT", "4711");
            std::env::set_var("DL_TEST_KEY", "hunter2");
        }
        let info = ConnectionInfo::from_env(&config).unwrap();
        assert_eq!(info.port, 4711);
        assert_eq!(info.authkey, "hunter2");
        assert_eq!(info.address(), "127.0.0.1:4711");
        assert!(!format!("{:?}", info).contains("hunter2"));

        unsafe {
            std::env::set_var("DL_TEST_PORT", "not-a-port");
        }
        assert!(matches!(
            ConnectionInfo::from_env(&config),
            Err(ControlError::InvalidPort { .. })
        ));

        unsafe {
            std::env::remove_var("DL_TEST_PORT");
            std::env::remove_var("DL_TEST_KEY");
        }
        assert!(matches!(
            ConnectionInfo::from_env(&config),
            Err(ControlError::MissingEnv(var)) if var == "DL_TEST_PORT"
        ));
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_attempts() {
        let port = unused_port().await;
        let started = std::time::Instant::now();
        let result = ControlChannel::connect(&info(port), 3, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ControlError::Connect { attempts: 3, .. })));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let supervisor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let hello: HandshakeRequest = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(hello.authkey, "secret");
            write_half.write_all(b"{\"ok\":true}\n").await.unwrap();

            let first = lines.next_line().await.unwrap().unwrap();
            write_half.write_all(b"{\"kind\":\"get_df\"}\n\n").await.unwrap();
            drop(write_half);
            first
        });

        let mut channel = ControlChannel::connect(&info(port), 5, Duration::from_millis(10))
            .await
            .unwrap();
        channel.sender.send(ProcessMessage::Startup).unwrap();

        let line = channel.reader.next_line().await.unwrap();
        assert_eq!(line.unwrap().unwrap(), r#"{"kind":"get_df"}"#);
        assert!(channel.reader.next_line().await.unwrap().is_none());
        assert_eq!(supervisor.await.unwrap(), r#"{"kind":"startup"}"#);
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let (client, server) = tokio::io::duplex(1024);
        let supervisor = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap();
            write_half.write_all(b"{\"ok\":false}\n").await.unwrap();
        });

        let result = ControlChannel::handshake(client, "wrong").await;
        assert!(matches!(result, Err(ControlError::Rejected)));
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_during_handshake() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let result = ControlChannel::handshake(client, "secret").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, server) = tokio::io::duplex(4096);
        let supervisor = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap();
            write_half.write_all(b"{\"ok\":true}\n").await.unwrap();
            let mut received = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(line);
            }
            received
        });

        let channel = ControlChannel::handshake(client, "secret").await.unwrap();
        let sender = channel.sender.clone();
        sender.send(ProcessMessage::Startup).unwrap();
        sender.send(ProcessMessage::FrontendConnected(1)).unwrap();
        sender.send(ProcessMessage::StartupComplete).unwrap();
        drop(sender);
        drop(channel.sender);
        channel.writer.await.unwrap().unwrap();
        drop(channel.reader);

        let received = supervisor.await.unwrap();
        assert_eq!(
            received,
            vec![
                r#"{"kind":"startup"}"#,
                r#"{"kind":"frontend_connected","data":1}"#,
                r#"{"kind":"startup_complete"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_detached_sender() {
        let (sender, mut rx) = ControlSender::detached();
        sender.send(ProcessMessage::Startup).unwrap();
        assert_eq!(rx.recv().await, Some(ProcessMessage::Startup));
        drop(rx);
        assert!(matches!(sender.send(ProcessMessage::Startup), Err(ControlError::Closed)));
    }

    fn reader_over(bytes: &'static [u8]) -> ControlReader {
        ControlReader::new(Box::new(bytes))
    }

    async fn next(reader: &mut ControlReader) -> Option<Result<String, ProtocolError>> {
        reader.next_line().await.unwrap()
    }

    #[tokio::test]
    async fn test_reader_skips_invalid_utf8_line() {
        let mut reader = reader_over(b"{\"kind\":\"get_df\",\"data\":\"\xff\"}\n{\"kind\":\"refresh_frontends\"}\n");
        assert!(matches!(next(&mut reader).await, Some(Err(ProtocolError::Malformed(_)))));
        assert_eq!(next(&mut reader).await.unwrap().unwrap(), r#"{"kind":"refresh_frontends"}"#);
        assert!(next(&mut reader).await.is_none());
    }

    #[tokio::test]
    async fn test_reader_discards_oversized_line() {
        let mut reader = reader_over(b"0123456789abcdef\nshort\n").with_max_line(8);
        assert!(matches!(next(&mut reader).await, Some(Err(ProtocolError::Malformed(_)))));
        assert_eq!(next(&mut reader).await.unwrap().unwrap(), "short");
        assert!(next(&mut reader).await.is_none());
    }

    #[tokio::test]
    async fn test_reader_handles_crlf_blank_and_unterminated_lines() {
        let mut reader = reader_over(b"first\r\n\n   \nlast");
        assert_eq!(next(&mut reader).await.unwrap().unwrap(), "first");
        assert_eq!(next(&mut reader).await.unwrap().unwrap(), "last");
        assert!(next(&mut reader).await.is_none());
    }

    #[tokio::test]
    async fn test_writer_reports_broken_connection() {
        let (client, server) = tokio::io::duplex(1024);
        let supervisor = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap();
            write_half.write_all(b"{\"ok\":true}\n").await.unwrap();
        });

        let channel = ControlChannel::handshake(client, "secret").await.unwrap();
        supervisor.await.unwrap();

        // The supervisor end is gone, so the first write fails
        channel.sender.send(ProcessMessage::Startup).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), channel.writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ControlError::Transport(_))));
        assert!(matches!(channel.sender.send(ProcessMessage::Startup), Err(ControlError::Closed)));
    }
}
