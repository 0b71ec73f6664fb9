//! Login relay: one request frame out, one reply frame back.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::protocol::{
    FRAME_DELIMITER, LoginCommand, LoginRequest, LoginResult, MalformedReason, Reply,
    decode_reply, encode_command, to_wire_json,
};

/// Forwards login attempts to the authentication backend.
///
/// Built per inbound request. Each call opens its own connection, which is
/// closed before the call returns on every path.
#[derive(Debug)]
pub struct LoginRelay {
    connect_timeout: Duration,
    read_timeout: Duration,
    max_response_bytes: usize,
    login_id: Option<String>,
}

/// One frame exchange: where it goes and what it is logged with.
struct Exchange<'a> {
    host: &'a str,
    port: u16,
    operation: &'static str,
    /// Outgoing frame with the password masked.
    payload: &'a str,
}

impl LoginRelay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            max_response_bytes: config.max_response_bytes,
            login_id: None,
        }
    }

    /// Identifier from the last successful login on this relay, if any.
    pub fn login_id(&self) -> Option<&str> {
        self.login_id.as_deref()
    }

    /// Send a `LOGIN` command and return the backend's reply.
    ///
    /// The decoded reply is returned whether or not it signals success.
    /// Malformed or missing replies come back as an empty result; only a
    /// failure to reach the backend is an error.
    pub async fn login(&mut self, request: &LoginRequest) -> Result<LoginResult, RelayError> {
        let command = LoginCommand::from(request);
        let frame = encode_command(&command)?;
        let payload = String::from_utf8_lossy(&to_wire_json(&command.redacted())?).into_owned();

        let exchange = Exchange {
            host: &request.target_host,
            port: request.target_port,
            operation: "login",
            payload: &payload,
        };
        debug!(
            operation = exchange.operation,
            host = %exchange.host,
            port = exchange.port,
            payload = %exchange.payload,
            "Sending login command"
        );

        let connect = || TcpStream::connect((exchange.host, exchange.port));
        let result = self.send(connect, &exchange, &frame).await?.into_result();

        if let Some(id) = result.login_id() {
            info!(
                login = %request.login,
                order_id = %request.order_id,
                login_id = %id,
                "Login successful"
            );
            self.login_id = Some(id.to_string());
        } else {
            info!(
                login = %request.login,
                order_id = %request.order_id,
                reply = %serde_json::Value::Object(result.as_map().clone()),
                "Login rejected"
            );
        }

        Ok(result)
    }

    /// Run one frame exchange over the stream produced by `connect`.
    async fn send<C, F>(
        &self,
        connect: C,
        exchange: &Exchange<'_>,
        frame: &[u8],
    ) -> Result<Reply, RelayError>
    where
        C: FnOnce() -> F,
        F: Future<Output = io::Result<TcpStream>>,
    {
        let Exchange {
            host,
            port,
            operation,
            payload,
        } = *exchange;

        let mut stream = match timeout(self.connect_timeout, connect()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                warn!(
                    operation,
                    host = %host,
                    port,
                    payload = %payload,
                    error = %source,
                    os_error = source.raw_os_error(),
                    "Backend connection failed"
                );
                return Err(RelayError::Connect {
                    host: host.to_string(),
                    port,
                    source,
                });
            }
            Err(_) => {
                warn!(
                    operation,
                    host = %host,
                    port,
                    payload = %payload,
                    timeout_ms = self.connect_timeout.as_millis(),
                    "Backend connection timed out"
                );
                return Err(RelayError::ConnectTimeout {
                    host: host.to_string(),
                    port,
                    timeout: self.connect_timeout,
                });
            }
        };

        if let Err(source) = stream.write_all(frame).await {
            warn!(
                operation,
                host = %host,
                port,
                payload = %payload,
                error = %source,
                "Failed to send frame"
            );
            return Err(RelayError::Send {
                host: host.to_string(),
                port,
                source,
            });
        }

        // The cap counts line content only. One extra byte leaves room for the
        // delimiter; a longer line is cut there and flagged below.
        let limit = u64::try_from(self.max_response_bytes)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut reader = BufReader::new(stream.take(limit));
        let mut line = Vec::new();

        let read = timeout(self.read_timeout, reader.read_until(FRAME_DELIMITER, &mut line)).await;
        let content_len = line.strip_suffix(&[FRAME_DELIMITER]).map_or(line.len(), <[u8]>::len);
        let reply = match read {
            Ok(Ok(_)) if content_len > self.max_response_bytes => {
                Reply::Malformed(MalformedReason::TooLong {
                    limit: self.max_response_bytes,
                })
            }
            Ok(Ok(_)) => decode_reply(&line),
            Ok(Err(e)) => Reply::Malformed(MalformedReason::ReadFailed(e.to_string())),
            Err(_) => Reply::Malformed(MalformedReason::Timeout),
        };
        // Connection closes here, before the reply is inspected further.
        drop(reader);

        match &reply {
            Reply::Object(_) => debug!(
                operation,
                host = %host,
                port,
                raw = %String::from_utf8_lossy(&line),
                "Received reply"
            ),
            Reply::Malformed(reason) => warn!(
                operation,
                host = %host,
                port,
                payload = %payload,
                reason = %reason,
                raw = %String::from_utf8_lossy(&line),
                "Unusable reply from backend"
            ),
        }

        Ok(reply)
    }
}

/// Failures that prevent an exchange with the backend.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {host}:{port} after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Failed to send frame to {host}:{port}: {source}")]
    Send {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode command: {0}")]
    Encode(#[from] crate::error::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// What the stub backend does after reading the request line.
    enum Script {
        Reply(&'static [u8]),
        ReplyThenClose(&'static [u8]),
        ReplyThenStall(&'static [u8], Duration),
        Silent(Duration),
    }

    /// Accept one connection, read the request line, then follow `script`.
    /// Resolves to the request line and whether the client closed the socket.
    async fn stub_backend(script: Script) -> (SocketAddr, JoinHandle<(Vec<u8>, bool)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut request = Vec::new();
            reader.read_until(b'\n', &mut request).await.unwrap();
            let mut socket = reader.into_inner();
            match script {
                Script::Reply(bytes) => {
                    socket.write_all(bytes).await.unwrap();
                }
                Script::ReplyThenClose(bytes) => {
                    socket.write_all(bytes).await.unwrap();
                    socket.shutdown().await.unwrap();
                }
                Script::ReplyThenStall(bytes, wait) => {
                    socket.write_all(bytes).await.unwrap();
                    tokio::time::sleep(wait).await;
                }
                Script::Silent(wait) => tokio::time::sleep(wait).await,
            }
            let mut rest = Vec::new();
            let closed = matches!(
                timeout(Duration::from_secs(5), socket.read_to_end(&mut rest)).await,
                Ok(Ok(0))
            );
            (request, closed)
        });
        (addr, handle)
    }

    fn request_for(addr: SocketAddr) -> LoginRequest {
        LoginRequest {
            login: "alice".into(),
            password: "secret".into(),
            device_id: 7,
            order_id: "O-1".into(),
            target_host: addr.ip().to_string(),
            target_port: addr.port(),
        }
    }

    fn fast_config() -> RelayConfig {
        RelayConfig {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(200),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_login_records_login_id() {
        let (addr, backend) =
            stub_backend(Script::Reply(b"{\"LOGIN_ID\":\"abc123\",\"NAME\":\"Alice\"}\n")).await;
        let mut relay = LoginRelay::new(&fast_config());

        let result = relay.login(&request_for(addr)).await.unwrap();

        assert_eq!(result.login_id(), Some("abc123"));
        assert_eq!(result.get("NAME"), Some(&serde_json::json!("Alice")));
        assert_eq!(relay.login_id(), Some("abc123"));

        let (sent, closed) = backend.await.unwrap();
        assert_eq!(
            sent,
            b"{\"METHOD\":\"LOGIN\",\"ORDER_ID\":\"O-1\",\"LOGIN\":\"alice\",\"PASSWORD\":\"secret\",\"DEVICE_ID\":7}\n"
        );
        assert!(closed, "relay must close the connection");
    }

    #[tokio::test]
    async fn rejected_login_returns_full_reply() {
        let (addr, _backend) =
            stub_backend(Script::Reply(b"{\"ERROR\":\"BAD_PASSWORD\",\"CODE\":17}\n")).await;
        let mut relay = LoginRelay::new(&fast_config());

        let result = relay.login(&request_for(addr)).await.unwrap();

        assert_eq!(result.get("ERROR"), Some(&serde_json::json!("BAD_PASSWORD")));
        assert_eq!(result.get("CODE"), Some(&serde_json::json!(17)));
        assert!(relay.login_id().is_none());
    }

    #[tokio::test]
    async fn empty_login_id_is_not_recorded() {
        let (addr, _backend) = stub_backend(Script::Reply(b"{\"LOGIN_ID\":\"\"}\n")).await;
        let mut relay = LoginRelay::new(&fast_config());

        let result = relay.login(&request_for(addr)).await.unwrap();

        assert_eq!(result.get("LOGIN_ID"), Some(&serde_json::json!("")));
        assert!(relay.login_id().is_none());
    }

    #[tokio::test]
    async fn empty_object_reply() {
        let (addr, _backend) = stub_backend(Script::Reply(b"{}\n")).await;
        let mut relay = LoginRelay::new(&fast_config());

        let result = relay.login(&request_for(addr)).await.unwrap();
        assert!(result.is_empty());
        assert!(relay.login_id().is_none());
    }

    #[tokio::test]
    async fn reply_without_newline_before_eof_is_used() {
        let (addr, _backend) =
            stub_backend(Script::ReplyThenClose(b"{\"LOGIN_ID\":\"eof\"}")).await;
        let mut relay = LoginRelay::new(&fast_config());

        let result = relay.login(&request_for(addr)).await.unwrap();
        assert_eq!(result.login_id(), Some("eof"));
    }

    #[tokio::test]
    async fn garbage_reply_is_empty_result() {
        let (addr, _backend) = stub_backend(Script::Reply(b"HTTP/1.1 400 Bad Request\n")).await;
        let mut relay = LoginRelay::new(&fast_config());

        let result = relay.login(&request_for(addr)).await.unwrap();
        assert!(result.is_empty());
        assert!(relay.login_id().is_none());
    }

    #[tokio::test]
    async fn silent_backend_times_out_within_read_bound() {
        let (addr, backend) = stub_backend(Script::Silent(Duration::from_secs(3))).await;
        let mut relay = LoginRelay::new(&RelayConfig::default());

        let started = Instant::now();
        let result = relay.login(&request_for(addr)).await.unwrap();
        let elapsed = started.elapsed();

        assert!(result.is_empty());
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1800), "took {elapsed:?}");
        let (_, closed) = backend.await.unwrap();
        assert!(closed, "relay must close the connection after a timeout");
    }

    #[tokio::test]
    async fn partial_line_then_stall_is_empty_result() {
        let (addr, _backend) = stub_backend(Script::ReplyThenStall(
            b"{\"LOGIN_ID\":\"ab",
            Duration::from_secs(2),
        ))
        .await;
        let mut relay = LoginRelay::new(&fast_config());

        let started = Instant::now();
        let result = relay.login(&request_for(addr)).await.unwrap();

        assert!(result.is_empty());
        assert!(relay.login_id().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn oversized_reply_is_empty_result() {
        let (addr, _backend) = stub_backend(Script::Reply(
            b"{\"LOGIN_ID\":\"abc123\",\"PAD\":\"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\"}\n",
        ))
        .await;
        let config = RelayConfig {
            max_response_bytes: 16,
            ..fast_config()
        };
        let mut relay = LoginRelay::new(&config);

        let result = relay.login(&request_for(addr)).await.unwrap();
        assert!(result.is_empty());
        assert!(relay.login_id().is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut relay = LoginRelay::new(&fast_config());
        let err = relay.login(&request_for(addr)).await.unwrap_err();

        assert!(matches!(err, RelayError::Connect { port, .. } if port == addr.port()));
        assert!(relay.login_id().is_none());
    }

    fn exchange<'a>(payload: &'a str) -> Exchange<'a> {
        Exchange {
            host: "10.0.0.1",
            port: 2387,
            operation: "login",
            payload,
        }
    }

    #[tokio::test]
    async fn stalled_connect_times_out_within_connect_bound() {
        let config = RelayConfig {
            connect_timeout: Duration::from_millis(300),
            ..RelayConfig::default()
        };
        let relay = LoginRelay::new(&config);

        let started = Instant::now();
        let err = relay
            .send(
                std::future::pending::<io::Result<TcpStream>>,
                &exchange("{}"),
                b"{}\n",
            )
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(
            err,
            RelayError::ConnectTimeout { port: 2387, timeout, .. } if timeout == Duration::from_millis(300)
        ));
        assert!(elapsed >= Duration::from_millis(300), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn failed_lookup_is_connect_error() {
        let relay = LoginRelay::new(&fast_config());
        let connect = || async {
            Err::<TcpStream, _>(io::Error::new(io::ErrorKind::NotFound, "no such host"))
        };

        let err = relay
            .send(connect, &exchange("{}"), b"{}\n")
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Connect { ref source, .. } if source.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn reply_of_exactly_max_bytes_is_accepted() {
        // 16 bytes of content plus the delimiter.
        let (addr, _backend) = stub_backend(Script::Reply(b"{\"LOGIN_ID\":\"a\"}\n")).await;
        let config = RelayConfig {
            max_response_bytes: 16,
            ..fast_config()
        };
        let mut relay = LoginRelay::new(&config);

        let result = relay.login(&request_for(addr)).await.unwrap();
        assert_eq!(result.login_id(), Some("a"));
    }

    #[tokio::test]
    async fn reply_one_byte_over_max_is_rejected() {
        let (addr, _backend) = stub_backend(Script::Reply(b"{\"LOGIN_ID\":\"ab\"}\n")).await;
        let config = RelayConfig {
            max_response_bytes: 16,
            ..fast_config()
        };
        let mut relay = LoginRelay::new(&config);

        let result = relay.login(&request_for(addr)).await.unwrap();
        assert!(result.is_empty());
    }

    /// Log sink shared with a scoped fmt subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn connection_failure_log_names_target_and_command() {
        let logs = CapturedLogs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut relay = LoginRelay::new(&fast_config());
        relay.login(&request_for(addr)).await.unwrap_err();

        let out = logs.contents();
        assert!(out.contains("Backend connection failed"), "{out}");
        assert!(out.contains("operation=\"login\""), "{out}");
        assert!(out.contains(&format!("port={}", addr.port())), "{out}");
        assert!(out.contains(r#""ORDER_ID":"O-1""#), "{out}");
        assert!(out.contains(r#""LOGIN":"alice""#), "{out}");
        assert!(!out.contains("secret"), "password leaked: {out}");
    }

    #[tokio::test]
    async fn relay_keeps_last_successful_login_id() {
        let mut relay = LoginRelay::new(&fast_config());

        let (addr, _b1) = stub_backend(Script::Reply(b"{\"LOGIN_ID\":\"first\"}\n")).await;
        relay.login(&request_for(addr)).await.unwrap();

        let (addr, _b2) = stub_backend(Script::Reply(b"{\"ERROR\":\"LOCKED\"}\n")).await;
        relay.login(&request_for(addr)).await.unwrap();

        assert_eq!(relay.login_id(), Some("first"));
    }
}
