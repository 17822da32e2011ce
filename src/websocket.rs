//! # CLI Session WebSocket
//!
//! Each connection to `/ws/cli` owns one long-lived `ggwave-cli` process for
//! its whole lifetime and relays between the two.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: the session executable is checked; when it is missing the
//!    socket closes with `1011 cli not available`
//! 2. **Active**: the process runs, its output is streamed to the client and
//!    client `send` messages are written to its stdin
//! 3. **Closing**: the process exited (`1000 cli_exit_<code>`) or the client left
//!    (the process is killed)
//! 4. **Closed**: the process is reaped
//!
//! ## Message Format:
//! - **Client → Server**: `{"type": "send", "text": "..."}`; anything else is ignored
//! - **Server → Client**: `{"type": "stdout" | "stderr", "data": "..."}` for raw
//!   output chunks and `{"type": "decoded", "message": "..."}` when a stdout
//!   chunk carries a decoded message

use crate::modem::{extract, CompletionLatch};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const READ_CHUNK: usize = 4096;

/// Events sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Stdout { data: String },
    Stderr { data: String },
    Decoded { message: String },
}

/// Messages accepted from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Send { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Notifications from the tasks that own the process pipes.
#[derive(Message)]
#[rtype(result = "()")]
enum CliEvent {
    Output { stream: OutputStream, chunk: String },
    Exited(Option<i32>),
}

/// Close reason for a process that exited with `code`; `None` means killed by a signal.
pub fn exit_reason(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("cli_exit_{}", code),
        None => "cli_exit_null".to_string(),
    }
}

/// WebSocket actor bound 1:1 to a `ggwave-cli` process.
pub struct CliWebSocket {
    id: Uuid,
    state: web::Data<AppState>,
    phase: SessionPhase,
    close_latch: CompletionLatch,
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
    kill_tx: Option<oneshot::Sender<()>>,
    last_heartbeat: Instant,
}

impl CliWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            phase: SessionPhase::Connecting,
            close_latch: CompletionLatch::new(),
            stdin_tx: None,
            kill_tx: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Issue the one close frame this session gets and stop the actor.
    fn finish(&mut self, ctx: &mut ws::WebsocketContext<Self>, code: ws::CloseCode, reason: String) {
        if !self.close_latch.try_claim() {
            return;
        }
        info!(session = %self.id, code = ?code, reason = %reason, "closing cli session");
        self.phase = SessionPhase::Closing;
        ctx.close(Some(ws::CloseReason {
            code,
            description: Some(reason),
        }));
        ctx.stop();
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session = %self.id, error = %err, "failed to serialize event"),
        }
    }

    /// Spawn the process and the tasks that own its pipes.
    fn launch(
        &mut self,
        program: PathBuf,
        args: Vec<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> std::io::Result<()> {
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        info!(session = %self.id, program = %program.display(), pid = ?child.id(), "cli started");

        let addr = ctx.address();
        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            relays.push(tokio::spawn(relay(stdout, OutputStream::Stdout, addr.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(tokio::spawn(relay(stderr, OutputStream::Stderr, addr.clone())));
        }

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(feed_stdin(stdin, stdin_rx, self.id));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(supervise(child, kill_rx, relays, addr, self.id));

        self.stdin_tx = Some(stdin_tx);
        self.kill_tx = Some(kill_tx);
        Ok(())
    }

    fn forward(&self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(session = %self.id, error = %err, "ignoring client message");
                return;
            }
        };

        match message {
            ClientMessage::Send { text } => {
                if let Some(stdin_tx) = &self.stdin_tx {
                    if stdin_tx.send(format!("{}\n", text)).is_err() {
                        debug!(session = %self.id, "cli stdin already closed");
                    }
                }
            }
        }
    }
}

impl Actor for CliWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.state.session_opened();

        let command = self
            .state
            .toolkit()
            .session_command()
            .map(|(program, args)| (program.to_path_buf(), args.to_vec()));
        let Some((program, args)) = command else {
            warn!(session = %self.id, "ggwave-cli not available");
            self.finish(ctx, ws::CloseCode::Error, "cli not available".to_string());
            return;
        };

        if let Err(err) = self.launch(program, args, ctx) {
            error!(session = %self.id, error = %err, "failed to start ggwave-cli");
            self.finish(ctx, ws::CloseCode::Error, "cli failed to start".to_string());
            return;
        }
        self.phase = SessionPhase::Active;

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session = %act.id, "websocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(kill_tx) = self.kill_tx.take() {
            // Ignored error: the process already exited and the supervisor is gone.
            let _ = kill_tx.send(());
        }
        self.stdin_tx = None;
        self.phase = SessionPhase::Closed;
        self.state.session_closed();
        info!(session = %self.id, "cli session closed");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CliWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if self.phase == SessionPhase::Active {
                    self.forward(&text);
                }
            }
            Ok(ws::Message::Binary(data)) => {
                debug!(session = %self.id, bytes = data.len(), "ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session = %self.id, reason = ?reason, "client closed websocket");
                if self.close_latch.try_claim() {
                    self.phase = SessionPhase::Closing;
                    ctx.close(reason);
                }
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session = %self.id, error = %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<CliEvent> for CliWebSocket {
    type Result = ();

    fn handle(&mut self, event: CliEvent, ctx: &mut Self::Context) {
        if self.phase != SessionPhase::Active {
            return;
        }

        match event {
            CliEvent::Output { stream, chunk } => {
                let decoded = match stream {
                    OutputStream::Stdout => extract(&chunk),
                    OutputStream::Stderr => None,
                };
                let event = match stream {
                    OutputStream::Stdout => ServerEvent::Stdout { data: chunk },
                    OutputStream::Stderr => ServerEvent::Stderr { data: chunk },
                };
                self.send_event(ctx, &event);
                if let Some(message) = decoded {
                    self.send_event(ctx, &ServerEvent::Decoded { message });
                }
            }
            CliEvent::Exited(code) => {
                self.finish(ctx, ws::CloseCode::Normal, exit_reason(code));
            }
        }
    }
}

/// Bytes at the end of `bytes` that start a UTF-8 sequence the next read has
/// to complete.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

/// Decodes everything in `pending` except an incomplete trailing sequence,
/// which stays behind for the next read.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let rest = pending.split_off(pending.len() - incomplete_utf8_tail(pending));
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

async fn relay<R>(mut reader: R, stream: OutputStream, addr: Addr<CliWebSocket>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let chunk = take_utf8(&mut pending);
                if !chunk.is_empty() {
                    addr.do_send(CliEvent::Output { stream, chunk });
                }
            }
            Err(err) => {
                warn!(stream = ?stream, error = %err, "cli output read failed");
                break;
            }
        }
    }

    if !pending.is_empty() {
        addr.do_send(CliEvent::Output {
            stream,
            chunk: String::from_utf8_lossy(&pending).into_owned(),
        });
    }
}

async fn feed_stdin(mut stdin: ChildStdin, mut lines: mpsc::UnboundedReceiver<String>, session: Uuid) {
    while let Some(line) = lines.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            debug!(session = %session, error = %err, "cli stdin closed");
            break;
        }
    }
}

/// Waits for the process to exit or for the session to ask for a kill.
///
/// On exit, both output relays are drained before `Exited` is reported, so the
/// close frame always follows the last output chunk.
async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    relays: Vec<JoinHandle<()>>,
    addr: Addr<CliWebSocket>,
    session: Uuid,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            match child.kill().await {
                Ok(()) => debug!(session = %session, "cli killed"),
                Err(err) => warn!(session = %session, error = %err, "failed to kill cli"),
            }
            for relay in relays {
                relay.abort();
            }
            return;
        }
    };

    for relay in relays {
        if let Err(err) = relay.await {
            warn!(session = %session, error = %err, "output relay task failed");
        }
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(session = %session, error = %err, "failed to wait for cli");
            None
        }
    };
    info!(session = %session, code = ?code, "cli exited");
    addr.do_send(CliEvent::Exited(code));
}

/// `GET /ws/cli`
pub async fn cli_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "new cli websocket connection");
    ws::start(CliWebSocket::new(state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::test_support::FakeTools;
    use actix_web::{App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn serve(state: AppState) -> (SocketAddr, actix_web::dev::ServerHandle) {
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(handlers::configure)
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (addr, handle)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws/cli", addr)).await.unwrap();
        client
    }

    /// Every JSON event up to the close frame, plus the close code and reason.
    async fn read_until_close(client: &mut Client) -> (Vec<Value>, Option<(u16, String)>) {
        let mut events = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(10), client.next())
                .await
                .expect("timed out waiting for the server");
            match next {
                Some(Ok(Message::Text(text))) => events.push(serde_json::from_str(&text).unwrap()),
                Some(Ok(Message::Close(frame))) => {
                    return (events, frame.map(|f| (u16::from(f.code), f.reason.into_owned())))
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return (events, None),
            }
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn test_event_envelopes() {
        let event = ServerEvent::Stdout { data: "hi\n".to_string() };
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({ "type": "stdout", "data": "hi\n" }));

        let event = ServerEvent::Decoded { message: "hi".to_string() };
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({ "type": "decoded", "message": "hi" }));

        let message: ClientMessage = serde_json::from_str(r#"{"type":"send","text":"ping"}"#).unwrap();
        assert_eq!(message, ClientMessage::Send { text: "ping".to_string() });
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout","text":"x"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"send","text":5}"#).is_err());
    }

    #[test]
    fn test_exit_reasons() {
        assert_eq!(exit_reason(Some(0)), "cli_exit_0");
        assert_eq!(exit_reason(Some(3)), "cli_exit_3");
        assert_eq!(exit_reason(None), "cli_exit_null");
    }

    #[test]
    fn test_split_utf8_sequence_waits_for_next_read() {
        let bytes = "aé€".as_bytes();
        let mut pending = bytes[..2].to_vec();
        assert_eq!(take_utf8(&mut pending), "a");
        assert_eq!(pending, bytes[1..2]);

        pending.extend_from_slice(&bytes[2..4]);
        assert_eq!(take_utf8(&mut pending), "é");
        assert_eq!(pending, bytes[3..4]);

        pending.extend_from_slice(&bytes[4..]);
        assert_eq!(take_utf8(&mut pending), "€");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_invalid_bytes_are_not_held_back() {
        let mut pending = vec![b'o', b'k', 0xFF];
        assert_eq!(take_utf8(&mut pending), "ok\u{FFFD}");
        assert!(pending.is_empty());
    }

    #[actix_web::test]
    async fn test_missing_cli_closes_with_1011() {
        let tools = FakeTools::new();
        let mut config = tools.config();
        config.tools.cli = Some(tools.path("no-such-cli"));
        let state = AppState::new(config);
        let (addr, handle) = serve(state.clone());

        let mut client = connect(addr).await;
        let (events, close) = read_until_close(&mut client).await;
        assert!(events.is_empty());
        assert_eq!(close, Some((1011, "cli not available".to_string())));
        assert!(wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await);

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_send_is_relayed_and_decoded() {
        let tools = FakeTools::new();
        let (addr, handle) = serve(tools.state());
        let mut client = connect(addr).await;

        client.send(Message::Text("not json".into())).await.unwrap();
        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        client
            .send(Message::Text(json!({ "type": "send", "text": "hello" }).to_string()))
            .await
            .unwrap();

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut decoded = None;
        while decoded.is_none() || !stderr.contains("received hello") {
            let next = tokio::time::timeout(Duration::from_secs(10), client.next())
                .await
                .expect("timed out waiting for output")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = next {
                let event: Value = serde_json::from_str(&text).unwrap();
                match event["type"].as_str() {
                    Some("stdout") => stdout.push_str(event["data"].as_str().unwrap()),
                    Some("stderr") => stderr.push_str(event["data"].as_str().unwrap()),
                    Some("decoded") => decoded = event["message"].as_str().map(str::to_string),
                    other => panic!("unexpected event {:?}", other),
                }
            }
        }
        assert!(stdout.contains("Decoded message with length 5: 'hello'"));
        assert!(!stdout.contains("received hello"));
        assert_eq!(stderr, "received hello\n");
        assert_eq!(decoded.as_deref(), Some("hello"));

        client.close(None).await.unwrap();
        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_empty_payload_is_still_decoded() {
        let tools = FakeTools::new();
        let (addr, handle) = serve(tools.state());
        let mut client = connect(addr).await;

        client
            .send(Message::Text(json!({ "type": "send", "text": "" }).to_string()))
            .await
            .unwrap();

        let decoded = loop {
            let next = tokio::time::timeout(Duration::from_secs(10), client.next())
                .await
                .expect("timed out waiting for output")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = next {
                let event: Value = serde_json::from_str(&text).unwrap();
                if event["type"] == "decoded" {
                    break event;
                }
            }
        };
        assert_eq!(decoded, json!({ "type": "decoded", "message": "" }));

        client.close(None).await.unwrap();
        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_process_exit_closes_with_exit_code() {
        let tools = FakeTools::new();
        let mut config = tools.config();
        config.tools.cli_args = vec!["--exit".to_string(), "3".to_string()];
        let (addr, handle) = serve(AppState::new(config));

        let mut client = connect(addr).await;
        let (events, close) = read_until_close(&mut client).await;
        let stdout: String = events
            .iter()
            .filter(|event| event["type"] == "stdout")
            .filter_map(|event| event["data"].as_str())
            .collect();
        assert_eq!(stdout, "bye\n");
        assert_eq!(close, Some((1000, "cli_exit_3".to_string())));

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_client_disconnect_kills_process() {
        let tools = FakeTools::new();
        let pidfile = tools.bin.path().join("cli.pid");
        let mut config = tools.config();
        config.tools.cli_args = vec!["--pidfile".to_string(), pidfile.to_string_lossy().into_owned()];
        let state = AppState::new(config);
        let (addr, handle) = serve(state.clone());

        let mut client = connect(addr).await;
        assert!(
            wait_for(|| std::fs::read_to_string(&pidfile)
                .map(|pid| !pid.trim().is_empty())
                .unwrap_or(false))
            .await
        );
        let pid = std::fs::read_to_string(&pidfile).unwrap().trim().to_string();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);

        client.close(None).await.unwrap();
        drop(client);

        let alive = |pid: &str| {
            std::process::Command::new("kill")
                .args(["-0", pid])
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        };
        assert!(wait_for(|| !alive(&pid)).await);
        assert!(wait_for(|| state.get_metrics_snapshot().active_sessions == 0).await);

        handle.stop(false).await;
    }
}
