//! mpv IPC driver with separated reader/writer tasks, and the `AudioOutput`
//! built on it.
//!
//! ```text
//!   MpvOutput::ensure_handle()
//!         │
//!         ├── MpvDriver::spawn_and_connect()
//!         │       ├── writer_task   ← MpvRequest via mpsc, serialised → socket
//!         │       └── reader_task   ← JSON lines from socket
//!         │                              ├── reply (has request_id) → oneshot
//!         │                              └── event / property-change → mpsc
//!         └── event forwarder       ← MpvEvent → OutputEvent tagged with the ticket
//! ```
//!
//! Platform notes:
//! - Unix:    Unix domain sockets
//! - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::output::{AudioOutput, OutputError, OutputEvent, Ticket};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_PAUSE: u64 = 2;
pub const OBS_TIME_POS: u64 = 4;
pub const OBS_DURATION: u64 = 5;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Translate into an output event for the file loaded under `ticket`.
    pub fn to_output(&self, ticket: Ticket) -> Option<OutputEvent> {
        if let Some((obs_id, data)) = self.as_property_change() {
            return match obs_id {
                OBS_TIME_POS => data
                    .as_f64()
                    .map(|position| OutputEvent::TimeChanged { ticket, position }),
                OBS_DURATION => data
                    .as_f64()
                    .filter(|d| *d > 0.0)
                    .map(|duration| OutputEvent::DurationChanged { ticket, duration }),
                OBS_PAUSE => {
                    debug!("mpv: pause → {:?}", data.as_bool());
                    None
                }
                _ => None,
            };
        }

        if self.event_name()? != "end-file" {
            return None;
        }
        match self.raw.get("reason").and_then(|v| v.as_str()) {
            Some("eof") => Some(OutputEvent::Ended { ticket }),
            Some("error") => {
                let reason = self
                    .raw
                    .get("file_error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("playback error")
                    .to_string();
                Some(OutputEvent::Failed { ticket, reason })
            }
            // stop / quit / redirect: replaced or shut down on purpose.
            _ => None,
        }
    }
}

/// Decides which load the events coming out of mpv belong to.
///
/// `load` arms a ticket; it only becomes active once mpv reports
/// `start-file` for it. Events still queued from the previous file keep the
/// previous ticket, and nothing is tagged before the first file starts.
#[derive(Debug, Default)]
struct TicketGate {
    active: Option<Ticket>,
    pending: Option<PendingLoad>,
}

#[derive(Debug)]
struct PendingLoad {
    ticket: Ticket,
    /// `playlist_entry_id` from the `loadfile` reply (mpv 0.38+).
    entry_id: Option<u64>,
}

impl TicketGate {
    fn arm(&mut self, ticket: Ticket) {
        self.pending = Some(PendingLoad {
            ticket,
            entry_id: None,
        });
    }

    fn set_entry_id(&mut self, ticket: Ticket, entry_id: u64) {
        if let Some(pending) = self.pending.as_mut().filter(|p| p.ticket == ticket) {
            pending.entry_id = Some(entry_id);
        }
    }

    fn translate(&mut self, evt: &MpvEvent) -> Option<OutputEvent> {
        if evt.event_name() == Some("start-file") {
            let entry_id = evt.raw.get("playlist_entry_id").and_then(Value::as_u64);
            self.start_file(entry_id);
            return None;
        }
        evt.to_output(self.active?)
    }

    fn start_file(&mut self, entry_id: Option<u64>) {
        let Some(pending) = &self.pending else {
            return;
        };
        if let (Some(expected), Some(seen)) = (pending.entry_id, entry_id) {
            if expected != seen {
                debug!("mpv: start-file for entry {} while waiting for {}", seen, expected);
                return;
            }
        }
        self.active = self.pending.take().map(|p| p.ticket);
    }
}

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: deck_proto::platform::mpv_socket_name(),
            process: None,
            volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        info!("mpv: spawning new process");
        let mpv_binary = deck_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(deck_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── AudioOutput ───────────────────────────────────────────────────────────────

struct MpvConnection {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
}

/// `AudioOutput` backed by an `mpv --idle` child process. The process is
/// started lazily on the first `load` and restarted if it dies.
pub struct MpvOutput {
    conn: Mutex<MpvConnection>,
    gate: Arc<StdMutex<TicketGate>>,
    event_tx: mpsc::Sender<OutputEvent>,
    /// Extra HTTP header for stream requests (`Authorization: Bearer …`).
    http_header: Option<String>,
}

impl MpvOutput {
    pub fn new(volume: f32, http_header: Option<String>, event_tx: mpsc::Sender<OutputEvent>) -> Self {
        Self {
            conn: Mutex::new(MpvConnection {
                driver: MpvDriver::new(volume),
                handle: None,
            }),
            gate: Arc::new(StdMutex::new(TicketGate::default())),
            event_tx,
            http_header,
        }
    }

    async fn ensure_handle(&self) -> Result<MpvHandle, OutputError> {
        let mut conn = self.conn.lock().await;
        if conn.handle.is_some() && !conn.driver.process_alive() {
            warn!("mpv: process died, dropping handle");
            conn.handle = None;
        }
        if let Some(handle) = &conn.handle {
            return Ok(handle.clone());
        }

        let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let gate = self.gate.clone();
        let out_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = mpv_rx.recv().await {
                let out = lock_gate(&gate).translate(&evt);
                let Some(out) = out else {
                    continue;
                };
                if out_tx.send(out).await.is_err() {
                    break;
                }
            }
        });

        let handle = conn
            .driver
            .spawn_and_connect(mpv_tx)
            .await
            .map_err(|e| OutputError::Unavailable(e.to_string()))?;
        handle.observe_properties().await;
        if let Some(header) = &self.http_header {
            if let Err(e) = handle
                .send(json!(["set_property", "http-header-fields", header]))
                .await
            {
                warn!("mpv: failed to set http-header-fields: {}", e);
            }
        }
        conn.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn request(&self, command: Value) -> Result<Value, OutputError> {
        let handle = self.ensure_handle().await?;
        handle
            .send(command)
            .await
            .map_err(|e| OutputError::Command(e.to_string()))
    }

    async fn command(&self, command: Value) -> Result<(), OutputError> {
        self.request(command).await.map(|_| ())
    }

    pub async fn shutdown(&self) {
        let mut conn = self.conn.lock().await;
        conn.handle = None;
        conn.driver.kill().await;
    }
}

fn lock_gate(gate: &StdMutex<TicketGate>) -> std::sync::MutexGuard<'_, TicketGate> {
    gate.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl AudioOutput for MpvOutput {
    async fn load(&self, url: &str, ticket: Ticket) -> Result<(), OutputError> {
        lock_gate(&self.gate).arm(ticket);
        let reply = self.request(json!(["loadfile", url, "replace"])).await?;
        if let Some(entry_id) = reply["data"]["playlist_entry_id"].as_u64() {
            lock_gate(&self.gate).set_entry_id(ticket, entry_id);
        }
        // A paused player stays paused across loadfile.
        self.command(json!(["set_property", "pause", false])).await
    }

    async fn set_pause(&self, paused: bool) -> Result<(), OutputError> {
        self.command(json!(["set_property", "pause", paused])).await
    }

    async fn seek(&self, position: f64) -> Result<(), OutputError> {
        self.command(json!(["seek", position, "absolute"])).await
    }

    async fn stop(&self) -> Result<(), OutputError> {
        let handle = self.conn.lock().await.handle.clone();
        if let Some(handle) = handle {
            handle
                .send(json!(["stop"]))
                .await
                .map_err(|e| OutputError::Command(e.to_string()))?;
        }
        Ok(())
    }
}
