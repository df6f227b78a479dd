// mpv as the media engine - spawned idle, driven over its JSON IPC socket
// mpv handles the youtube URL itself (through yt-dlp), we only send commands and read events

use super::{EngineEvent, EngineEventSender, MediaEngine};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const OBS_PAUSE: u64 = 1;
const OBS_TIME_POS: u64 = 2;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

#[derive(Debug, Clone)]
pub struct MpvOptions {
    pub mpv_path: PathBuf,
    pub socket_path: PathBuf,
    /// Open a video window instead of running audio-only
    pub video_mode: bool,
    /// How long to wait for mpv to open its socket, and for command replies
    pub timeout: Duration,
}

impl Default for MpvOptions {
    fn default() -> Self {
        Self {
            mpv_path: PathBuf::from("mpv"),
            socket_path: std::env::temp_dir()
                .join(format!("lofiterm-mpv-{}.sock", std::process::id())),
            video_mode: false,
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct MpvEngine {
    options: MpvOptions,
    child: Option<Child>,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    /// Lowered by the reader task once mpv hangs up
    alive: Arc<AtomicBool>,
    pending: Pending,
    next_request_id: u64,
}

impl MpvEngine {
    pub fn new(options: MpvOptions) -> Self {
        Self {
            options,
            child: None,
            writer: None,
            reader: None,
            alive: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: 100,
        }
    }

    fn spawn_process(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.options.mpv_path);
        cmd.arg("--idle=yes")
            .arg("--no-terminal")
            .arg("--ytdl=yes")
            .arg(format!("--input-ipc-server={}", self.options.socket_path.display()));
        if !self.options.video_mode {
            cmd.arg("--no-video");
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let path = self.options.mpv_path.display();
                Error::media_engine(format!("failed to launch {path}: {e}"))
            })
    }

    /// mpv creates the socket a moment after it starts, so keep knocking
    async fn connect(&mut self) -> Result<UnixStream> {
        let deadline = tokio::time::Instant::now() + self.options.timeout;

        loop {
            match UnixStream::connect(&self.options.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if let Some(child) = self.child.as_mut() {
                        if let Ok(Some(status)) = child.try_wait() {
                            let msg = format!("mpv exited during startup ({status})");
                            return Err(Error::media_engine(msg));
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(Error::media_engine(format!(
                            "mpv IPC socket {} never came up: {e}",
                            self.options.socket_path.display()
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn command(&mut self, args: Value) -> Result<Value> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);

        if let Err(e) = self.send_line(&encode_command(&args, request_id)).await {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.options.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::media_engine("mpv connection closed")),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                return Err(Error::media_engine(format!("mpv did not answer {args}")));
            }
        };

        match reply.get("error").and_then(Value::as_str) {
            Some("success") | None => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
            Some(err) => Err(Error::media_engine(format!("{args} failed: {err}"))),
        }
    }

    /// Hook the reader task and the writer up to a connected IPC socket
    fn attach(&mut self, stream: UnixStream, events: EngineEventSender) {
        let (read_half, write_half) = stream.into_split();
        self.writer = Some(write_half);
        self.alive.store(true, Ordering::SeqCst);

        let pending = Arc::clone(&self.pending);
        let alive = Arc::clone(&self.alive);
        self.reader = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => route_message(&line, &pending, &events),
                    Ok(None) => {
                        warn!("mpv closed the IPC connection");
                        break;
                    }
                    Err(e) => {
                        warn!("mpv IPC read failed: {}", e);
                        break;
                    }
                }
            }
            // lowered before the event goes out, so whoever reacts to it sees a dead engine
            alive.store(false, Ordering::SeqCst);
            lock(&pending).clear();
            let _ = events.send(EngineEvent::Stopped);
        }));
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let writer = match self.writer.as_mut() {
            Some(writer) if self.alive.load(Ordering::SeqCst) => writer,
            _ => return Err(Error::media_engine("mpv is not running")),
        };
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::media_engine(format!("mpv socket write: {e}")))
    }

    async fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        self.command(json!(["set_property", name, value])).await.map(|_| ())
    }
}

#[async_trait]
impl MediaEngine for MpvEngine {
    async fn start(&mut self, events: EngineEventSender) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        if self.writer.is_some() || self.child.is_some() {
            debug!("Previous mpv is gone, clearing it out before relaunch");
            self.quit().await?;
        }

        // leftover from a crashed run would make connect() hit a dead socket
        let _ = std::fs::remove_file(&self.options.socket_path);

        info!("Launching mpv (video: {})", self.options.video_mode);
        self.child = Some(self.spawn_process()?);

        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                if let Some(mut child) = self.child.take() {
                    let _ = child.kill().await;
                }
                return Err(e);
            }
        };
        self.attach(stream, events);

        self.command(json!(["observe_property", OBS_PAUSE, "pause"])).await?;
        self.command(json!(["observe_property", OBS_TIME_POS, "time-pos"])).await?;
        debug!("mpv ready on {}", self.options.socket_path.display());
        Ok(())
    }

    async fn load(&mut self, uri: &str) -> Result<()> {
        self.command(json!(["loadfile", uri, "replace"])).await?;
        // pause sticks across loadfile
        self.set_property("pause", json!(false)).await
    }

    async fn resume(&mut self) -> Result<()> {
        self.set_property("pause", json!(false)).await
    }

    async fn pause(&mut self) -> Result<()> {
        self.set_property("pause", json!(true)).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.command(json!(["stop"])).await.map(|_| ())
    }

    async fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.set_property("volume", json!(volume)).await
    }

    async fn set_mute(&mut self, muted: bool) -> Result<()> {
        self.set_property("mute", json!(muted)).await
    }

    async fn time_position(&mut self) -> Result<Option<f64>> {
        // "property unavailable" while nothing is loaded
        match self.command(json!(["get_property", "time-pos"])).await {
            Ok(data) => Ok(data.as_f64()),
            Err(_) => Ok(None),
        }
    }

    fn is_alive(&self) -> bool {
        self.writer.is_some() && self.alive.load(Ordering::SeqCst)
    }

    async fn quit(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.writer.is_some() {
            // no reply comes back, mpv hangs up instead
            let _ = self.send_line(&encode_command(&json!(["quit"]), 0)).await;
            self.writer = None;
        }
        self.alive.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(_) => debug!("mpv exited"),
                Err(_) => {
                    warn!("mpv ignored quit, killing it");
                    let _ = child.kill().await;
                }
            }
        }

        let _ = std::fs::remove_file(&self.options.socket_path);
        Ok(())
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
    // a panicked holder can't leave the map half-written, so poisoning is ignorable
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode_command(args: &Value, request_id: u64) -> String {
    let mut line = json!({ "command": args, "request_id": request_id }).to_string();
    line.push('\n');
    line
}

fn route_message(line: &str, pending: &Pending, events: &EngineEventSender) {
    let Ok(msg) = serde_json::from_str::<Value>(line) else {
        debug!("Skipping non-JSON line from mpv: {}", line);
        return;
    };

    if let Some(id) = msg.get("request_id").and_then(Value::as_u64) {
        if let Some(tx) = lock(pending).remove(&id) {
            let _ = tx.send(msg);
        }
        return;
    }

    if let Some(event) = map_event(&msg) {
        let _ = events.send(event);
    }
}

/// mpv push message -> engine event, None for the ones the session doesn't care about
fn map_event(msg: &Value) -> Option<EngineEvent> {
    match msg.get("event").and_then(Value::as_str)? {
        "playback-restart" => Some(EngineEvent::Started),
        "end-file" => {
            // "redirect" comes from loadfile, "quit" from shutdown
            let reason = msg.get("reason").and_then(Value::as_str).unwrap_or("");
            debug!("mpv end-file reason={}", reason);
            match reason {
                "eof" | "error" => Some(EngineEvent::Stopped),
                "stop" => Some(EngineEvent::StopConfirmed),
                _ => None,
            }
        }
        "property-change" => match msg.get("name").and_then(Value::as_str)? {
            "pause" => {
                let paused = msg.get("data").and_then(Value::as_bool) == Some(true);
                paused.then_some(EngineEvent::Paused)
            }
            "time-pos" => msg.get("data").and_then(Value::as_f64).map(EngineEvent::TimePosition),
            _ => None,
        },
        _ => None,
    }
}
