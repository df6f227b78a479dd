// Playback session - one engine, one state, one control loop
// Everything (caller commands, engine events, restart timers) funnels through a single task,
// so nothing ever touches the state concurrently.
//
// Auto-restart: if the engine stops on its own while we're Playing, reload the same station
// after 2s / 4s / 6s. A 4th drop in a row is left alone. A caller stop() never restarts.

use super::{EngineEvent, EngineEventSender, MediaEngine, PlaybackState};
use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::stations::StationRecord;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub initial_volume: u8,
    pub restart_policy: BackoffPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            initial_volume: 50,
            restart_policy: BackoffPolicy::restart(),
        }
    }
}

/// Point-in-time copy of the session's fields
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: PlaybackState,
    pub current_station: Option<StationRecord>,
    pub volume: u8,
    pub muted: bool,
    pub intentional_stop: bool,
    pub restart_attempts: u32,
    pub restart_pending: bool,
}

/// What the session reports to whoever is listening (UI, logs)
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: PlaybackState, to: PlaybackState },
    RestartScheduled { attempt: u32, delay: Duration },
    RestartsExhausted { attempts: u32 },
    VolumeChanged(u8),
    MuteChanged(bool),
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    LoadStation(StationRecord, Reply<()>),
    Play(Reply<()>),
    Pause(Reply<()>),
    Stop(Reply<()>),
    TogglePause(Reply<()>),
    SetVolume(i32, Reply<u8>),
    VolumeUp(u8, Reply<u8>),
    VolumeDown(u8, Reply<u8>),
    ToggleMute(Reply<bool>),
    Status(Reply<SessionStatus>),
    TimePosition(Reply<Option<f64>>),
    Cleanup(Reply<()>),
}

/// Handle to the session's control loop. Cheap to clone; the loop (and the engine)
/// shuts down once the last handle is dropped.
#[derive(Clone)]
pub struct PlaybackSession {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl PlaybackSession {
    /// Must be called from inside a tokio runtime
    pub fn spawn(engine: Box<dyn MediaEngine>, options: SessionOptions) -> Self {
        let (commands, command_rx) = mpsc::channel(32);
        let (events, _) = broadcast::channel(64);

        let core = SessionCore::new(engine, options, events.clone());
        tokio::spawn(core.run(command_rx));

        Self { commands, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn load_station(&self, station: StationRecord) -> Result<()> {
        self.request(|r| Command::LoadStation(station, r)).await
    }

    pub async fn play(&self) -> Result<()> {
        self.request(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    pub async fn toggle_pause(&self) -> Result<()> {
        self.request(Command::TogglePause).await
    }

    pub async fn set_volume(&self, volume: i32) -> Result<u8> {
        self.request(|r| Command::SetVolume(volume, r)).await
    }

    pub async fn volume_up(&self, step: u8) -> Result<u8> {
        self.request(|r| Command::VolumeUp(step, r)).await
    }

    pub async fn volume_down(&self, step: u8) -> Result<u8> {
        self.request(|r| Command::VolumeDown(step, r)).await
    }

    /// Returns the new mute flag
    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(Command::ToggleMute).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(Command::Status).await
    }

    pub async fn state(&self) -> Result<PlaybackState> {
        Ok(self.status().await?.state)
    }

    pub async fn time_position(&self) -> Result<Option<f64>> {
        self.request(Command::TimePosition).await
    }

    /// stop() and release the engine. Safe to call more than once.
    pub async fn cleanup(&self) -> Result<()> {
        self.request(Command::Cleanup).await
    }
}

struct PendingRestart {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SessionCore {
    engine: Box<dyn MediaEngine>,
    engine_started: bool,
    engine_tx: EngineEventSender,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,

    state: PlaybackState,
    current_station: Option<StationRecord>,
    volume: u8,
    muted: bool,
    intentional_stop: bool,
    restart_attempts: u32,
    last_position: Option<f64>,

    policy: BackoffPolicy,
    pending_restart: Option<PendingRestart>,
    restart_generation: u64,
    timer_tx: mpsc::UnboundedSender<u64>,
    timer_rx: mpsc::UnboundedReceiver<u64>,

    events: broadcast::Sender<SessionEvent>,
}

impl SessionCore {
    fn new(
        engine: Box<dyn MediaEngine>,
        options: SessionOptions,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        Self {
            engine,
            engine_started: false,
            engine_tx,
            engine_rx,
            state: PlaybackState::Stopped,
            current_station: None,
            volume: options.initial_volume.min(100),
            muted: false,
            intentional_stop: false,
            restart_attempts: 0,
            last_position: None,
            policy: options.restart_policy,
            pending_restart: None,
            restart_generation: 0,
            timer_tx,
            timer_rx,
            events,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Playback session loop started");

        loop {
            // timers and engine news first, so a command never races an event that already happened
            tokio::select! {
                biased;
                Some(generation) = self.timer_rx.recv() => self.on_restart_due(generation).await,
                Some(event) = self.engine_rx.recv() => self.on_engine_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        debug!("All session handles dropped, shutting down");
        let _ = self.cleanup().await;
    }

    async fn handle(&mut self, command: Command) {
        // a caller that stopped waiting is fine, the work is done either way
        match command {
            Command::LoadStation(station, reply) => {
                let _ = reply.send(self.load_station(station).await);
            }
            Command::Play(reply) => {
                let _ = reply.send(self.play().await);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause().await);
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop().await);
            }
            Command::TogglePause(reply) => {
                let result = match self.state {
                    PlaybackState::Playing => self.pause().await,
                    PlaybackState::Paused => self.play().await,
                    _ => Ok(()),
                };
                let _ = reply.send(result);
            }
            Command::SetVolume(volume, reply) => {
                let _ = reply.send(self.set_volume(volume).await);
            }
            Command::VolumeUp(step, reply) => {
                let target = (u16::from(self.volume) + u16::from(step)).min(100);
                let _ = reply.send(self.set_volume(i32::from(target)).await);
            }
            Command::VolumeDown(step, reply) => {
                let target = self.volume.saturating_sub(step);
                let _ = reply.send(self.set_volume(i32::from(target)).await);
            }
            Command::ToggleMute(reply) => {
                let _ = reply.send(self.toggle_mute().await);
            }
            Command::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
            Command::TimePosition(reply) => {
                let _ = reply.send(Ok(self.time_position().await));
            }
            Command::Cleanup(reply) => {
                let _ = reply.send(self.cleanup().await);
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            current_station: self.current_station.clone(),
            volume: self.volume,
            muted: self.muted,
            intentional_stop: self.intentional_stop,
            restart_attempts: self.restart_attempts,
            restart_pending: self.pending_restart.is_some(),
        }
    }

    async fn ensure_engine(&mut self) -> Result<()> {
        if self.engine_started {
            if self.engine.is_alive() {
                return Ok(());
            }
            warn!("Media engine went away, starting it again");
            self.engine_started = false;
        }

        debug!("Starting media engine");
        self.engine
            .start(self.engine_tx.clone())
            .await
            .map_err(engine_error)?;
        self.engine_started = true;

        self.engine.set_volume(self.volume).await.map_err(engine_error)?;
        if self.muted {
            self.engine.set_mute(true).await.map_err(engine_error)?;
        }
        info!("Media engine ready");
        Ok(())
    }

    async fn load_station(&mut self, station: StationRecord) -> Result<()> {
        if station.source_uri.trim().is_empty() {
            return Err(Error::validation("station source URI cannot be empty"));
        }

        self.ensure_engine().await?;

        // picking a station is the caller stepping in - any reconnect streak is over
        self.cancel_pending_restart();
        self.restart_attempts = 0;

        info!("Loading station: {}", station.name);
        self.current_station = Some(station);
        self.set_state(PlaybackState::Loading);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let Some(station) = self.current_station.clone() else {
            return Err(Error::validation("no station loaded"));
        };

        self.ensure_engine().await?;

        match self.state {
            PlaybackState::Paused => {
                info!("Resuming playback");
                self.engine.resume().await.map_err(engine_error)?;
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Playing => {
                debug!("play() while already playing, nothing to do");
                Ok(())
            }
            _ => self.start_stream(&station).await,
        }
    }

    async fn start_stream(&mut self, station: &StationRecord) -> Result<()> {
        info!("Starting playback: {}", station.name);
        self.intentional_stop = false;

        match self.engine.load(&station.source_uri).await {
            Ok(()) => {
                self.cancel_pending_restart();
                self.set_state(PlaybackState::Playing);
                Ok(())
            }
            Err(e) => {
                let e = engine_error(e);
                error!("Failed to start playback: {}", e);
                self.set_state(PlaybackState::Error);
                Err(e)
            }
        }
    }

    async fn pause(&mut self) -> Result<()> {
        if self.state != PlaybackState::Playing || !self.engine_started {
            return Ok(());
        }

        info!("Pausing playback");
        self.engine.pause().await.map_err(engine_error)?;
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel_pending_restart();

        let active = matches!(self.state, PlaybackState::Playing | PlaybackState::Paused);
        if !active || !self.engine_started {
            return Ok(());
        }

        info!("Stopping playback");
        // raised before the engine hears about it, lowered when its stop echo comes back
        // (or the next start) - so the echo can't look like a dropped stream
        self.intentional_stop = true;
        let result = self.engine.stop().await;
        if result.is_err() {
            // no echo is coming for a stop the engine refused
            self.intentional_stop = false;
        }
        self.set_state(PlaybackState::Stopped);
        result.map_err(engine_error)
    }

    async fn set_volume(&mut self, volume: i32) -> Result<u8> {
        if !(0..=100).contains(&volume) {
            return Err(Error::validation(format!(
                "volume must be between 0 and 100, got {volume}"
            )));
        }

        let volume = volume as u8;
        self.volume = volume;
        debug!("Volume set to {}", volume);

        if self.engine_started {
            self.engine.set_volume(volume).await.map_err(engine_error)?;
        }
        self.emit(SessionEvent::VolumeChanged(volume));
        Ok(volume)
    }

    async fn toggle_mute(&mut self) -> Result<bool> {
        self.muted = !self.muted;
        debug!("Mute: {}", self.muted);

        if self.engine_started {
            self.engine.set_mute(self.muted).await.map_err(engine_error)?;
        }
        self.emit(SessionEvent::MuteChanged(self.muted));
        Ok(self.muted)
    }

    async fn time_position(&mut self) -> Option<f64> {
        let active = matches!(self.state, PlaybackState::Playing | PlaybackState::Paused);
        if !self.engine_started || !active {
            return None;
        }
        match self.engine.time_position().await {
            Ok(position) => position.or(self.last_position),
            Err(_) => self.last_position,
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        info!("Cleaning up player...");
        if let Err(e) = self.stop().await {
            warn!("Stop during cleanup failed: {}", e);
        }

        if self.engine_started {
            if let Err(e) = self.engine.quit().await {
                debug!("Ignoring engine error on quit: {}", e);
            }
            self.engine_started = false;
        }

        info!("Player cleanup complete");
        Ok(())
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Started => {
                debug!("Engine reports playback started");
                self.restart_attempts = 0;
                self.cancel_pending_restart();
                if matches!(self.state, PlaybackState::Loading | PlaybackState::Paused)
                    && self.current_station.is_some()
                {
                    self.set_state(PlaybackState::Playing);
                }
            }
            EngineEvent::Paused => {
                debug!("Engine reports paused");
                if self.state == PlaybackState::Playing {
                    self.set_state(PlaybackState::Paused);
                }
            }
            EngineEvent::StopConfirmed => {
                if self.intentional_stop {
                    debug!("Engine confirmed the requested stop");
                    self.intentional_stop = false;
                } else {
                    debug!("Stop confirmation with no stop outstanding, ignoring");
                }
            }
            EngineEvent::Stopped => {
                if self.intentional_stop {
                    debug!("Engine went quiet after a requested stop");
                    self.intentional_stop = false;
                    return;
                }
                match self.state {
                    PlaybackState::Playing => self.on_unsolicited_stop(),
                    PlaybackState::Paused => self.set_state(PlaybackState::Stopped),
                    other => debug!("Engine stop while {}, ignoring", other),
                }
            }
            EngineEvent::TimePosition(position) => {
                self.last_position = Some(position);
            }
        }
    }

    fn on_unsolicited_stop(&mut self) {
        self.set_state(PlaybackState::Stopped);

        let attempt = self.restart_attempts + 1;
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                self.restart_attempts = attempt;
                warn!(
                    "Stream stopped unexpectedly, reconnecting in {:?} (attempt {}/{})",
                    delay,
                    attempt,
                    self.policy.max_attempts()
                );
                self.schedule_restart(delay);
                self.emit(SessionEvent::RestartScheduled { attempt, delay });
            }
            None => {
                warn!(
                    "Stream stopped again after {} reconnect attempts, giving up",
                    self.restart_attempts
                );
                self.emit(SessionEvent::RestartsExhausted {
                    attempts: self.restart_attempts,
                });
            }
        }
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.cancel_pending_restart();

        self.restart_generation += 1;
        let generation = self.restart_generation;
        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(generation);
        });

        self.pending_restart = Some(PendingRestart { generation, handle });
    }

    fn cancel_pending_restart(&mut self) {
        if let Some(pending) = self.pending_restart.take() {
            debug!("Cancelling pending reconnect #{}", pending.generation);
            pending.handle.abort();
        }
    }

    async fn on_restart_due(&mut self, generation: u64) {
        match &self.pending_restart {
            Some(pending) if pending.generation == generation => {}
            _ => {
                debug!("Stale reconnect timer #{} ignored", generation);
                return;
            }
        }
        self.pending_restart = None;

        let Some(station) = self.current_station.clone() else {
            return;
        };

        info!("Reconnecting to {}", station.name);
        self.set_state(PlaybackState::Loading);
        if let Err(e) = self.ensure_engine().await {
            error!("Could not bring the media engine back: {}", e);
            self.set_state(PlaybackState::Error);
            return;
        }
        if let Err(e) = self.start_stream(&station).await {
            warn!("Reconnect failed: {}", e);
        }
    }

    fn set_state(&mut self, new_state: PlaybackState) {
        let old_state = self.state;
        self.state = new_state;

        if old_state != new_state {
            debug!("State changed: {} -> {}", old_state, new_state);
            self.emit(SessionEvent::StateChanged {
                from: old_state,
                to: new_state,
            });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Anything the engine throws back counts as an engine rejection
fn engine_error(e: Error) -> Error {
    match e {
        Error::MediaEngine(_) => e,
        other => Error::MediaEngine(other.to_string()),
    }
}
