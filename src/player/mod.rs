// Playback - a session driving an external media engine (mpv)
// The engine does the decoding, we just tell it what to do and listen for what happened

#[cfg(all(feature = "mpv", unix))]
pub mod mpv;     // mpv over its JSON IPC socket
pub mod session; // state machine + auto-restart

#[cfg(all(feature = "mpv", unix))]
pub use mpv::{MpvEngine, MpvOptions};
pub use session::{PlaybackSession, SessionEvent, SessionOptions, SessionStatus};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Loading,
    Playing,
    Paused,
    Error,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Things the engine tells us on its own
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    Paused,
    /// Playback ended without us asking, or the engine went away
    Stopped,
    /// The engine finished a stop we asked for
    StopConfirmed,
    TimePosition(f64),
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Control surface of whatever actually plays the stream
#[async_trait]
pub trait MediaEngine: Send {
    /// Bring the engine up. Events get pushed into `events` from here on.
    async fn start(&mut self, events: EngineEventSender) -> Result<()>;

    async fn load(&mut self, uri: &str) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// 0-100
    async fn set_volume(&mut self, volume: u8) -> Result<()>;

    async fn set_mute(&mut self, muted: bool) -> Result<()>;

    /// Seconds into the stream, if the engine knows
    async fn time_position(&mut self) -> Result<Option<f64>>;

    /// False once the engine went away on its own and needs another start()
    fn is_alive(&self) -> bool {
        true
    }

    /// Shut the engine down for good
    async fn quit(&mut self) -> Result<()>;
}
