// lofiterm - lofi radio in the terminal
// Finds what Lofi Girl is streaming right now and keeps mpv playing it

pub mod backoff;   // retry delay math
pub mod bootstrap; // first scan at startup, defaults if it finds nothing
pub mod config;    // settings and preferences
pub mod deps;      // is mpv / yt-dlp installed?
pub mod error;     // error types + API key scrubbing
pub mod player;    // playback session + mpv binding
pub mod resolver;  // live stream discovery
pub mod stations;  // station records and the catalog

// Export the stuff other modules actually use
pub use bootstrap::{bootstrap, BootstrapOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use player::{PlaybackSession, PlaybackState, SessionEvent};
pub use resolver::SourceResolver;
pub use stations::{StationCatalog, StationRecord};
