// lofiterm - terminal lofi radio
// Scan the channel for live streams, pick one, hand it to mpv, keep it alive

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lofiterm::bootstrap::{bootstrap_until, BootstrapOutcome};
use lofiterm::config::{Config, LoggingConfig};
use lofiterm::deps;
use lofiterm::error::redact_secret;
use lofiterm::resolver::{ReqwestTransport, SourceResolver};
use lofiterm::{StationCatalog, StationRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lofiterm")]
#[command(version, about = "Lofi Girl radio in your terminal")]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long, global = true)]
    dev: bool,

    /// YouTube Data API key, overrides config and YOUTUBE_API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Play a station (the default command)
    Play {
        /// Station id, see `lofiterm list`
        #[arg(short, long)]
        station: Option<String>,

        /// Starting volume, 0-100
        #[arg(short, long, allow_negative_numbers = true)]
        volume: Option<i32>,

        /// Open the video instead of audio only
        #[arg(long)]
        video: bool,
    },
    /// List available stations
    List,
    /// Show details for one station
    StationInfo { id: String },
    /// Scan the channel for live streams and print what was found
    Scan,
    /// Check that mpv and yt-dlp are installed
    Check,
    /// Show the version and the settings in effect
    Info,
}

fn init_logging(dev: bool, logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.log_dir)
        .with_context(|| format!("creating log dir {}", logging.log_dir.display()))?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&logging.log_dir, "lofiterm.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins, then the configured directives
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);

    // dev mode also logs to stderr
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    if dev {
        eprintln!("🔧 Dev mode: Debug output enabled to stderr + file");
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(key) = args.api_key.clone() {
        config.youtube.api_key = Some(key);
    }

    let _log_guard = init_logging(args.dev, &config.logging)?;
    info!("🎵 lofiterm starting up");

    match args.command.unwrap_or(Cmd::Play {
        station: None,
        volume: None,
        video: false,
    }) {
        Cmd::Play { station, volume, video } => cmd_play(&config, station, volume, video).await,
        Cmd::List => cmd_list(&config).await,
        Cmd::StationInfo { id } => cmd_station_info(&config, &id).await,
        Cmd::Scan => cmd_scan(&config).await,
        Cmd::Check => cmd_check(),
        Cmd::Info => cmd_info(&config),
    }
}

fn build_resolver(config: &Config) -> Result<SourceResolver> {
    let transport = ReqwestTransport::new(
        Duration::from_secs(config.network.connect_timeout_secs),
        Duration::from_secs(config.network.request_timeout_secs),
    )
    .context("building HTTP client")?;

    Ok(SourceResolver::new(Arc::new(transport))
        .with_channel(&config.youtube.channel_id, &config.youtube.streams_url))
}

/// Startup scan; ctrl-c skips it and goes with the built-in stations
async fn load_catalog(config: &Config) -> Result<StationCatalog> {
    let resolver = build_resolver(config)?;

    println!("🔍 Scanning for live streams... (ctrl-c to skip)");
    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let (catalog, outcome) = bootstrap_until(&resolver, config.api_key(), cancel).await;

    match outcome {
        BootstrapOutcome::Live(n) => println!("✅ Found {n} live streams"),
        BootstrapOutcome::Defaults => {
            println!("📻 No live streams found, using default stations")
        }
    }
    Ok(catalog)
}

async fn cmd_list(config: &Config) -> Result<()> {
    let catalog = load_catalog(config).await?;

    println!("\nAvailable stations:\n");
    for station in catalog.get_all() {
        println!("  {:<16} {}", station.id, station.name);
        println!("  {:<16} {}", "", station.description);
    }
    Ok(())
}

async fn cmd_station_info(config: &Config, id: &str) -> Result<()> {
    let catalog = load_catalog(config).await?;
    let Some(station) = catalog.get_by_id(id) else {
        bail!("Unknown station '{id}', run `lofiterm list` to see what's available");
    };

    print_station(&station);
    Ok(())
}

async fn cmd_scan(config: &Config) -> Result<()> {
    let resolver = build_resolver(config)?;
    let stations = resolver.resolve(config.api_key()).await;

    if stations.is_empty() {
        println!("No live streams found (every discovery method came up empty)");
        return Ok(());
    }
    for station in &stations {
        print_station(station);
        println!();
    }
    Ok(())
}

fn cmd_info(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    print!("{}", describe_config(config, &path));
    Ok(())
}

/// Effective settings (file + env + flags), API key masked
fn describe_config(config: &Config, path: &std::path::Path) -> String {
    let api_key = match config.api_key() {
        Some(key) => format!("configured ({})", redact_secret(key, Some(key))),
        None => "not set, discovery starts at the RSS feed".to_string(),
    };
    let player = &config.player;

    let mut out = format!("🎵 lofiterm {}\n", env!("CARGO_PKG_VERSION"));
    out.push_str(&format!("   config:          {}\n", path.display()));
    out.push_str(&format!("   api key:         {api_key}\n"));
    out.push_str(&format!("   channel:         {}\n", config.youtube.channel_id));
    out.push_str(&format!("   default station: {}\n", player.default_station));
    out.push_str(&format!("   default volume:  {}\n", player.default_volume));
    out.push_str(&format!("   volume step:     {}\n", player.volume_step));
    out.push_str(&format!("   mpv:             {}\n", player.mpv_path.display()));
    out.push_str(&format!("   video mode:      {}\n", player.video_mode));
    out.push_str(&format!(
        "   timeouts:        connect {}s, request {}s\n",
        config.network.connect_timeout_secs, config.network.request_timeout_secs
    ));
    out.push_str(&format!("   log dir:         {}\n", config.logging.log_dir.display()));
    out.push_str(&format!("   log filter:      {}\n", config.logging.filter));
    out
}

fn cmd_check() -> Result<()> {
    let report = deps::check();

    match &report.mpv {
        Some(path) => println!("✅ mpv: {}", path.display()),
        None => println!("❌ mpv: not found"),
    }
    match &report.extractor {
        Some((name, path)) => println!("✅ {name}: {}", path.display()),
        None => println!("❌ yt-dlp/youtube-dl: not found"),
    }
    println!("{}", report.install_instructions());

    if !report.all_present() {
        bail!("missing dependencies");
    }
    Ok(())
}

fn print_station(station: &StationRecord) {
    println!("📻 {}", station.name);
    println!("   id:    {}", station.id);
    println!("   genre: {}", station.genre);
    println!("   url:   {}", station.source_uri);
    println!("   {}", station.description);
}

/// Explicit -s must exist; a configured default that isn't in this catalog
/// (live scans use live-N ids) falls back to the first station
fn pick_station(
    catalog: &StationCatalog,
    requested: Option<&str>,
    default_id: &str,
) -> Result<StationRecord> {
    if let Some(id) = requested {
        return catalog.get_by_id(id).with_context(|| {
            format!("Unknown station '{id}', run `lofiterm list` to see what's available")
        });
    }

    catalog
        .get_by_id(default_id)
        .or_else(|| catalog.get_all().into_iter().next())
        .context("no stations available")
}

#[cfg(all(feature = "mpv", unix))]
async fn cmd_play(
    config: &Config,
    station: Option<String>,
    volume: Option<i32>,
    video: bool,
) -> Result<()> {
    use lofiterm::player::{MpvEngine, MpvOptions, PlaybackSession, SessionOptions};

    let report = deps::check();
    if !report.all_present() {
        println!("{}", report.install_instructions());
        bail!("mpv and yt-dlp are needed for playback");
    }

    let catalog = load_catalog(config).await?;
    let station = pick_station(&catalog, station.as_deref(), &config.player.default_station)?;

    let engine = MpvEngine::new(MpvOptions {
        mpv_path: config.player.mpv_path.clone(),
        video_mode: video || config.player.video_mode,
        ..MpvOptions::default()
    });
    let session = PlaybackSession::spawn(
        Box::new(engine),
        SessionOptions {
            initial_volume: config.player.default_volume,
            ..SessionOptions::default()
        },
    );

    if let Some(volume) = volume {
        session.set_volume(volume).await?;
    }

    let result = interactive::run(&session, &catalog, station, config.player.volume_step).await;
    session.cleanup().await?;
    result
}

#[cfg(not(all(feature = "mpv", unix)))]
async fn cmd_play(
    _config: &Config,
    _station: Option<String>,
    _volume: Option<i32>,
    _video: bool,
) -> Result<()> {
    bail!("playback needs the `mpv` feature on a unix system")
}

#[cfg(all(feature = "mpv", unix))]
mod interactive {
    // Line-based controls: type a key, hit enter

    use super::*;
    use lofiterm::player::{PlaybackSession, PlaybackState, SessionEvent};
    use lofiterm::Error;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::broadcast::error::RecvError;
    use tracing::warn;

    pub async fn run(
        session: &PlaybackSession,
        catalog: &StationCatalog,
        first: StationRecord,
        step: u8,
    ) -> Result<()> {
        let stations = catalog.get_all();
        let mut index = stations.iter().position(|s| s.id == first.id).unwrap_or(0);

        let printer = tokio::spawn(print_events(session.subscribe()));

        println!("\n🎵 Now playing: {}", first.name);
        session.load_station(first).await?;
        session.play().await?;
        print_controls();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => line?,
            };
            // stdin closed
            let Some(line) = line else { break };

            let outcome = match line.trim() {
                "q" => break,
                "" | "p" => session.toggle_pause().await,
                "r" => session.play().await,
                "s" => session.stop().await,
                "+" => session.volume_up(step).await.map(|_| ()),
                "-" => session.volume_down(step).await.map(|_| ()),
                "m" => session.toggle_mute().await.map(|_| ()),
                "n" | "b" if !stations.is_empty() => {
                    index = if line.trim() == "n" {
                        (index + 1) % stations.len()
                    } else {
                        (index + stations.len() - 1) % stations.len()
                    };
                    let next = stations[index].clone();
                    println!("⏭  {}", next.name);
                    match session.load_station(next).await {
                        Ok(()) => session.play().await,
                        Err(e) => Err(e),
                    }
                }
                "i" => print_status(session).await,
                "h" | "?" => {
                    print_controls();
                    Ok(())
                }
                other => {
                    println!("Unknown command '{other}', h for help");
                    Ok(())
                }
            };

            match outcome {
                Ok(()) => {}
                Err(Error::SessionClosed) => break,
                Err(e) => {
                    warn!("Command failed: {}", e);
                    println!("⚠️  {e}");
                }
            }
        }

        printer.abort();
        println!("👋 Bye");
        Ok(())
    }

    fn print_controls() {
        println!("Controls: [enter/p] pause  [r] play  [s] stop  [+/-] volume  [m] mute");
        println!("          [n/b] next/prev station  [i] info  [q] quit");
    }

    async fn print_status(session: &PlaybackSession) -> lofiterm::Result<()> {
        let status = session.status().await?;
        let position = session.time_position().await?;

        let name = status
            .current_station
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("-");
        println!("📻 {name}");
        println!(
            "   {}  vol {}{}",
            status.state,
            status.volume,
            if status.muted { " (muted)" } else { "" }
        );
        if let Some(secs) = position {
            let secs = secs as u64;
            println!("   {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
        }
        Ok(())
    }

    async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => match event {
                    SessionEvent::StateChanged { to, .. } => match to {
                        PlaybackState::Playing => println!("▶️  Playing"),
                        PlaybackState::Paused => println!("⏸  Paused"),
                        PlaybackState::Stopped => println!("⏹  Stopped"),
                        PlaybackState::Loading => println!("⏳ Loading..."),
                        PlaybackState::Error => println!("❌ Playback error"),
                    },
                    SessionEvent::RestartScheduled { attempt, delay } => {
                        let secs = delay.as_secs();
                        println!("📡 Stream dropped, reconnecting in {secs}s ({attempt}/3)")
                    }
                    SessionEvent::RestartsExhausted { attempts } => {
                        println!("💔 Stream keeps dropping, gave up after {attempts} tries.");
                        println!("   Press r to retry.")
                    }
                    SessionEvent::VolumeChanged(v) => println!("🔊 Volume: {v}"),
                    SessionEvent::MuteChanged(true) => println!("🔇 Muted"),
                    SessionEvent::MuteChanged(false) => println!("🔊 Unmuted"),
                },
                Err(RecvError::Lagged(n)) => debug!("Missed {} session events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }
}
