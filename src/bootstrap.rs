// Startup: ask the resolver once, fill the catalog with whatever it found
// Nothing found (or everything broke) means the built-in stations

use crate::resolver::SourceResolver;
use crate::stations::{default_stations, StationCatalog, StationRecord};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Catalog holds this many discovered live stations
    Live(usize),
    /// Discovery came up empty, catalog holds the defaults
    Defaults,
}

pub async fn bootstrap(
    resolver: &SourceResolver,
    api_key: Option<&str>,
) -> (StationCatalog, BootstrapOutcome) {
    let live = resolver.resolve(api_key).await;
    fill(live)
}

/// Same as bootstrap(), but a `cancel` that fires first leaves you with the defaults
pub async fn bootstrap_until<F>(
    resolver: &SourceResolver,
    api_key: Option<&str>,
    cancel: F,
) -> (StationCatalog, BootstrapOutcome)
where
    F: std::future::Future<Output = ()>,
{
    let live = resolver.resolve_until(api_key, cancel).await;
    fill(live)
}

fn fill(live: Vec<StationRecord>) -> (StationCatalog, BootstrapOutcome) {
    if live.is_empty() {
        warn!("No live streams found, using default stations");
        return (StationCatalog::new(default_stations()), BootstrapOutcome::Defaults);
    }

    let count = live.len();
    info!("Loaded {} live streams", count);
    (StationCatalog::new(live), BootstrapOutcome::Live(count))
}
