// Station catalog - what can be played right now
// Filled once at startup from the resolver, or from the built-in list when that comes up empty

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A playable station. Never edited in place, the catalog swaps whole sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: String,
    pub name: String,
    pub source_uri: String,
    pub description: String,
    pub genre: String,
}

impl StationRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_uri: impl Into<String>,
        description: impl Into<String>,
        genre: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_uri: source_uri.into(),
            description: description.into(),
            genre: genre.into(),
        }
    }
}

/// The four long-running Lofi Girl radios, used whenever discovery finds nothing
pub fn default_stations() -> Vec<StationRecord> {
    vec![
        StationRecord::new(
            "lofi-hip-hop",
            "Lofi Hip Hop Radio",
            "https://www.youtube.com/watch?v=jfKfPfyJRdk",
            "24/7 chill lofi hip hop beats to study/relax to",
            "lofi-hip-hop",
        ),
        StationRecord::new(
            "lofi-sleep",
            "Lofi Sleep Radio",
            "https://www.youtube.com/watch?v=rUxyKA_-grg",
            "Calming lofi beats for sleep and meditation",
            "lofi-sleep",
        ),
        StationRecord::new(
            "lofi-jazz",
            "Lofi Jazz Radio",
            "https://www.youtube.com/watch?v=Dx5qFachd3A",
            "Smooth jazz with lofi aesthetics",
            "lofi-jazz",
        ),
        StationRecord::new(
            "lofi-study",
            "Lofi Study Radio",
            "https://www.youtube.com/watch?v=f02mOEt11OQ",
            "Focus-enhancing lofi beats for studying",
            "lofi-study",
        ),
    ]
}

/// Id -> station lookup that keeps the order stations were handed in
#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    order: Vec<String>,
    stations: HashMap<String, StationRecord>,
}

impl StationCatalog {
    pub fn new(records: Vec<StationRecord>) -> Self {
        let mut catalog = Self::default();
        catalog.replace_all(records);
        catalog
    }

    pub fn with_defaults() -> Self {
        Self::new(default_stations())
    }

    /// All stations in catalog order
    pub fn get_all(&self) -> Vec<StationRecord> {
        self.order
            .iter()
            .filter_map(|id| self.stations.get(id))
            .cloned()
            .collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<StationRecord> {
        self.stations.get(id).cloned()
    }

    /// Throw away the current set and take the new one.
    /// A repeated id keeps its first position but the later record wins.
    pub fn replace_all(&mut self, records: Vec<StationRecord>) {
        self.order.clear();
        self.stations.clear();

        for record in records {
            if !self.stations.contains_key(&record.id) {
                self.order.push(record.id.clone());
            }
            self.stations.insert(record.id.clone(), record);
        }

        debug!("Station catalog now holds {} stations", self.order.len());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, name: &str) -> StationRecord {
        StationRecord::new(id, name, format!("https://example.com/{id}"), "", "lofi")
    }

    #[test]
    fn test_defaults_loaded() {
        let catalog = StationCatalog::with_defaults();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.contains("lofi-hip-hop"));
        assert_eq!(
            catalog.get_by_id("lofi-jazz").unwrap().source_uri,
            "https://www.youtube.com/watch?v=Dx5qFachd3A"
        );
        assert!(catalog.get_by_id("nope").is_none());
    }

    #[test]
    fn test_get_all_keeps_order() {
        let catalog =
            StationCatalog::new(vec![station("b", "B"), station("a", "A"), station("c", "C")]);
        let ids: Vec<_> = catalog.get_all().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_replace_all_is_wholesale() {
        let mut catalog = StationCatalog::with_defaults();
        catalog.replace_all(vec![station("live-1", "One"), station("live-2", "Two")]);

        assert_eq!(catalog.len(), 2);
        assert!(!catalog.contains("lofi-hip-hop"));
        assert_eq!(catalog.get_by_id("live-2").unwrap().name, "Two");

        catalog.replace_all(Vec::new());
        assert!(catalog.is_empty());
        assert!(catalog.get_all().is_empty());
    }

    #[test]
    fn test_duplicate_id_last_wins() {
        let catalog = StationCatalog::new(vec![
            station("x", "First"),
            station("y", "Y"),
            station("x", "Second"),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get_by_id("x").unwrap().name, "Second");
        assert_eq!(catalog.get_all()[0].id, "x");
    }
}
