use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// A single camera entry: human-readable location name plus stream address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEntry {
    /// Raw registry key, e.g. `main_st`.
    pub name: String,
    /// Stream address (HTTP MJPEG or JPEG snapshot URL).
    pub url: String,
}

impl SourceEntry {
    /// Display title: underscores become spaces, each word capitalized.
    pub fn title(&self) -> String {
        display_title(&self.name)
    }
}

/// Static mapping of location names to stream addresses.
///
/// Loaded once per process from a JSON object file and immutable afterwards.
/// Entries are kept sorted by key so display ordering is deterministic.
#[derive(Clone, Debug, Default)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
}

impl SourceRegistry {
    /// Load the registry from a JSON object of `name -> url`.
    ///
    /// A missing file yields an empty registry with a warning rather than an
    /// error; a present but malformed file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(
                "Source registry {} not found, starting with no cameras",
                path.display()
            );
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source registry {}", path.display()))?;
        let map: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse source registry {}", path.display()))?;

        Ok(Self::from_map(map))
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        let mut entries: Vec<SourceEntry> = map
            .into_iter()
            .map(|(name, url)| SourceEntry { name, url })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Display titles, in registry order.
    pub fn titles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.title()).collect()
    }

    pub fn get(&self, index: usize) -> Option<&SourceEntry> {
        self.entries.get(index)
    }

    /// Look up an entry by raw key or by display title (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| {
            e.name.eq_ignore_ascii_case(name) || e.title().eq_ignore_ascii_case(name)
        })
    }
}

/// `main_st` -> `Main St`
fn display_title(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn title_replaces_underscores_and_capitalizes() {
        assert_eq!(display_title("main_st"), "Main St");
        assert_eq!(display_title("fifth_avenue_north"), "Fifth Avenue North");
        assert_eq!(display_title("PLAZA"), "Plaza");
        assert_eq!(display_title(""), "");
    }

    #[test]
    fn titles_match_entry_count() {
        let mut map = HashMap::new();
        map.insert("main_st".to_string(), "http://a/stream".to_string());
        map.insert("oak_park".to_string(), "http://b/stream".to_string());
        map.insert("harbor".to_string(), "http://c/stream".to_string());
        let registry = SourceRegistry::from_map(map);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.titles().len(), 3);
        // Sorted by key: harbor, main_st, oak_park
        assert_eq!(registry.titles(), vec!["Harbor", "Main St", "Oak Park"]);
    }

    #[test]
    fn single_entry_scenario() {
        let mut map = HashMap::new();
        map.insert("main_st".to_string(), "rtsp://x".to_string());
        let registry = SourceRegistry::from_map(map);

        assert_eq!(registry.titles(), vec!["Main St"]);
        assert_eq!(registry.get(0).unwrap().url, "rtsp://x");
    }

    #[test]
    fn missing_file_yields_empty_registry() {
        let registry = SourceRegistry::load("/nonexistent/cctv_sources.json").unwrap();
        assert!(registry.is_empty());
        assert!(registry.titles().is_empty());
    }

    #[test]
    fn loads_json_object_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"main_st": "http://cam/1", "dock_rd": "http://cam/2"}}"#).unwrap();

        let registry = SourceRegistry::load(file.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("Main St").unwrap().url, "http://cam/1");
        assert_eq!(registry.find("dock_rd").unwrap().url, "http://cam/2");
        assert!(registry.find("nowhere").is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(SourceRegistry::load(file.path()).is_err());
    }
}
