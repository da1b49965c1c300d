use anyhow::{Context, Result};
use std::path::Path;

use crate::ConfigError;

/// Class-index to name lookup for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    /// Loads a TFLite label map: one label per line. A leading `???`
    /// placeholder (background class) is dropped.
    pub fn load_labelmap(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read label map {}", path.display()))?;
        let labels = Self::parse_labelmap(&raw);
        anyhow::ensure!(!labels.is_empty(), ConfigError::EmptyLabels(path.to_path_buf()));
        Ok(labels)
    }

    /// Loads a gesture label CSV, taking the first column of every non-empty row.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read gesture labels {}", path.display()))?;
        let labels = Self::parse_csv(&raw);
        anyhow::ensure!(!labels.is_empty(), ConfigError::EmptyLabels(path.to_path_buf()));
        Ok(labels)
    }

    pub fn parse_labelmap(raw: &str) -> Self {
        let mut labels: Vec<String> = raw.lines().map(|l| l.trim().to_string()).collect();
        if labels.first().map(String::as_str) == Some("???") {
            labels.remove(0);
        }
        Self(labels)
    }

    pub fn parse_csv(raw: &str) -> Self {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        Self(
            raw.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| {
                    let first = l.split(',').next().unwrap_or_default();
                    first.trim().trim_matches('"').to_string()
                })
                .collect(),
        )
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn labelmap_drops_background_placeholder() {
        let labels = Labels::parse_labelmap("???\nperson\nbicycle\n???\ncar\n");
        assert_eq!(labels.get(0), Some("person"));
        // interior placeholders keep class indices aligned
        assert_eq!(labels.get(2), Some("???"));
        assert_eq!(labels.get(3), Some("car"));
        assert_eq!(labels.len(), 4);
    }

    #[test]
    fn csv_takes_first_column_and_strips_bom() {
        let labels = Labels::parse_csv("\u{feff}Open\r\nClose,1\n\n\"Pointer\"\nOK\nLove\n");
        assert_eq!(labels.len(), 5);
        assert_eq!(labels.get(0), Some("Open"));
        assert_eq!(labels.get(1), Some("Close"));
        assert_eq!(labels.get(2), Some("Pointer"));
        assert_eq!(labels.get(5), None);
    }

    #[test]
    fn load_from_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"person\ncar\n").unwrap();
        let labels = Labels::load_labelmap(f.path()).unwrap();
        assert_eq!(labels.get(1), Some("car"));
    }

    #[test]
    fn empty_or_missing_files_fail() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = Labels::load_csv(f.path()).unwrap_err();
        assert!(err.to_string().contains("has no labels"));
        assert!(Labels::load_labelmap("/nonexistent/labelmap.txt").is_err());
    }
}
