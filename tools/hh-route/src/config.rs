//! Engine and builder configuration
//!
//! Both configs deserialize from JSON with every field optional; missing
//! fields take the defaults below. CLI flags are applied on top.

use std::path::Path;
use std::time::Duration;

use hh_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Runtime settings for an opened artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Byte budget of the decoded-block cache
    pub cache_bytes: u64,
    /// Upper bound on one block read; `None` reads on the calling thread
    pub storage_timeout_ms: Option<u64>,
    pub reader_threads: usize,
    /// Check the body checksum at open (reads the whole file once)
    pub verify_checksum: bool,
    pub use_distance_table: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_bytes: 64 * 1024 * 1024,
            storage_timeout_ms: Some(5_000),
            reader_threads: num_cpus::get().clamp(1, 4),
            verify_checksum: true,
            use_distance_table: true,
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn storage_timeout(&self) -> Option<Duration> {
        self.storage_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_bytes == 0 {
            return Err(Error::InvalidInput("cache_bytes must be positive".into()));
        }
        if self.storage_timeout_ms == Some(0) {
            return Err(Error::InvalidInput("storage_timeout_ms must be positive".into()));
        }
        if self.storage_timeout_ms.is_some() && self.reader_threads == 0 {
            return Err(Error::InvalidInput(
                "reader_threads must be positive when storage_timeout_ms is set".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for [`HierarchyBuilder`](crate::build::HierarchyBuilder) and
/// [`ArtifactWriter`](crate::build::ArtifactWriter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Hard cap on the number of levels, top level included
    pub max_levels: u8,
    /// Vertices per block
    pub block_vertices: u32,
    /// Finite neighborhood radius given to every core vertex
    pub neighborhood_radius: u32,
    /// Store hop indices on shortcuts
    pub hop_indices: bool,
    /// Largest top level that still gets a distance table; 0 disables it
    pub distance_table_max_vertices: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_levels: 6,
            block_vertices: 64,
            neighborhood_radius: 0,
            hop_indices: true,
            distance_table_max_vertices: 1_024,
        }
    }
}

impl BuildConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_levels == 0 {
            return Err(Error::InvalidInput("max_levels must be at least 1".into()));
        }
        if self.block_vertices == 0 || self.block_vertices > 1 << 20 {
            return Err(Error::InvalidInput(format!(
                "block_vertices must be in 1..={}, got {}",
                1 << 20,
                self.block_vertices
            )));
        }
        if self.neighborhood_radius == u32::MAX {
            return Err(Error::InvalidInput(
                "neighborhood_radius must be finite".into(),
            ));
        }
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::InvalidInput(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_engine_config_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache_bytes": 1048576, "storage_timeout_ms": null}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache_bytes, 1 << 20);
        assert_eq!(config.storage_timeout(), None);
        assert!(config.verify_checksum);
        assert!(config.use_distance_table);
    }

    #[test]
    fn test_build_config_rejects_zero_levels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_levels": 0}}"#).unwrap();
        assert!(matches!(
            BuildConfig::from_file(file.path()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unparseable_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "cache_bytes = 5").unwrap();
        assert!(matches!(
            EngineConfig::from_file(file.path()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        BuildConfig::default().validate().unwrap();
    }
}
