use crate::core::PolicyConfig;
use parking_lot::RwLock;
use ring::digest;
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

/// Holds the live policy snapshot.
///
/// Readers clone the current `Arc` under a shared lock and evaluate against it
/// without holding the lock. Reloads parse outside of the lock and only take
/// the exclusive lock to swap the snapshot.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Snapshot>,
}

/// The SHA-256 digest of a config file's contents.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reload {
    /// The file's contents differed from the last load and were applied.
    Updated,
    /// The file's contents were identical to the last load.
    Unchanged,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse policy config: {0}")]
    ParseFailed(#[from] serde_yaml::Error),
}

#[derive(Debug)]
struct Snapshot {
    config: Arc<PolicyConfig>,
    fingerprint: Option<Fingerprint>,
}

// === impl ConfigStore ===

impl ConfigStore {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                config: Arc::new(config),
                fingerprint: None,
            }),
        }
    }

    /// Builds a store from the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let store = Self::new(PolicyConfig::default());
        store.load_from_file(path)?;
        Ok(store)
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Arc<PolicyConfig> {
        self.current.read().config.clone()
    }

    /// The fingerprint of the last file applied, if any.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.current.read().fingerprint
    }

    /// Reloads the policy from `path`.
    ///
    /// On failure the current snapshot is left in place.
    pub fn load_from_file(&self, path: &Path) -> Result<Reload, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_bytes(&bytes)
    }

    fn load_bytes(&self, bytes: &[u8]) -> Result<Reload, ConfigError> {
        let fingerprint = Fingerprint::of(bytes);
        if self.current.read().fingerprint == Some(fingerprint) {
            return Ok(Reload::Unchanged);
        }

        let config = serde_yaml::from_slice::<PolicyConfig>(bytes)?;

        *self.current.write() = Snapshot {
            config: Arc::new(config),
            fingerprint: Some(fingerprint),
        };
        Ok(Reload::Updated)
    }
}

// === impl Fingerprint ===

impl Fingerprint {
    fn of(bytes: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, bytes);
        let mut fp = [0; 32];
        fp.copy_from_slice(digest.as_ref());
        Self(fp)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
