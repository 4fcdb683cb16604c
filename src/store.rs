//! Local state persistence
//!
//! The CLI keeps the agent record and, for the local backend, the ledger
//! contents in a single JSON file. State is written only after a command
//! succeeds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::AgentRecord;
use crate::error::{Error, Result};
use crate::ledger::LedgerSnapshot;

/// Everything the CLI persists between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalState {
    pub agent: AgentRecord,

    /// Empty when the RPC backend is in use
    #[serde(default)]
    pub ledger: LedgerSnapshot,
}

/// JSON file store for [`LocalState`]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, `None` if nothing has been deployed yet
    pub async fn load(&self) -> Result<Option<LocalState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::StatePersistence(e.to_string()))?;

        let state: LocalState = serde_json::from_str(&data)
            .map_err(|e| Error::StatePersistence(e.to_string()))?;

        info!(
            "Loaded agent {} from {}",
            state.agent.address,
            self.path.display()
        );
        Ok(Some(state))
    }

    /// Save state to disk
    pub async fn save(&self, state: &LocalState) -> Result<()> {
        let data = serde_json::to_string_pretty(state)
            .map_err(|e| Error::StatePersistence(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::StatePersistence(e.to_string()))?;
            }
        }

        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| Error::StatePersistence(e.to_string()))?;

        debug!("Saved agent state to {}", self.path.display());
        Ok(())
    }
}
