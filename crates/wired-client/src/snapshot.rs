//! Persisted tab layout.
//!
//! The snapshot is a single JSON document under [`STATE_KEY`]:
//! `{ "activeId", "nextId", "isGridMode", "tabs": [{ "id", "name", "content" }] }`.
//! Content is the serialized screen and is only ever redrawn, never replayed
//! into a shell.

use serde::{Deserialize, Serialize};

use crate::session::TabId;
use crate::store::{KeyValueStore, StoreError};

pub const STATE_KEY: &str = "wired-term-state";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub active_id: Option<TabId>,
    #[serde(default)]
    pub next_id: TabId,
    #[serde(default)]
    pub is_grid_mode: bool,
    #[serde(default)]
    pub tabs: Vec<TabSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSnapshot {
    pub id: TabId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

impl Snapshot {
    /// Read the stored snapshot. `Ok(None)` when nothing was saved yet.
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Snapshot>, StoreError> {
        let Some(raw) = store.get(STATE_KEY)? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Overwrite the stored snapshot in one write.
    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<(), StoreError> {
        let json = serde_json::to_string(self).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        store.set(STATE_KEY, &json)
    }
}
