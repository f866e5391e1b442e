//! The plugin-registry status table.
//!
//! One redb table keyed by app id with a JSON row per app, consumed by
//! the surrounding UI. Upsert is idempotent by id.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable as _, TableDefinition};
use serde::{Deserialize, Serialize};

use nebo_core::AppId;

use crate::error::{RegistryError, RegistryResult};

const APPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    /// App identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Whether a live gRPC connection exists.
    pub connected: bool,
    /// Whether the app is quarantined.
    pub quarantined: bool,
    /// Last modification of this row.
    pub updated_at: DateTime<Utc>,
}

/// redb-backed status store.
pub struct StatusStore {
    db: Database,
}

impl StatusStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] if the database cannot be opened.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(|e| RegistryError::Store(e.to_string()))?;
        // Ensure the table exists so first reads don't fail.
        let tx = db
            .begin_write()
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        tx.open_table(APPS_TABLE)
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        tx.commit().map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(Self { db })
    }

    /// Insert or replace the row for `row.id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on database failure.
    pub fn upsert(&self, row: &StatusRow) -> RegistryResult<()> {
        let bytes = serde_json::to_vec(row).map_err(|e| RegistryError::Store(e.to_string()))?;
        let tx = self
            .db
            .begin_write()
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        {
            let mut table = tx
                .open_table(APPS_TABLE)
                .map_err(|e| RegistryError::Store(e.to_string()))?;
            table
                .insert(row.id.as_str(), bytes.as_slice())
                .map_err(|e| RegistryError::Store(e.to_string()))?;
        }
        tx.commit().map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(())
    }

    /// Update the `connected` flag of an existing row; missing rows are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on database failure.
    pub fn set_connected(&self, id: &AppId, connected: bool) -> RegistryResult<()> {
        if let Some(mut row) = self.get(id)? {
            row.connected = connected;
            row.updated_at = Utc::now();
            self.upsert(&row)?;
        }
        Ok(())
    }

    /// Update the `quarantined` flag of an existing row; missing rows
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on database failure.
    pub fn set_quarantined(&self, id: &AppId, quarantined: bool) -> RegistryResult<()> {
        if let Some(mut row) = self.get(id)? {
            row.quarantined = quarantined;
            row.connected = false;
            row.updated_at = Utc::now();
            self.upsert(&row)?;
        }
        Ok(())
    }

    /// Remove an app's row.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on database failure.
    pub fn remove(&self, id: &AppId) -> RegistryResult<()> {
        let tx = self
            .db
            .begin_write()
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        {
            let mut table = tx
                .open_table(APPS_TABLE)
                .map_err(|e| RegistryError::Store(e.to_string()))?;
            table
                .remove(id.as_str())
                .map_err(|e| RegistryError::Store(e.to_string()))?;
        }
        tx.commit().map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(())
    }

    /// The row for an app, if present.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on database failure.
    pub fn get(&self, id: &AppId) -> RegistryResult<Option<StatusRow>> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        let table = tx
            .open_table(APPS_TABLE)
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        let Some(guard) = table
            .get(id.as_str())
            .map_err(|e| RegistryError::Store(e.to_string()))?
        else {
            return Ok(None);
        };
        let row = serde_json::from_slice(guard.value())
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        Ok(Some(row))
    }

    /// All rows, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on database failure.
    pub fn all(&self) -> RegistryResult<Vec<StatusRow>> {
        let tx = self
            .db
            .begin_read()
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        let table = tx
            .open_table(APPS_TABLE)
            .map_err(|e| RegistryError::Store(e.to_string()))?;
        let mut rows = Vec::new();
        for item in table
            .iter()
            .map_err(|e| RegistryError::Store(e.to_string()))?
        {
            let (_, value) = item.map_err(|e| RegistryError::Store(e.to_string()))?;
            let row = serde_json::from_slice(value.value())
                .map_err(|e| RegistryError::Store(e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, version: &str) -> StatusRow {
        StatusRow {
            id: id.into(),
            name: "Test".into(),
            version: version.into(),
            connected: false,
            quarantined: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&tmp.path().join("registry.redb")).unwrap();
        let id = AppId::from_static("com.example.a");

        store.upsert(&row("com.example.a", "1.0.0")).unwrap();
        store.upsert(&row("com.example.a", "1.1.0")).unwrap();

        let fetched = store.get(&id).unwrap().unwrap();
        assert_eq!(fetched.version, "1.1.0");
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_connected_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&tmp.path().join("registry.redb")).unwrap();
        let id = AppId::from_static("com.example.a");

        store.upsert(&row("com.example.a", "1.0.0")).unwrap();
        store.set_connected(&id, true).unwrap();
        assert!(store.get(&id).unwrap().unwrap().connected);

        store.set_connected(&id, false).unwrap();
        assert!(!store.get(&id).unwrap().unwrap().connected);
    }

    #[test]
    fn test_quarantine_clears_connected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&tmp.path().join("registry.redb")).unwrap();
        let id = AppId::from_static("com.example.a");

        store.upsert(&row("com.example.a", "1.0.0")).unwrap();
        store.set_connected(&id, true).unwrap();
        store.set_quarantined(&id, true).unwrap();

        let fetched = store.get(&id).unwrap().unwrap();
        assert!(fetched.quarantined);
        assert!(!fetched.connected);
    }

    #[test]
    fn test_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&tmp.path().join("registry.redb")).unwrap();
        let id = AppId::from_static("com.example.a");

        store.upsert(&row("com.example.a", "1.0.0")).unwrap();
        store.remove(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());

        // Removing a missing row is fine.
        store.remove(&id).unwrap();
    }

    #[test]
    fn test_missing_row_updates_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StatusStore::open(&tmp.path().join("registry.redb")).unwrap();
        let id = AppId::from_static("com.example.ghost");
        store.set_connected(&id, true).unwrap();
        store.set_quarantined(&id, true).unwrap();
        assert!(store.get(&id).unwrap().is_none());
    }
}
