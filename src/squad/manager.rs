//! Squad Manager
//!
//! Owns every squad behind its own lock and persists the whole set as one
//! JSON document keyed by squad ID.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::state::{MemberStats, Squad, SquadError, SquadInvariant};

/// File name of the persisted squad set.
pub const SQUADS_FILE: &str = "squads.json";

/// Save/load failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document entry keyed under a different ID than the squad it holds.
    #[error("squad stored under {key} has id {id}")]
    IdMismatch {
        /// Key in the document.
        key: String,
        /// ID inside the entry.
        id: String,
    },

    /// Squad in the document breaks a membership invariant.
    #[error("squad {squad_id} is invalid: {source}")]
    Invalid {
        /// Offending squad.
        squad_id: String,
        /// Broken invariant.
        #[source]
        source: SquadInvariant,
    },
}

/// Default per-user location of the squads file.
pub fn default_squads_path() -> PathBuf {
    directories::ProjectDirs::from("io", "skirmish", "skirmish")
        .map(|dirs| dirs.config_dir().join(SQUADS_FILE))
        .unwrap_or_else(|| PathBuf::from(SQUADS_FILE))
}

/// Collection of squads.
pub struct SquadManager {
    squads: RwLock<BTreeMap<String, Arc<RwLock<Squad>>>>,
    path: PathBuf,
}

impl SquadManager {
    /// Manager persisting to [`default_squads_path`].
    pub fn new() -> Self {
        Self::with_path(default_squads_path())
    }

    /// Manager persisting to `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            squads: RwLock::new(BTreeMap::new()),
            path: path.into(),
        }
    }

    /// Where `save` and `load` go.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Found a squad and return its ID.
    pub async fn create_squad(
        &self,
        name: &str,
        tag: &str,
        founder_id: &str,
        founder_name: &str,
    ) -> Result<String, SquadError> {
        let squad = Squad::new(name, tag, founder_id, founder_name)?;
        let id = squad.id.clone();

        self.squads.write().await.insert(id.clone(), Arc::new(RwLock::new(squad)));
        info!("Squad {} [{}] founded by {}", id, tag, founder_id);

        Ok(id)
    }

    /// Shared handle to one squad.
    pub async fn get(&self, squad_id: &str) -> Option<Arc<RwLock<Squad>>> {
        self.squads.read().await.get(squad_id).cloned()
    }

    /// Copy of one squad.
    pub async fn snapshot(&self, squad_id: &str) -> Option<Squad> {
        let squad = self.get(squad_id).await?;
        let snapshot = squad.read().await.clone();
        Some(snapshot)
    }

    /// Remove a squad. Returns whether it existed.
    pub async fn delete_squad(&self, squad_id: &str) -> bool {
        let removed = self.squads.write().await.remove(squad_id).is_some();
        if removed {
            info!("Squad {} deleted", squad_id);
        }
        removed
    }

    /// Number of squads.
    pub async fn squad_count(&self) -> usize {
        self.squads.read().await.len()
    }

    /// All squad IDs, sorted.
    pub async fn squad_ids(&self) -> Vec<String> {
        self.squads.read().await.keys().cloned().collect()
    }

    /// Add deltas to one member's counters.
    pub async fn update_member_stats(
        &self,
        squad_id: &str,
        player_id: &str,
        delta: &MemberStats,
    ) -> Result<(), SquadError> {
        let squad = self
            .get(squad_id)
            .await
            .ok_or_else(|| SquadError::SquadNotFound(squad_id.to_string()))?;
        let mut squad = squad.write().await;
        squad.update_member_stats(player_id, delta)
    }

    /// Write every squad to the squads file, creating parent directories.
    pub async fn save(&self) -> Result<(), PersistError> {
        let mut doc = BTreeMap::new();
        {
            let squads = self.squads.read().await;
            for (id, squad) in squads.iter() {
                doc.insert(id.clone(), squad.read().await.clone());
            }
        }

        let json = serde_json::to_string_pretty(&doc)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;

        debug!("Saved {} squads to {}", doc.len(), self.path.display());
        Ok(())
    }

    /// Replace the in-memory set with the squads file. A missing file
    /// loads as empty. Any invalid squad rejects the whole file and leaves
    /// the current set untouched.
    pub async fn load(&self) -> Result<usize, PersistError> {
        let doc: BTreeMap<String, Squad> = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        for (key, squad) in &doc {
            if *key != squad.id {
                return Err(PersistError::IdMismatch { key: key.clone(), id: squad.id.clone() });
            }
            squad.validate().map_err(|source| PersistError::Invalid {
                squad_id: key.clone(),
                source,
            })?;
        }

        let count = doc.len();
        let loaded = doc
            .into_iter()
            .map(|(id, squad)| (id, Arc::new(RwLock::new(squad))))
            .collect();
        *self.squads.write().await = loaded;

        info!("Loaded {} squads from {}", count, self.path.display());
        Ok(count)
    }
}

impl Default for SquadManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_and_delete() {
        let dir = tempdir().unwrap();
        let manager = SquadManager::with_path(dir.path().join(SQUADS_FILE));

        let id = manager.create_squad("Night Owls", "OWLSQUAD", "p0", "Founder").await.unwrap();
        assert_eq!(manager.squad_count().await, 1);
        assert_eq!(manager.snapshot(&id).await.unwrap().tag, "OWLS");

        assert!(manager.delete_squad(&id).await);
        assert!(!manager.delete_squad(&id).await);
        assert!(manager.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_create_requires_founder() {
        let manager = SquadManager::with_path("unused.json");
        assert_eq!(
            manager.create_squad("Owls", "OWL", "", "x").await,
            Err(SquadError::EmptyPlayerId)
        );
    }

    #[tokio::test]
    async fn test_update_unknown_squad() {
        let manager = SquadManager::with_path("unused.json");
        let err = manager
            .update_member_stats("missing", "p0", &MemberStats::default())
            .await
            .unwrap_err();
        assert_eq!(err, SquadError::SquadNotFound("missing".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stat_updates() {
        let manager = Arc::new(SquadManager::with_path("unused.json"));
        let id = manager.create_squad("Owls", "OWL", "p0", "Founder").await.unwrap();

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let manager = manager.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    manager
                        .update_member_stats(&id, "p0", &MemberStats { kills: 1, ..Default::default() })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let squad = manager.snapshot(&id).await.unwrap();
        assert_eq!(squad.member_stats("p0").unwrap().kills, 200);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(SQUADS_FILE);
        let manager = SquadManager::with_path(&path);

        let id = manager.create_squad("Night Owls", "OWL", "p0", "Founder").await.unwrap();
        {
            let squad = manager.get(&id).await.unwrap();
            let mut squad = squad.write().await;
            squad.invite("p1").unwrap();
            squad.accept("p1", "Second").unwrap();
            squad.invite("p2").unwrap();
            squad
                .set_member_stats("p1", MemberStats { kills: 3, deaths: 1, wins: 1, playtime_secs: 90 })
                .unwrap();
        }
        manager.save().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains('\n'));
        assert!(raw.contains(&id));

        let restored = SquadManager::with_path(&path);
        assert_eq!(restored.load().await.unwrap(), 1);
        assert_eq!(restored.snapshot(&id).await, manager.snapshot(&id).await);

        let squad = restored.snapshot(&id).await.unwrap();
        assert_eq!(squad.leader(), Some("p0"));
        assert!(squad.has_invite("p2"));
        assert_eq!(squad.stats().total_kills, 3);
    }

    #[tokio::test]
    async fn test_load_replaces_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQUADS_FILE);

        let writer = SquadManager::with_path(&path);
        let saved = writer.create_squad("Saved", "SAV", "p0", "A").await.unwrap();
        writer.save().await.unwrap();

        let manager = SquadManager::with_path(&path);
        let unsaved = manager.create_squad("Unsaved", "UNS", "p9", "B").await.unwrap();
        manager.load().await.unwrap();

        assert_eq!(manager.squad_ids().await, vec![saved]);
        assert!(manager.get(&unsaved).await.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let manager = SquadManager::with_path(dir.path().join("absent.json"));
        manager.create_squad("Gone", "GON", "p0", "A").await.unwrap();

        assert_eq!(manager.load().await.unwrap(), 0);
        assert_eq!(manager.squad_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQUADS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let manager = SquadManager::with_path(&path);
        assert!(matches!(manager.load().await, Err(PersistError::Json(_))));
    }

    /// Save one valid squad, then rewrite its JSON entry with `edit`.
    async fn tampered_file(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) -> String {
        let writer = SquadManager::with_path(path);
        let id = writer.create_squad("Owls", "OWL", "p0", "Founder").await.unwrap();
        writer.save().await.unwrap();

        let mut doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        edit(&mut doc[&id]);
        std::fs::write(path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        id
    }

    #[tokio::test]
    async fn test_load_rejects_broken_invariants() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQUADS_FILE);
        let id = tampered_file(&path, |squad| {
            for i in 1..10 {
                squad["members"][format!("p{i}")] =
                    serde_json::json!({ "name": "x", "joined_at": "2026-01-01T00:00:00Z", "is_leader": true });
                squad["stats"][format!("p{i}")] =
                    serde_json::json!({ "kills": 0, "deaths": 0, "wins": 0, "playtime_secs": 0 });
            }
        })
        .await;

        let manager = SquadManager::with_path(&path);
        let kept = manager.create_squad("Kept", "KEP", "k0", "Keeper").await.unwrap();

        let err = manager.load().await.unwrap_err();
        assert!(matches!(
            err,
            PersistError::Invalid { ref squad_id, source: SquadInvariant::TooManyMembers(10) } if *squad_id == id
        ));
        assert_eq!(manager.squad_ids().await, vec![kept]);
    }

    #[tokio::test]
    async fn test_load_rejects_extra_leader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQUADS_FILE);
        tampered_file(&path, |squad| {
            squad["members"]["p1"] =
                serde_json::json!({ "name": "x", "joined_at": "2026-01-01T00:00:00Z", "is_leader": true });
            squad["stats"]["p1"] = serde_json::json!({ "kills": 0, "deaths": 0, "wins": 0, "playtime_secs": 0 });
        })
        .await;

        let manager = SquadManager::with_path(&path);
        assert!(matches!(
            manager.load().await,
            Err(PersistError::Invalid { source: SquadInvariant::LeaderCount(2), .. })
        ));
        assert_eq!(manager.squad_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_rejects_orphan_stats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQUADS_FILE);
        tampered_file(&path, |squad| {
            squad["stats"]["ghost"] = serde_json::json!({ "kills": 5, "deaths": 0, "wins": 0, "playtime_secs": 0 });
        })
        .await;

        let manager = SquadManager::with_path(&path);
        assert!(matches!(
            manager.load().await,
            Err(PersistError::Invalid { source: SquadInvariant::StatsMismatch, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_key_id_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQUADS_FILE);
        tampered_file(&path, |squad| {
            squad["id"] = serde_json::json!("someone-else");
        })
        .await;

        let manager = SquadManager::with_path(&path);
        assert!(matches!(manager.load().await, Err(PersistError::IdMismatch { .. })));
    }

    #[test]
    fn test_default_path_file_name() {
        assert!(default_squads_path().ends_with(SQUADS_FILE));
    }
}
