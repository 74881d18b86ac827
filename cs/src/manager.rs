//! CheckpointManager - per-owner snapshot, restore and retention

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointKind, CheckpointRef, WorkerState};
use crate::config::{Config, RetentionPolicy};
use crate::error::CheckpointError;
use crate::store::{self, CheckpointDir, OwnerLock};

/// Decides whether a worker's live state has drifted from expected behavior
pub trait DriftDetector: Send + Sync {
    fn detect_drift(&self, state: &WorkerState) -> bool;
}

/// Default detector: never reports drift
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDrift;

impl DriftDetector for NeverDrift {
    fn detect_drift(&self, _state: &WorkerState) -> bool {
        false
    }
}

/// Checkpoint operations for a single owner
#[derive(Clone)]
pub struct CheckpointManager {
    owner_id: String,
    primary: CheckpointDir,
    fallback: Option<CheckpointDir>,
    retention: RetentionPolicy,
    drift: Arc<dyn DriftDetector>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("owner_id", &self.owner_id)
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .field("retention", &self.retention)
            .finish()
    }
}

impl CheckpointManager {
    /// Fails with `InvalidOwner` unless the id is a plain directory name
    pub fn new(owner_id: impl Into<String>, config: &Config) -> Result<Self, CheckpointError> {
        let owner_id = owner_id.into();
        store::validate_owner_id(&owner_id)?;
        Ok(Self {
            owner_id,
            primary: CheckpointDir::new(&config.store_path),
            fallback: config.fallback_path.as_ref().map(CheckpointDir::new),
            retention: config.retention,
            drift: Arc::new(NeverDrift),
        })
    }

    pub fn with_drift_detector(mut self, detector: Arc<dyn DriftDetector>) -> Self {
        self.drift = detector;
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn dirs(&self) -> impl Iterator<Item = &CheckpointDir> {
        std::iter::once(&self.primary).chain(self.fallback.as_ref())
    }

    fn lock(&self) -> Result<OwnerLock, CheckpointError> {
        match self.primary.lock(&self.owner_id) {
            Ok(lock) => Ok(lock),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(owner_id = %self.owner_id, error = %primary_err, "Primary checkpoint lock failed, using fallback");
                    fallback.lock(&self.owner_id)
                }
                None => Err(primary_err),
            },
        }
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<CheckpointRef, CheckpointError> {
        let primary_err = match self.primary.write(checkpoint) {
            Ok(r) => return Ok(r),
            Err(e) => e,
        };
        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };
        warn!(
            owner_id = %self.owner_id,
            error = %primary_err,
            fallback = %fallback.root().display(),
            "Primary checkpoint write failed, using fallback"
        );
        fallback.write(checkpoint).map_err(|fallback_err| {
            CheckpointError::Persistence(format!("primary: {primary_err}; fallback: {fallback_err}"))
        })
    }

    /// Next creation time, strictly after every existing artifact of this owner
    fn next_created_at(&self) -> Result<DateTime<Utc>, CheckpointError> {
        let now = Utc::now().timestamp_millis();
        let floor = self
            .list_checkpoints(None)?
            .last()
            .map(|r| r.created_at.timestamp_millis() + 1)
            .unwrap_or(i64::MIN);
        Ok(DateTime::from_timestamp_millis(now.max(floor)).unwrap_or_else(Utc::now))
    }

    /// Snapshot live state and persist it atomically
    ///
    /// Retention runs only after the new artifact has been read back and
    /// matches what was written.
    pub fn create_checkpoint(&self, kind: CheckpointKind, state: &WorkerState) -> Result<CheckpointRef, CheckpointError> {
        debug!(owner_id = %self.owner_id, %kind, "create_checkpoint: called");
        let _lock = self.lock()?;

        let checkpoint = Checkpoint::new(&self.owner_id, kind, self.next_created_at()?, state);
        let r = self.write(&checkpoint)?;

        let stored = store::read(&r)?;
        if stored != checkpoint {
            return Err(CheckpointError::Persistence(format!(
                "verification failed for {}",
                r.path.display()
            )));
        }

        match self.apply_retention(Utc::now()) {
            Ok(pruned) if pruned > 0 => debug!(owner_id = %self.owner_id, pruned, "create_checkpoint: pruned old checkpoints"),
            Ok(_) => {}
            Err(e) => warn!(owner_id = %self.owner_id, error = %e, "Checkpoint retention failed"),
        }

        info!(owner_id = %self.owner_id, %kind, path = %r.path.display(), "Checkpoint created");
        Ok(r)
    }

    /// Replace live state with a checkpoint's state, all-or-nothing
    pub fn restore_checkpoint(&self, r: &CheckpointRef, live: &mut WorkerState) -> Result<(), CheckpointError> {
        debug!(owner_id = %self.owner_id, path = %r.path.display(), "restore_checkpoint: called");
        if r.owner_id != self.owner_id {
            return Err(CheckpointError::Restore(format!(
                "checkpoint belongs to '{}', not '{}'",
                r.owner_id, self.owner_id
            )));
        }

        let checkpoint = store::read(r)?;
        if checkpoint.owner_id != self.owner_id {
            return Err(CheckpointError::Restore(format!(
                "artifact owner '{}' does not match '{}'",
                checkpoint.owner_id, self.owner_id
            )));
        }
        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(CheckpointError::Restore(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }

        let restored = WorkerState::from_snapshot(&checkpoint.state)?;
        *live = restored;
        info!(owner_id = %self.owner_id, kind = %checkpoint.kind, created_at = %checkpoint.created_at, "Checkpoint restored");
        Ok(())
    }

    pub fn get_latest_checkpoint(&self, kind: CheckpointKind) -> Result<Option<CheckpointRef>, CheckpointError> {
        Ok(self.list_checkpoints(Some(kind))?.pop())
    }

    /// All artifacts of this owner across primary and fallback, oldest first
    pub fn list_checkpoints(&self, kind: Option<CheckpointKind>) -> Result<Vec<CheckpointRef>, CheckpointError> {
        let mut refs = Vec::new();
        for dir in self.dirs() {
            refs.extend(dir.scan(&self.owner_id, kind)?);
        }
        refs.sort_by_key(|r| r.created_at);
        Ok(refs)
    }

    pub fn load(&self, r: &CheckpointRef) -> Result<Checkpoint, CheckpointError> {
        store::read(r)
    }

    pub fn detect_drift(&self, state: &WorkerState) -> bool {
        self.drift.detect_drift(state)
    }

    /// Apply retention without creating a checkpoint
    pub fn prune(&self) -> Result<usize, CheckpointError> {
        let _lock = self.lock()?;
        self.apply_retention(Utc::now())
    }

    fn apply_retention(&self, now: DateTime<Utc>) -> Result<usize, CheckpointError> {
        let mut doomed = Vec::new();

        let routine = self.list_checkpoints(Some(CheckpointKind::Routine))?;
        let excess = routine.len().saturating_sub(self.retention.keep_routine);
        doomed.extend(routine.into_iter().take(excess));

        let cutoff = now - self.retention.max_age();
        for kind in [CheckpointKind::PreOperation, CheckpointKind::Recovery] {
            doomed.extend(
                self.list_checkpoints(Some(kind))?
                    .into_iter()
                    .filter(|r| r.created_at < cutoff),
            );
        }

        for r in &doomed {
            store::remove(r)?;
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn manager(root: &std::path::Path, owner: &str) -> CheckpointManager {
        CheckpointManager::new(owner, &Config::at(root)).unwrap()
    }

    fn busy_state() -> WorkerState {
        let mut state = WorkerState {
            current_task: Some(json!({"task_id": "t1", "status": "running"})),
            pending_message_count: 2,
            ..Default::default()
        };
        state.operational_context.insert("mode".to_string(), json!("active"));
        state.memory.insert("notes".to_string(), json!(["a", "b"]));
        state
    }

    #[test]
    fn test_round_trip_restores_exact_state() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path(), "w1");

        let original = busy_state();
        let r = manager.create_checkpoint(CheckpointKind::PreOperation, &original).unwrap();

        let mut live = original.clone();
        live.current_task = None;
        live.pending_message_count = 99;
        live.memory.clear();
        live.operational_context.insert("mode".to_string(), json!("degraded"));

        manager.restore_checkpoint(&r, &mut live).unwrap();
        assert_eq!(live, original);

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&r.path).unwrap()).unwrap();
        assert_eq!(raw["owner_id"], json!("w1"));
        assert_eq!(raw["kind"], json!("pre_operation"));
        assert_eq!(raw["version"], json!(CHECKPOINT_VERSION.to_string()));
        assert!(raw["created_at"].is_string());
        assert_eq!(raw["state"], original.snapshot());
    }

    #[test]
    fn test_newer_version_rejected() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path(), "w1");
        let r = manager.create_checkpoint(CheckpointKind::Routine, &busy_state()).unwrap();

        let mut artifact: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&r.path).unwrap()).unwrap();
        artifact["version"] = json!((CHECKPOINT_VERSION + 1).to_string());
        std::fs::write(&r.path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let mut live = WorkerState::default();
        let err = manager.restore_checkpoint(&r, &mut live).unwrap_err();
        assert!(matches!(err, CheckpointError::Restore(msg) if msg.contains("version")));
        assert_eq!(live, WorkerState::default());
    }

    #[test]
    fn test_routine_retention_keeps_three_newest() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path(), "w1");

        let mut refs = Vec::new();
        for i in 0..5u64 {
            let state = WorkerState {
                pending_message_count: i,
                ..Default::default()
            };
            refs.push(manager.create_checkpoint(CheckpointKind::Routine, &state).unwrap());
        }

        let remaining = manager.list_checkpoints(Some(CheckpointKind::Routine)).unwrap();
        assert_eq!(remaining, refs[2..].to_vec());
        assert!(!refs[0].path.exists());
        assert!(!refs[1].path.exists());

        let latest = manager.get_latest_checkpoint(CheckpointKind::Routine).unwrap().unwrap();
        assert_eq!(manager.load(&latest).unwrap().state["pending_message_count"], json!(4));
    }

    #[test]
    fn test_age_retention_for_other_kinds() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path(), "w1");
        let dir = CheckpointDir::new(temp.path());

        let stale = Checkpoint::new(
            "w1",
            CheckpointKind::Recovery,
            Utc::now() - chrono::Duration::days(8),
            &WorkerState::default(),
        );
        let stale_ref = dir.write(&stale).unwrap();

        manager
            .create_checkpoint(CheckpointKind::PreOperation, &WorkerState::default())
            .unwrap();
        assert!(!stale_ref.path.exists());
        assert_eq!(manager.list_checkpoints(None).unwrap().len(), 1);
    }

    #[test]
    fn test_cross_owner_restore_rejected() {
        let temp = tempdir().unwrap();
        let alice = manager(temp.path(), "alice");
        let bob = manager(temp.path(), "bob");

        let r = alice.create_checkpoint(CheckpointKind::Routine, &busy_state()).unwrap();
        let mut live = WorkerState::default();
        let err = bob.restore_checkpoint(&r, &mut live).unwrap_err();
        assert!(matches!(err, CheckpointError::Restore(_)));
        assert_eq!(live, WorkerState::default());
    }

    #[test]
    fn test_corrupt_field_leaves_live_state_untouched() {
        let temp = tempdir().unwrap();
        let manager = manager(temp.path(), "w1");
        let r = manager.create_checkpoint(CheckpointKind::Routine, &busy_state()).unwrap();

        let mut artifact: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&r.path).unwrap()).unwrap();
        artifact["state"]["operational_context"] = json!("not-a-map");
        std::fs::write(&r.path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let mut live = WorkerState {
            pending_message_count: 7,
            ..Default::default()
        };
        let before = live.clone();
        let err = manager.restore_checkpoint(&r, &mut live).unwrap_err();
        assert!(err.to_string().contains("operational_context"));
        assert_eq!(live, before);
    }

    #[test]
    fn test_fallback_used_when_primary_unusable() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("primary");
        std::fs::write(&blocker, "not a directory").unwrap();

        let config = Config {
            store_path: blocker,
            fallback_path: Some(temp.path().join("fallback")),
            retention: RetentionPolicy::default(),
        };
        let manager = CheckpointManager::new("w1", &config).unwrap();
        let r = manager.create_checkpoint(CheckpointKind::Routine, &busy_state()).unwrap();
        assert!(r.path.starts_with(temp.path().join("fallback")));
        assert_eq!(manager.get_latest_checkpoint(CheckpointKind::Routine).unwrap(), Some(r));
    }

    #[test]
    fn test_both_paths_failing_surfaces_error() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocked");
        std::fs::write(&blocker, "x").unwrap();
        let config = Config {
            store_path: blocker.clone(),
            fallback_path: Some(blocker),
            retention: RetentionPolicy::default(),
        };
        let manager = CheckpointManager::new("w1", &config).unwrap();
        let err = manager
            .create_checkpoint(CheckpointKind::Routine, &WorkerState::default())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Persistence(_)));
    }

    #[test]
    fn test_owner_outside_root_rejected() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("root");
        for owner in ["../escaped", "", "/tmp/elsewhere"] {
            let err = CheckpointManager::new(owner, &Config::at(&root)).unwrap_err();
            assert!(matches!(err, CheckpointError::InvalidOwner(_)));
        }
        assert!(!temp.path().join("escaped").exists());
    }

    #[test]
    fn test_default_detector_never_drifts() {
        let temp = tempdir().unwrap();
        assert!(!manager(temp.path(), "w1").detect_drift(&busy_state()));
    }
}
