//! Durable storage for the engine's persisted records.
//!
//! Reads distinguish "nothing stored yet" (`Ok(None)`) from "stored but
//! unreadable" (`Err`), so the engine can log corruption before falling back
//! to defaults.

use crate::ai::mode::PrimarySetting;
use crate::ai::relationship::RelationshipState;
use crate::config::save_json_config;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const RELATIONSHIP_FILE: &str = "relationship_state.json";
const PRIMARY_FILE: &str = "primary_setting.json";
const FACTS_FILE: &str = "facts.json";

pub trait BehaviorStore: Send + Sync + 'static {
    fn load_relationship(&self) -> Result<Option<RelationshipState>>;
    fn persist_relationship(&self, state: &RelationshipState) -> Result<()>;
    fn load_primary(&self) -> Result<Option<PrimarySetting>>;
    fn persist_primary(&self, primary: PrimarySetting) -> Result<()>;

    /// Remembered user facts, oldest first. Used for memory echoes.
    fn stored_facts(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PrimaryRecord {
    primary: PrimarySetting,
}

// ── JSON files ─────────────────────────────────────────────

/// One pretty-printed JSON file per record under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform data directory.
    pub fn open_default() -> Self {
        Self::new(crate::config::default_data_dir())
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.dir.join(file);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write via a temp file and rename so a crash never leaves half a file.
    fn write<T: Serialize>(&self, file: &str, value: &T, label: &str) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{}.tmp", file));
        save_json_config(&tmp, value, label)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl BehaviorStore for JsonFileStore {
    fn load_relationship(&self) -> Result<Option<RelationshipState>> {
        self.read(RELATIONSHIP_FILE)
    }

    fn persist_relationship(&self, state: &RelationshipState) -> Result<()> {
        self.write(RELATIONSHIP_FILE, state, "Store")
    }

    fn load_primary(&self) -> Result<Option<PrimarySetting>> {
        Ok(self.read::<PrimaryRecord>(PRIMARY_FILE)?.map(|r| r.primary))
    }

    fn persist_primary(&self, primary: PrimarySetting) -> Result<()> {
        self.write(PRIMARY_FILE, &PrimaryRecord { primary }, "Store")
    }

    fn stored_facts(&self) -> Result<Vec<String>> {
        Ok(self.read::<Vec<String>>(FACTS_FILE)?.unwrap_or_default())
    }
}

// ── In memory ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    relationship: Option<RelationshipState>,
    primary: Option<PrimarySetting>,
    facts: Vec<String>,
    relationship_writes: usize,
    refused_writes: usize,
    fact_reads: usize,
    fail_writes: bool,
}

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn with_facts(self, facts: Vec<String>) -> Self {
        self.with(|inner| inner.facts = facts);
        self
    }

    pub fn with_relationship(self, state: RelationshipState) -> Self {
        self.with(|inner| inner.relationship = Some(state));
        self
    }

    pub fn with_primary(self, primary: PrimarySetting) -> Self {
        self.with(|inner| inner.primary = Some(primary));
        self
    }

    /// Make every persist call fail, to exercise write-failure handling.
    pub fn set_fail_writes(&self, fail: bool) {
        self.with(|inner| inner.fail_writes = fail);
    }

    pub fn relationship(&self) -> Option<RelationshipState> {
        self.with(|inner| inner.relationship.clone())
    }

    pub fn primary(&self) -> Option<PrimarySetting> {
        self.with(|inner| inner.primary)
    }

    pub fn relationship_writes(&self) -> usize {
        self.with(|inner| inner.relationship_writes)
    }

    pub fn fact_reads(&self) -> usize {
        self.with(|inner| inner.fact_reads)
    }

    /// Persist calls rejected while `set_fail_writes(true)` was in effect.
    pub fn refused_writes(&self) -> usize {
        self.with(|inner| inner.refused_writes)
    }
}

fn write_refused() -> crate::error::BehaviorError {
    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "writes disabled").into()
}

impl BehaviorStore for MemoryStore {
    fn load_relationship(&self) -> Result<Option<RelationshipState>> {
        Ok(self.relationship())
    }

    fn persist_relationship(&self, state: &RelationshipState) -> Result<()> {
        self.with(|inner| {
            if inner.fail_writes {
                inner.refused_writes += 1;
                return Err(write_refused());
            }
            inner.relationship = Some(state.clone());
            inner.relationship_writes += 1;
            Ok(())
        })
    }

    fn load_primary(&self) -> Result<Option<PrimarySetting>> {
        Ok(self.primary())
    }

    fn persist_primary(&self, primary: PrimarySetting) -> Result<()> {
        self.with(|inner| {
            if inner.fail_writes {
                inner.refused_writes += 1;
                return Err(write_refused());
            }
            inner.primary = Some(primary);
            Ok(())
        })
    }

    fn stored_facts(&self) -> Result<Vec<String>> {
        Ok(self.with(|inner| {
            inner.fact_reads += 1;
            inner.facts.clone()
        }))
    }
}
