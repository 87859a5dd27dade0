use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::store::StoreError;

const CORRECTIONS_FILE: &str = "corrections.jsonl";
const USERS_DIR: &str = "users";

/// One user-submitted correction: "the model said X, the right answer is Y".
///
/// Records are the durable source of truth for personalization; they are
/// appended, never rewritten, and the full set for a user is the training
/// set for that user's personalized artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub user_id: String,
    pub description: String,
    /// What the model predicted, if it predicted anything
    pub original_category_id: Option<u32>,
    pub corrected_category_id: u32,
    pub timestamp: DateTime<Utc>,
}

/// Append-only, per-user correction history as JSON Lines on disk.
///
/// Appends for one user are serialized through a per-user lock, so
/// concurrent submissions land whole, in some order, never interleaved.
/// Files are created lazily on the first correction and never truncated.
pub struct CorrectionLog {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CorrectionLog {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> io::Result<Self> {
        let root = data_dir.as_ref().join(USERS_DIR);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn log_path(&self, user_id: &UserId) -> PathBuf {
        self.root.join(user_id.as_str()).join(CORRECTIONS_FILE)
    }

    fn user_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(user_id.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Durably appends one record to the user's log.
    ///
    /// The caller owns retries: a failed append is reported, not repeated,
    /// because silently dropping or double-writing a correction corrupts the
    /// training signal.
    pub fn append(&self, user_id: &UserId, record: &CorrectionRecord) -> Result<(), StoreError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.log_path(user_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Reads the full history for a user, ordered by append time.
    ///
    /// A torn trailing line (crash mid-append) is skipped with a warning;
    /// the log is never repaired in place.
    pub fn read_all(&self, user_id: &UserId) -> Result<Vec<CorrectionRecord>, StoreError> {
        let path = self.log_path(user_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CorrectionRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "Skipping unreadable correction line {} for {}: {}",
                        index + 1,
                        user_id,
                        e
                    );
                }
            }
        }
        Ok(records)
    }

    /// Number of readable corrections accumulated for a user.
    pub fn count(&self, user_id: &UserId) -> Result<usize, StoreError> {
        Ok(self.read_all(user_id)?.len())
    }
}
