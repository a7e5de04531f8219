//! Crash-safe session persistence.
//!
//! One JSON document per session at `<data_dir>/<session id>.json`, always
//! replaced wholesale through [`crate::persistence::atomic_write`].
//! Writers to different ids are independent; writes to one id must be
//! serialized by the caller.

use crate::error::StoreError;
use crate::persistence::atomic_write;
use crate::types::{Session, SessionSummary};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Characters of the query kept in a generated session id.
const ID_QUERY_CHARS: usize = 30;

/// File-backed store keyed by session id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the document for `id`.
    pub fn session_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    /// Allocate a new id for `query` and write an initial `planned` record
    /// with an empty plan.
    pub fn create(&self, query: &str) -> Result<String, StoreError> {
        let base = generate_session_id(query);
        let mut id = base.clone();
        let mut n = 1;
        while self.session_path(&id).exists() {
            id = format!("{base}_{n}");
            n += 1;
        }
        self.put(&id, &Session::new(id.clone(), query))?;
        debug!(session_id = %id, "Created research session");
        Ok(id)
    }

    /// Load the session for `id`.
    ///
    /// A missing, unreadable, or undecodable file is logged and reported as
    /// absent; this never fails.
    pub fn get(&self, id: &str) -> Option<Session> {
        if !is_valid_id(id) {
            warn!(session_id = %id, "Rejected malformed session id");
            return None;
        }
        let path = self.session_path(id);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error reading session file");
                return None;
            }
        };
        match serde_json::from_str::<Session>(&data) {
            Ok(mut session) => {
                // The file name is authoritative for the id.
                session.id = id.to_string();
                Some(session)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error decoding session file");
                None
            }
        }
    }

    /// Persist the full record for `id`, atomically replacing any previous one.
    pub fn put(&self, id: &str, session: &Session) -> Result<(), StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId { id: id.to_string() });
        }
        let path = self.session_path(id);
        let data = serde_json::to_vec_pretty(session)?;
        atomic_write(&path, &data).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to save session data");
            StoreError::from_io(&path, e)
        })
    }

    /// All decodable sessions, newest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut summaries: Vec<SessionSummary> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    path.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .filter_map(|id| self.get(&id))
            .map(|session| SessionSummary::from(&session))
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }
}

/// `<YYYYmmddHHMMSS>_<first 30 chars of query, non-alphanumerics as '_'>`.
pub fn generate_session_id(query: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d%H%M%S");
    let query_part: String = query
        .chars()
        .take(ID_QUERY_CHARS)
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("{timestamp}_{query_part}")
}

/// Ids become file names, so anything that could escape the data dir is refused.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && !id.contains("..")
        && !id.contains(['/', '\\', '\0'])
}
