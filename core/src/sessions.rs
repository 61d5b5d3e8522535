//! Read-only view over the assistant's persisted sessions.
//!
//! The storage format belongs to the assistant; only `title` and an optional
//! `time.created` (epoch millis) are read from each `<id>.json` file.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

pub const MAX_TITLE_CHARS: usize = 40;
const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    /// Display title, shortened for chat.
    pub title: String,
    pub full_title: String,
    pub created_at: Option<DateTime<Utc>>,
}

pub trait SessionRegistry: Send + Sync {
    /// Sessions ordered newest first.
    fn list(&self) -> Vec<SessionSummary>;

    fn find(&self, id: &str) -> Option<SessionSummary> {
        self.list().into_iter().find(|session| session.id == id)
    }
}

/// `~/.local/share/opencode/storage/session/global`
pub fn default_sessions_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".local")
            .join("share")
            .join("opencode")
            .join("storage")
            .join("session")
            .join("global")
    })
}

#[derive(Debug, Clone)]
pub struct StorageSessionRegistry {
    dir: PathBuf,
}

impl StorageSessionRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[derive(Debug, Deserialize)]
struct StoredSession {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    time: Option<StoredTime>,
}

#[derive(Debug, Deserialize)]
struct StoredTime {
    #[serde(default)]
    created: Option<i64>,
}

impl SessionRegistry for StorageSessionRegistry {
    fn list(&self) -> Vec<SessionSummary> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %self.dir.display(), error = %err, "session storage unreadable");
                return Vec::new();
            }
        };

        let mut sessions: Vec<SessionSummary> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    return None;
                }
                let id = path.file_stem()?.to_str()?.to_string();
                let modified = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                Some(read_session(&path, id, modified))
            })
            .collect();

        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        sessions
    }
}

fn read_session(path: &Path, id: String, modified: Option<DateTime<Utc>>) -> SessionSummary {
    let parsed = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<StoredSession>(&raw).ok());
    match parsed {
        Some(stored) => {
            let full_title = stored.title.unwrap_or_else(|| UNTITLED.to_string());
            let created_at = stored
                .time
                .and_then(|time| time.created)
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .or(modified);
            SessionSummary {
                title: display_title(&full_title),
                full_title,
                created_at,
                id,
            }
        }
        None => {
            let prefix: String = id.chars().take(20).collect();
            SessionSummary {
                title: format!("{prefix}..."),
                full_title: id.clone(),
                created_at: modified,
                id,
            }
        }
    }
}

/// `"create hello html - 2026-01-20..."` -> `"create hello html"`, capped at
/// [`MAX_TITLE_CHARS`].
pub fn display_title(full_title: &str) -> String {
    let short = full_title
        .split_once(" - ")
        .map_or(full_title, |(head, _)| head);
    if short.chars().count() > MAX_TITLE_CHARS {
        let head: String = short.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{head}...")
    } else {
        short.to_string()
    }
}
