//! Author ban list / whitelist and their on-disk form.
//!
//! Admission rule:
//! - Whitelist non-empty, or the current user known → only whitelisted
//!   authors and the current user pass, the ban list is ignored.
//! - Otherwise → everyone except banned authors passes.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// User ids in insertion order, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IdList(Vec<String>);

impl IdList {
    fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|x| x == id)
    }

    fn insert(&mut self, id: String) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|x| x != id);
        self.0.len() != before
    }

    fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<String> for IdList {
    fn extend<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        for id in ids {
            self.insert(id);
        }
    }
}

impl FromIterator<String> for IdList {
    fn from_iter<I: IntoIterator<Item = String>>(ids: I) -> Self {
        let mut list = Self::default();
        list.extend(ids);
        list
    }
}

/// Ban/allow lists plus the id of the logged-in user, once known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    ban_set: IdList,
    allow_set: IdList,
    self_id: Option<String>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_banned<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ban_set.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_allowed<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_set.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_self_id(mut self, id: impl Into<String>) -> Self {
        self.self_id = Some(id.into());
        self
    }

    /// Decide whether messages from `author_id` are processed.
    pub fn admit(&self, author_id: &str) -> bool {
        if self.allow_active() {
            self.allow_set.contains(author_id) || self.self_id.as_deref() == Some(author_id)
        } else {
            !self.ban_set.contains(author_id)
        }
    }

    /// Whether the whitelist is in force. A known current user counts as a
    /// member, so it switches the whitelist on by itself.
    pub fn allow_active(&self) -> bool {
        !self.allow_set.is_empty() || self.self_id.is_some()
    }

    pub fn banned(&self) -> impl Iterator<Item = &str> {
        self.ban_set.iter().map(String::as_str)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allow_set.iter().map(String::as_str)
    }

    pub fn ban_count(&self) -> usize {
        self.ban_set.len()
    }

    pub fn allow_count(&self) -> usize {
        self.allow_set.len()
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    /// Record the logged-in user's id.
    ///
    /// Also appends it to an already non-empty persisted whitelist so the
    /// file stays meaningful without the runtime rule. Returns `true` if
    /// anything changed and the filters should be saved.
    pub fn set_self_id(&mut self, id: &str) -> bool {
        if id.is_empty() || self.self_id.as_deref() == Some(id) {
            return false;
        }
        self.self_id = Some(id.to_string());
        if !self.allow_set.is_empty() && self.allow_set.insert(id.to_string()) {
            info!(user_id = %id, "Added current user to whitelist");
        }
        true
    }

    /// Apply one management edit. Returns what happened.
    pub fn apply(&mut self, edit: &FilterEdit) -> EditOutcome {
        let changed = match edit {
            FilterEdit::Ban(id) => self.ban_set.insert(id.clone()),
            FilterEdit::Unban(id) => self.ban_set.remove(id),
            FilterEdit::Allow(id) => self.allow_set.insert(id.clone()),
            FilterEdit::Disallow(id) => self.allow_set.remove(id),
        };
        EditOutcome {
            edit: edit.clone(),
            changed,
        }
    }
}

impl fmt::Display for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current User Filters:")?;
        writeln!(f, "Current User ID: {}", self.self_id().unwrap_or("Not set"))?;
        writeln!(f, "Ban List ({} users):", self.ban_set.len())?;
        for id in self.ban_set.iter() {
            writeln!(f, "  - {id}")?;
        }
        writeln!(f, "Whitelist ({} users):", self.allow_set.len())?;
        for id in self.allow_set.iter() {
            writeln!(f, "  - {id}")?;
        }
        Ok(())
    }
}

/// A ban list / whitelist mutation requested by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEdit {
    Ban(String),
    Unban(String),
    Allow(String),
    Disallow(String),
}

/// Result of applying a [`FilterEdit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub edit: FilterEdit,
    pub changed: bool,
}

impl fmt::Display for EditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.edit, self.changed) {
            (FilterEdit::Ban(id), true) => write!(f, "Added user ID {id} to ban list"),
            (FilterEdit::Ban(id), false) => write!(f, "User ID {id} is already in ban list"),
            (FilterEdit::Unban(id), true) => write!(f, "Removed user ID {id} from ban list"),
            (FilterEdit::Unban(id), false) => write!(f, "User ID {id} is not in ban list"),
            (FilterEdit::Allow(id), true) => write!(f, "Added user ID {id} to whitelist"),
            (FilterEdit::Allow(id), false) => write!(f, "User ID {id} is already in whitelist"),
            (FilterEdit::Disallow(id), true) => write!(f, "Removed user ID {id} from whitelist"),
            (FilterEdit::Disallow(id), false) => write!(f, "User ID {id} is not in whitelist"),
        }
    }
}

// ── Persistence ─────────────────────────────────────────────────────

/// On-disk shape of the filter file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FilterRecord {
    #[serde(default)]
    ban_list: Vec<String>,
    #[serde(default)]
    whitelist: Vec<String>,
    #[serde(default)]
    current_user_id: String,
}

impl From<FilterRecord> for FilterConfig {
    fn from(record: FilterRecord) -> Self {
        let self_id = Some(record.current_user_id).filter(|id| !id.is_empty());
        Self {
            ban_set: record.ban_list.into_iter().collect(),
            allow_set: record.whitelist.into_iter().collect(),
            self_id,
        }
    }
}

impl From<&FilterConfig> for FilterRecord {
    fn from(config: &FilterConfig) -> Self {
        Self {
            ban_list: config.ban_set.iter().cloned().collect(),
            whitelist: config.allow_set.iter().cloned().collect(),
            current_user_id: config.self_id.clone().unwrap_or_default(),
        }
    }
}

/// Load/save operations for persisted filters.
#[async_trait]
pub trait FilterStore: Send + Sync {
    /// Load filters. Never fails: missing or malformed state yields empty lists.
    async fn load(&self) -> FilterConfig;

    /// Persist filters.
    async fn save(&self, config: &FilterConfig) -> Result<(), ConfigError>;
}

/// Filters stored as pretty-printed JSON.
pub struct JsonFilterStore {
    path: PathBuf,
}

impl JsonFilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<FilterConfig>, ConfigError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: FilterRecord =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Malformed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(record.into()))
    }
}

#[async_trait]
impl FilterStore for JsonFilterStore {
    async fn load(&self) -> FilterConfig {
        match self.read().await {
            Ok(Some(config)) => {
                info!(path = %self.path.display(), "Loaded user filters");
                config
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No filter file, starting with empty lists");
                FilterConfig::default()
            }
            Err(e) => {
                warn!("Ignoring unreadable filter file: {e}");
                FilterConfig::default()
            }
        }
    }

    async fn save(&self, config: &FilterConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&FilterRecord::from(config))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, json).await?;
        info!(path = %self.path.display(), "Saved user filters");
        Ok(())
    }
}

/// Apply operator edits to the stored filters.
///
/// The file is written only when at least one edit changed something.
pub async fn apply_edits(
    store: &dyn FilterStore,
    edits: &[FilterEdit],
) -> crate::Result<(FilterConfig, Vec<EditOutcome>)> {
    let mut config = store.load().await;
    let outcomes: Vec<EditOutcome> = edits.iter().map(|edit| config.apply(edit)).collect();
    if outcomes.iter().any(|o| o.changed) {
        store.save(&config).await?;
    }
    Ok((config, outcomes))
}
