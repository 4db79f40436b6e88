//! Two-tier permission cache
//!
//! The session tier lives in memory for the life of the process. The
//! persisted tier is mirrored to a JSON file so "always allow" decisions
//! survive restarts. Entries are keyed by a short digest of
//! `action:target`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// A human's answer to a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    /// Allow this one call
    AllowOnce,
    /// Allow until the process exits
    AllowSession,
    /// Allow now and in future runs
    AllowAlways,
    /// Refuse
    Deny,
}

impl PermissionDecision {
    /// Options offered to the human, in display order
    pub const ALL: [Self; 4] = [
        Self::AllowOnce,
        Self::AllowSession,
        Self::AllowAlways,
        Self::Deny,
    ];

    /// Human-facing option label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AllowOnce => "Allow Once",
            Self::AllowSession => "Allow for Session",
            Self::AllowAlways => "Always Allow",
            Self::Deny => "Deny",
        }
    }

    /// Wire name (`allow_once`, ...)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllowOnce => "allow_once",
            Self::AllowSession => "allow_session",
            Self::AllowAlways => "allow_always",
            Self::Deny => "deny",
        }
    }

    /// Parse either a label or a wire name, ignoring case.
    #[must_use]
    pub fn from_label(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|d| {
            d.label().eq_ignore_ascii_case(value) || d.as_str().eq_ignore_ascii_case(value)
        })
    }

    /// Whether the tool call may proceed
    #[must_use]
    pub const fn is_granted(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

impl fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remembered grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPermission {
    /// Tool name
    pub action: String,
    /// Normalized target
    pub target: String,
    /// The decision that was stored
    pub decision: PermissionDecision,
    /// Cache key, see [`permission_hash`]
    pub hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PermissionFile {
    #[serde(default)]
    permissions: Vec<StoredPermission>,
}

/// Stable 16 hex character key for `action` on `target`.
#[must_use]
pub fn permission_hash(action: &str, target: &str) -> String {
    let digest = Sha256::digest(format!("{action}:{target}").as_bytes());
    let mut hash = format!("{digest:x}");
    hash.truncate(16);
    hash
}

/// Session + persisted permission store
#[derive(Debug, Default)]
pub struct PermissionCache {
    session: RwLock<HashMap<String, StoredPermission>>,
    persisted: RwLock<HashMap<String, StoredPermission>>,
    path: Option<PathBuf>,
}

impl PermissionCache {
    /// Cache with no backing file; "always" grants last for the process only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by `path`. A missing or unreadable file yields an empty
    /// persisted tier.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let persisted = load_or_empty(&path);
        Self {
            session: RwLock::new(HashMap::new()),
            persisted: RwLock::new(persisted),
            path: Some(path),
        }
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a grant. The session tier wins over the persisted tier.
    #[must_use]
    pub fn check(&self, action: &str, target: &str) -> Option<StoredPermission> {
        let hash = permission_hash(action, target);
        if let Some(hit) = self.session.read().get(&hash) {
            return Some(hit.clone());
        }
        self.persisted.read().get(&hash).cloned()
    }

    /// Remember a decision.
    ///
    /// `AllowOnce` and `Deny` are not stored. `AllowAlways` is written to
    /// both tiers and flushed to disk before returning; the in-memory
    /// tiers are updated even if the flush fails.
    pub fn store(&self, action: &str, target: &str, decision: PermissionDecision) -> Result<()> {
        if matches!(
            decision,
            PermissionDecision::AllowOnce | PermissionDecision::Deny
        ) {
            return Ok(());
        }

        let entry = StoredPermission {
            action: action.to_string(),
            target: target.to_string(),
            decision,
            hash: permission_hash(action, target),
        };
        debug!(action, target, %decision, "storing permission");

        self.session.write().insert(entry.hash.clone(), entry.clone());

        if decision == PermissionDecision::AllowAlways {
            let mut persisted = self.persisted.write();
            persisted.insert(entry.hash.clone(), entry);
            self.flush(&persisted)?;
        }
        Ok(())
    }

    /// Re-read the persisted tier from disk.
    pub fn reload(&self) {
        if let Some(path) = &self.path {
            *self.persisted.write() = load_or_empty(path);
        }
    }

    /// Forget session grants.
    pub fn clear_session(&self) {
        self.session.write().clear();
    }

    /// Forget everything, including the backing file's contents.
    pub fn clear_all(&self) -> Result<()> {
        self.session.write().clear();
        let mut persisted = self.persisted.write();
        persisted.clear();
        self.flush(&persisted)
    }

    /// All grants, session tier first, each hash listed once.
    #[must_use]
    pub fn entries(&self) -> Vec<StoredPermission> {
        let session = self.session.read();
        let persisted = self.persisted.read();
        let mut entries: Vec<StoredPermission> = session.values().cloned().collect();
        entries.extend(
            persisted
                .values()
                .filter(|p| !session.contains_key(&p.hash))
                .cloned(),
        );
        entries.sort_by(|a, b| (&a.action, &a.target).cmp(&(&b.action, &b.target)));
        entries
    }

    fn flush(&self, persisted: &HashMap<String, StoredPermission>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| Error::CacheIo {
            path: path.clone(),
            source,
        };

        let mut permissions: Vec<StoredPermission> = persisted.values().cloned().collect();
        permissions.sort_by(|a, b| (&a.action, &a.target).cmp(&(&b.action, &b.target)));
        let json = serde_json::to_string_pretty(&PermissionFile { permissions })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes()).map_err(io_err)?;
        std::fs::rename(&tmp_path, path).map_err(io_err)?;
        info!(path = %path.display(), entries = persisted.len(), "permissions saved");
        Ok(())
    }
}

fn load_or_empty(path: &Path) -> HashMap<String, StoredPermission> {
    match load(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not load saved permissions, starting empty");
            HashMap::new()
        }
    }
}

fn load(path: &Path) -> Result<HashMap<String, StoredPermission>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| Error::CacheIo {
        path: path.to_path_buf(),
        source,
    })?;
    let file: PermissionFile = serde_json::from_str(&content)?;
    Ok(file
        .permissions
        .into_iter()
        .map(|p| (permission_hash(&p.action, &p.target), p))
        .collect())
}
