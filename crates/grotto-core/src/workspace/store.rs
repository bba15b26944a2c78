//! Durable workspace collection.
//!
//! Layout under the data directory:
//! - `workspaces/<sha256(name)>.json`: one [`Workspace`] per file
//! - `state.json`: the active workspace name
//!
//! All state, including the session lease table, sits behind one mutex so
//! that `delete`'s in-use check and the removal happen atomically with
//! respect to lease acquisition.

use super::types::{non_empty_headers, Command, Workspace, WorkspaceOptions};
use crate::persist::{atomic_read_json, atomic_write_json, remove_file_if_exists};
use crate::{GrottoError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    #[serde(default)]
    active: Option<String>,
}

#[derive(Default)]
struct Inner {
    workspaces: BTreeMap<String, Workspace>,
    active: Option<String>,
    leases: HashMap<String, usize>,
}

pub struct WorkspaceStore {
    dir: PathBuf,
    state_file: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

/// Marks a workspace as referenced by a live session. Released on drop.
#[derive(Debug)]
pub struct WorkspaceLease {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("workspaces", &self.workspaces.len())
            .field("active", &self.active)
            .finish()
    }
}

impl WorkspaceLease {
    pub fn workspace(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(count) = inner.leases.get_mut(&self.name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.leases.remove(&self.name);
            }
        }
    }
}

impl WorkspaceStore {
    /// Load every workspace under `dir`. Files that fail to parse are
    /// skipped and left on disk.
    pub fn open(dir: impl Into<PathBuf>, state_file: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let state_file = state_file.into();
        std::fs::create_dir_all(&dir).map_err(|e| GrottoError::io_with_path(e, &dir))?;

        let mut workspaces = BTreeMap::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| GrottoError::io_with_path(e, &dir))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match atomic_read_json::<Workspace>(&path) {
                Ok(Some(workspace)) => {
                    workspaces.insert(workspace.name().to_string(), workspace);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable workspace file {}: {}", path.display(), e),
            }
        }

        let state = match atomic_read_json::<StoreState>(&state_file) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable store state {}: {}", state_file.display(), e);
                StoreState::default()
            }
        };
        let active = state.active.filter(|name| workspaces.contains_key(name));

        info!("Loaded {} workspace(s) from {}", workspaces.len(), dir.display());
        Ok(Self {
            dir,
            state_file,
            inner: Arc::new(Mutex::new(Inner {
                workspaces,
                active,
                leases: HashMap::new(),
            })),
        })
    }

    /// Option sets of every workspace, ordered by name.
    pub fn list(&self) -> Result<Vec<WorkspaceOptions>> {
        let inner = self.lock()?;
        Ok(inner.workspaces.values().map(|w| w.options.clone()).collect())
    }

    pub fn get(&self, name: &str) -> Result<Workspace> {
        let inner = self.lock()?;
        inner.workspaces.get(name).cloned().ok_or_else(|| not_found(name))
    }

    pub fn options(&self, name: &str) -> Result<WorkspaceOptions> {
        self.get(name).map(|w| w.options)
    }

    pub fn create(&self, options: WorkspaceOptions) -> Result<()> {
        options.validate()?;
        let options = options.normalized();
        let mut inner = self.lock()?;
        if inner.workspaces.contains_key(&options.name) {
            return Err(GrottoError::Validation {
                field: "name".into(),
                message: format!("workspace {} already exists", options.name),
            });
        }
        let workspace = Workspace::new(options);
        self.persist(&workspace)?;
        info!("Created workspace {}", workspace.name());
        inner
            .workspaces
            .insert(workspace.name().to_string(), workspace);
        Ok(())
    }

    /// Replace a workspace's options. Renaming is not supported.
    pub fn update_options(&self, name: &str, options: WorkspaceOptions) -> Result<()> {
        options.validate()?;
        if options.name != name {
            return Err(GrottoError::Validation {
                field: "name".into(),
                message: "workspaces cannot be renamed".into(),
            });
        }
        let options = options.normalized();
        self.modify(name, |workspace| {
            workspace.options = options;
            Ok(())
        })
    }

    pub fn select(&self, name: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.workspaces.contains_key(name) {
            return Err(not_found(name));
        }
        self.persist_state(Some(name))?;
        inner.active = Some(name.to_string());
        debug!("Selected workspace {}", name);
        Ok(())
    }

    pub fn active(&self) -> Result<Option<String>> {
        Ok(self.lock()?.active.clone())
    }

    /// Remove a workspace unless a session holds a lease on it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.workspaces.contains_key(name) {
            return Err(not_found(name));
        }
        if let Some(&sessions) = inner.leases.get(name) {
            if sessions > 0 {
                return Err(GrottoError::WorkspaceInUse {
                    name: name.to_string(),
                    sessions,
                });
            }
        }

        remove_file_if_exists(&self.file_for(name))?;
        inner.workspaces.remove(name);
        if inner.active.as_deref() == Some(name) {
            inner.active = None;
            if let Err(e) = self.persist_state(None) {
                error!("Failed to clear active workspace: {}", e);
            }
        }
        info!("Deleted workspace {}", name);
        Ok(())
    }

    /// Insert or overwrite a command by name.
    pub fn save_command(&self, workspace: &str, command: Command) -> Result<()> {
        if command.name.trim().is_empty() {
            return Err(GrottoError::Validation {
                field: "command".into(),
                message: "command name must not be empty".into(),
            });
        }
        let mut command = command;
        command.metadata = non_empty_headers(&command.metadata);
        self.modify(workspace, move |w| {
            w.upsert_command(command);
            Ok(())
        })
    }

    pub fn remove_command(&self, workspace: &str, command: &str) -> Result<()> {
        self.modify(workspace, |w| {
            let before = w.commands.len();
            w.commands.retain(|c| c.name != command);
            if w.commands.len() == before {
                return Err(command_not_found(command));
            }
            Ok(())
        })
    }

    pub fn command(&self, workspace: &str, command: &str) -> Result<Command> {
        let inner = self.lock()?;
        let w = inner
            .workspaces
            .get(workspace)
            .ok_or_else(|| not_found(workspace))?;
        w.command(command)
            .cloned()
            .ok_or_else(|| command_not_found(command))
    }

    /// Remember the last payload sent to `method`.
    pub fn save_last_message(&self, workspace: &str, method: &str, text: &str) -> Result<()> {
        self.modify(workspace, |w| {
            w.last_messages.insert(method.to_string(), text.to_string());
            Ok(())
        })
    }

    pub fn last_message(&self, workspace: &str, method: &str) -> Result<Option<String>> {
        let inner = self.lock()?;
        let w = inner
            .workspaces
            .get(workspace)
            .ok_or_else(|| not_found(workspace))?;
        Ok(w.last_messages.get(method).cloned())
    }

    /// Take a lease on `name`, failing if the workspace does not exist.
    pub fn acquire(&self, name: &str) -> Result<WorkspaceLease> {
        let mut inner = self.lock()?;
        if !inner.workspaces.contains_key(name) {
            return Err(not_found(name));
        }
        *inner.leases.entry(name.to_string()).or_insert(0) += 1;
        Ok(WorkspaceLease {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Number of live leases on `name`.
    pub fn lease_count(&self, name: &str) -> usize {
        self.lock()
            .map(|inner| inner.leases.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Apply `change` to a copy, persist it, then publish it. A failed
    /// write leaves the in-memory workspace untouched.
    fn modify<F>(&self, name: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Workspace) -> Result<()>,
    {
        let mut inner = self.lock()?;
        let current = inner.workspaces.get(name).ok_or_else(|| not_found(name))?;
        let mut updated = current.clone();
        change(&mut updated)?;
        self.persist(&updated)?;
        inner.workspaces.insert(name.to_string(), updated);
        Ok(())
    }

    fn persist(&self, workspace: &Workspace) -> Result<()> {
        let path = self.file_for(workspace.name());
        atomic_write_json(&path, workspace, false).map_err(|e| {
            error!("Failed to save workspace {}: {}", workspace.name(), e);
            e
        })
    }

    fn persist_state(&self, active: Option<&str>) -> Result<()> {
        let state = StoreState {
            active: active.map(str::to_string),
        };
        atomic_write_json(&self.state_file, &state, false)
    }

    fn file_for(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| GrottoError::Other("workspace store lock poisoned".into()))
    }
}

fn not_found(name: &str) -> GrottoError {
    GrottoError::WorkspaceNotFound {
        name: name.to_string(),
    }
}

fn command_not_found(name: &str) -> GrottoError {
    GrottoError::Validation {
        field: "command".into(),
        message: format!("no command named {}", name),
    }
}
