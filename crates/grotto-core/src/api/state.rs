//! State shared by every API operation.

use crate::config::EngineConfig;
use crate::schema::SchemaResolver;
use crate::session::SessionEngine;
use crate::workspace::{WorkspaceOptions, WorkspaceStore};
use crate::{GrottoError, Result};
use std::sync::{Arc, Mutex};

pub(crate) struct EngineState {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<WorkspaceStore>,
    pub(crate) resolver: SchemaResolver,
    pub(crate) engine: SessionEngine,
    /// Most recently connected session.
    pub(crate) current_session: Mutex<Option<u64>>,
}

impl EngineState {
    /// Options of `name`, or of the active workspace when `None`.
    pub(crate) fn workspace(&self, name: Option<&str>) -> Result<WorkspaceOptions> {
        match name {
            Some(name) => self.store.options(name),
            None => {
                let active = self.store.active()?.ok_or_else(|| GrottoError::InvalidParams {
                    message: "no workspace is selected".into(),
                })?;
                self.store.options(&active)
            }
        }
    }

    /// `id`, or the current session when `None`.
    pub(crate) fn session_id(&self, id: Option<u64>) -> Result<u64> {
        if let Some(id) = id {
            return Ok(id);
        }
        self.current_session
            .lock()
            .map_err(|_| GrottoError::Other("session pointer lock poisoned".into()))?
            .ok_or_else(|| GrottoError::InvalidParams {
                message: "no current session".into(),
            })
    }

    pub(crate) fn set_current_session(&self, id: u64) {
        if let Ok(mut current) = self.current_session.lock() {
            *current = Some(id);
        }
    }
}
