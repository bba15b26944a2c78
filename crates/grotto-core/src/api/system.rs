//! Host-environment methods on GrottoApi.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::GrottoApi;

/// Host environment descriptor for the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub os: String,
    pub arch: String,
    pub is_windows: bool,
    pub version: String,
}

impl GrottoApi {
    /// A headless engine has no dialog: the first configured search root,
    /// or the working directory.
    pub async fn select_directory(&self) -> Result<PathBuf> {
        match self.config().search_roots.first() {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn get_window_info(&self) -> WindowInfo {
        WindowInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            is_windows: cfg!(windows),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Cancel every open session.
    pub async fn shutdown(&self) {
        self.state().engine.shutdown();
    }
}
