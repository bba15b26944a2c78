//! Workspace methods on GrottoApi.

use crate::error::Result;
use crate::workspace::{Workspace, WorkspaceOptions};
use crate::GrottoApi;

impl GrottoApi {
    /// Option sets of every workspace, ordered by name.
    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceOptions>> {
        self.state().store.list()
    }

    /// Options of the active workspace, if one is selected.
    pub async fn get_workspace_options(&self) -> Result<Option<WorkspaceOptions>> {
        let store = &self.state().store;
        match store.active()? {
            Some(name) => store.options(&name).map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_workspace(&self, name: &str) -> Result<Workspace> {
        self.state().store.get(name)
    }

    pub async fn select_workspace(&self, name: &str) -> Result<()> {
        self.state().store.select(name)
    }

    /// Delete a workspace. Fails with `WorkspaceInUse` while a
    /// non-terminal session references it.
    pub async fn delete_workspace(&self, name: &str) -> Result<()> {
        let options = self.state().store.options(name)?;
        self.state().store.delete(name)?;
        self.state().resolver.invalidate(&options);
        Ok(())
    }

    pub async fn create_workspace(&self, options: WorkspaceOptions) -> Result<()> {
        self.state().store.create(options)
    }

    /// Replace a workspace's options. Live sessions keep their snapshot.
    pub async fn update_workspace(&self, options: WorkspaceOptions) -> Result<()> {
        let name = options.name.clone();
        self.state().store.update_options(&name, options)
    }
}
