//! Saved command methods on GrottoApi.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec;
use crate::command_codec::{export_command, import_command, CommandFormat};
use crate::error::{GrottoError, Result};
use crate::schema::{MethodDescriptor, MethodRef};
use crate::workspace::{Command, WorkspaceOptions};
use crate::GrottoApi;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub workspace: Option<String>,
    pub command: String,
    #[serde(default)]
    pub format: CommandFormat,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportParams {
    #[serde(default)]
    pub workspace: Option<String>,
    pub encoding: String,
    /// Detected from the encoding when absent.
    #[serde(default)]
    pub format: Option<CommandFormat>,
}

impl GrottoApi {
    /// Encode a saved command. Fails with `CommandSchemaMismatch` when its
    /// method no longer resolves.
    pub async fn export_command(&self, params: ExportParams) -> Result<String> {
        let state = self.state();
        let options = state.workspace(params.workspace.as_deref())?;
        let command = state.store.command(&options.name, &params.command)?;
        self.check_command(&options, &command).await?;
        export_command(&command, &options, params.format)
    }

    /// Decode and install a command. Nothing is saved unless its method
    /// resolves and its payload fits the method's input.
    pub async fn import_command(&self, params: ImportParams) -> Result<Command> {
        let state = self.state();
        let options = state.workspace(params.workspace.as_deref())?;
        let command = import_command(&params.encoding, params.format)?;
        self.check_command(&options, &command).await?;
        state.store.save_command(&options.name, command.clone())?;
        info!("Imported command {} into {}", command.name, options.name);
        Ok(command)
    }

    pub async fn save_command(&self, workspace: Option<&str>, command: Command) -> Result<()> {
        let options = self.state().workspace(workspace)?;
        self.state().store.save_command(&options.name, command)
    }

    pub async fn remove_command(&self, workspace: Option<&str>, command: &str) -> Result<()> {
        let options = self.state().workspace(workspace)?;
        self.state().store.remove_command(&options.name, command)
    }

    async fn check_command(
        &self,
        options: &WorkspaceOptions,
        command: &Command,
    ) -> Result<MethodDescriptor> {
        let mismatch = |message: String| GrottoError::CommandSchemaMismatch {
            command: command.name.clone(),
            message,
        };
        let method_ref = MethodRef::parse(&command.method).map_err(|e| mismatch(e.to_string()))?;
        let method = self
            .state()
            .resolver
            .resolve_method(options, &method_ref.service, &method_ref.method)
            .await
            .map_err(|e| mismatch(e.to_string()))?;
        codec::encode_json(&method.schema, &method.input, &command.payload)
            .map_err(|e| mismatch(e.to_string()))?;
        Ok(method)
    }
}
