//! Schema methods on GrottoApi.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec;
use crate::error::Result;
use crate::schema::{template, Catalogue, MessageView, MethodRef, StreamingMode};
use crate::workspace::Header;
use crate::GrottoApi;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectMethodParams {
    #[serde(default)]
    pub workspace: Option<String>,
    pub method: String,
    /// Seed payload; the last payload sent to the method, or a template,
    /// when absent.
    #[serde(default)]
    pub payload: Option<String>,
}

/// Everything a shell needs to render a request editor for a method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodInput {
    pub method: String,
    pub mode: StreamingMode,
    pub input: MessageView,
    pub payload: String,
    /// The workspace's default request metadata.
    pub metadata: Vec<Header>,
}

impl GrottoApi {
    pub async fn select_method(&self, params: SelectMethodParams) -> Result<MethodInput> {
        let state = self.state();
        let options = state.workspace(params.workspace.as_deref())?;
        let method_ref = MethodRef::parse(&params.method)?;
        let method = state
            .resolver
            .resolve_method(&options, &method_ref.service, &method_ref.method)
            .await?;

        let fits = |text: &str| codec::encode_json(&method.schema, &method.input, text).is_ok();
        let payload = match params.payload.filter(|p| !p.trim().is_empty()) {
            Some(payload) => {
                codec::encode_json(&method.schema, &method.input, &payload)?;
                payload
            }
            // A remembered payload that no longer fits the shape is replaced.
            None => match state
                .store
                .last_message(&options.name, &method.path())?
                .filter(|last| fits(last))
            {
                Some(last) => last,
                None => {
                    let seed = template(&method.schema, &method.input);
                    serde_json::to_string_pretty(&seed)?
                }
            },
        };

        Ok(MethodInput {
            method: method.path(),
            mode: method.mode,
            input: MessageView::build(&method.schema, &method.input),
            payload,
            metadata: options.metadata.clone(),
        })
    }

    /// Services and methods of a workspace's configured schema source.
    pub async fn get_metadata(&self, workspace: Option<&str>) -> Result<Catalogue> {
        let options = self.state().workspace(workspace)?;
        self.state().resolver.metadata(&options).await
    }

    /// Services and methods as reported by live reflection.
    pub async fn get_reflect_metadata(&self, workspace: Option<&str>) -> Result<Catalogue> {
        let options = self.state().workspace(workspace)?;
        self.state().resolver.reflection_metadata(&options).await
    }

    /// `.proto` files under the configured search roots.
    pub async fn find_proto_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.state().resolver.find_schema_sources().collect())
    }

    /// Drop cached schemas for a workspace's source.
    pub async fn invalidate_schema(&self, workspace: Option<&str>) -> Result<()> {
        let options = self.state().workspace(workspace)?;
        self.state().resolver.invalidate(&options);
        Ok(())
    }
}
