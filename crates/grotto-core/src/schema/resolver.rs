//! Method resolution against a workspace's schema source.
//!
//! Local sources are parsed from disk and indexed per source; the index is
//! reused until the fingerprint of the discovered file set changes or the
//! source is explicitly invalidated. Reflection sources are queried on every
//! resolution and keyed by a digest of the returned descriptors, so a server
//! redeploy with a changed schema produces fresh descriptors.

use crate::schema::descriptor::{decode_file_descriptors, schema_from_descriptors};
use crate::schema::discovery::{fingerprint, ProtoDiscovery};
use crate::schema::linker::compile_sources;
use crate::schema::types::{MethodDescriptor, SchemaSet, ServiceSummary};
use crate::transport::{ReflectionClient, Target};
use crate::workspace::{Header, SchemaSource, WorkspaceOptions};
use crate::{GrottoError, Result};
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Service listing for a workspace, as shown by `get_metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalogue {
    /// `local` or `reflection`.
    pub source: String,
    /// Request metadata the workspace sends by default.
    pub headers: Vec<Header>,
    pub services: Vec<ServiceSummary>,
}

struct LocalIndex {
    fingerprint: String,
    identity: String,
    schema: Arc<SchemaSet>,
}

pub struct SchemaResolver {
    search_roots: Vec<PathBuf>,
    reflection: Arc<dyn ReflectionClient>,
    /// Resolved descriptors keyed by (source identity, `package.Service.Method`).
    descriptors: Cache<(String, String), MethodDescriptor>,
    /// Converted reflection schemas keyed by identity.
    reflected: Cache<String, Arc<SchemaSet>>,
    local: Mutex<HashMap<String, LocalIndex>>,
    generations: Mutex<HashMap<String, u64>>,
}

impl SchemaResolver {
    pub fn new(
        search_roots: Vec<PathBuf>,
        reflection: Arc<dyn ReflectionClient>,
        capacity: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            search_roots,
            reflection,
            descriptors: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity)
                .build(),
            reflected: Cache::builder().time_to_live(ttl).max_capacity(64).build(),
            local: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
        }
    }

    pub fn search_roots(&self) -> &[PathBuf] {
        &self.search_roots
    }

    /// Lazily walk the configured search roots for `.proto` files.
    ///
    /// Every call starts a new walk.
    pub fn find_schema_sources(&self) -> impl Iterator<Item = PathBuf> {
        ProtoDiscovery::new(self.search_roots.iter().cloned()).into_paths()
    }

    /// Resolve `service`/`method` against the workspace's schema source.
    pub async fn resolve_method(
        &self,
        options: &WorkspaceOptions,
        service: &str,
        method: &str,
    ) -> Result<MethodDescriptor> {
        let (identity, schema) = self.schema_for(options, false).await?;
        let key = (identity, format!("{}.{}", service, method));
        if let Some(descriptor) = self.descriptors.get(&key) {
            return Ok(descriptor);
        }

        let descriptor = schema.method_descriptor(service, method)?;
        debug!("Resolved {} against {}", descriptor.path(), key.0);
        self.descriptors.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    /// Catalogue from the workspace's configured schema source.
    pub async fn metadata(&self, options: &WorkspaceOptions) -> Result<Catalogue> {
        let (_, schema) = self.schema_for(options, false).await?;
        Ok(Catalogue {
            source: source_label(&options.schema_source).to_string(),
            headers: options.metadata.clone(),
            services: schema.catalogue(),
        })
    }

    /// Catalogue from live reflection, whatever the configured source is.
    pub async fn reflection_metadata(&self, options: &WorkspaceOptions) -> Result<Catalogue> {
        let (_, schema) = self.schema_for(options, true).await?;
        Ok(Catalogue {
            source: "reflection".to_string(),
            headers: options.metadata.clone(),
            services: schema.catalogue(),
        })
    }

    /// Force the next resolution for this workspace's source to start over.
    pub fn invalidate(&self, options: &WorkspaceOptions) {
        let key = self.source_key(&options.schema_source, &options.addr);
        if let Ok(mut local) = self.local.lock() {
            local.remove(&key);
        }
        if let Ok(mut generations) = self.generations.lock() {
            *generations.entry(key.clone()).or_insert(0) += 1;
        }
        info!("Invalidated schema source {}", key);
    }

    async fn schema_for(
        &self,
        options: &WorkspaceOptions,
        force_reflection: bool,
    ) -> Result<(String, Arc<SchemaSet>)> {
        match &options.schema_source {
            SchemaSource::LocalFiles { roots, files } if !force_reflection => {
                self.local_schema(&options.schema_source, roots, files)
            }
            source => {
                let headers = source.reflection_headers().to_vec();
                self.reflected_schema(options, &headers).await
            }
        }
    }

    fn local_schema(
        &self,
        source: &SchemaSource,
        roots: &[PathBuf],
        files: &[PathBuf],
    ) -> Result<(String, Arc<SchemaSet>)> {
        let key = self.source_key(source, "");
        let paths = self.local_files(roots, files);
        let current = fingerprint(&paths)?;

        {
            let local = self.lock_local()?;
            if let Some(index) = local.get(&key) {
                if index.fingerprint == current {
                    return Ok((index.identity.clone(), Arc::clone(&index.schema)));
                }
            }
        }

        let mut sources = Vec::with_capacity(paths.len());
        for path in &paths {
            let text =
                std::fs::read_to_string(path).map_err(|e| GrottoError::io_with_path(e, path))?;
            sources.push((path.display().to_string(), text));
        }
        let schema = Arc::new(compile_sources(&sources)?);
        let identity = format!("{}@{}#{}", key, self.generation(&key), current);
        info!(
            "Indexed {} schema file(s), {} service(s)",
            paths.len(),
            schema.services().count()
        );

        self.lock_local()?.insert(
            key,
            LocalIndex {
                fingerprint: current,
                identity: identity.clone(),
                schema: Arc::clone(&schema),
            },
        );
        Ok((identity, schema))
    }

    async fn reflected_schema(
        &self,
        options: &WorkspaceOptions,
        headers: &[Header],
    ) -> Result<(String, Arc<SchemaSet>)> {
        let target = Target::from_options(options);
        let mut blobs = self.reflection.file_descriptors(&target, headers).await?;
        blobs.sort();

        let mut hasher = Sha256::new();
        for blob in &blobs {
            hasher.update((blob.len() as u64).to_le_bytes());
            hasher.update(blob);
        }
        let key = format!("reflect:{}", options.addr);
        let identity = format!(
            "{}@{}#{}",
            key,
            self.generation(&key),
            hex::encode(hasher.finalize())
        );

        if let Some(schema) = self.reflected.get(&identity) {
            return Ok((identity, schema));
        }

        let files = decode_file_descriptors(&blobs)?;
        let count = files.len();
        let schema = Arc::new(schema_from_descriptors(files)?);
        debug!("Reflection on {} returned {} file(s)", options.addr, count);
        self.reflected.insert(identity.clone(), Arc::clone(&schema));
        Ok((identity, schema))
    }

    /// Explicit files plus everything discovered under the roots, without
    /// duplicates. A source naming neither uses the engine's search roots.
    fn local_files(&self, roots: &[PathBuf], files: &[PathBuf]) -> Vec<PathBuf> {
        let discovery = if roots.is_empty() && files.is_empty() {
            ProtoDiscovery::new(self.search_roots.iter().cloned())
        } else {
            ProtoDiscovery::new(roots.iter().cloned())
        };
        let mut out: Vec<PathBuf> = Vec::new();
        for path in files.iter().cloned().chain(discovery.iter()) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }

    fn source_key(&self, source: &SchemaSource, addr: &str) -> String {
        match source {
            SchemaSource::LocalFiles { roots, files } => {
                let mut parts: Vec<String> = roots
                    .iter()
                    .chain(files.iter())
                    .map(|p| p.display().to_string())
                    .collect();
                parts.sort();
                format!("local:{}", parts.join("|"))
            }
            SchemaSource::Reflection { .. } => format!("reflect:{}", addr),
        }
    }

    fn generation(&self, key: &str) -> u64 {
        self.generations
            .lock()
            .map(|g| g.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock_local(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LocalIndex>>> {
        self.local
            .lock()
            .map_err(|_| GrottoError::Other("schema index lock poisoned".into()))
    }
}

fn source_label(source: &SchemaSource) -> &'static str {
    if source.is_reflection() {
        "reflection"
    } else {
        "local"
    }
}
