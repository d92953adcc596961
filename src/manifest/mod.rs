/// Release manifest resolution
///
/// A manifest is the versioned declarative definition of what a platform
/// release installs or upgrades. It is resolved once per command, either from
/// a local file (`--resource-file`) or from the chart registry, and is
/// read-only afterward.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Registry serving versioned install/upgrade manifests
pub const MANIFEST_REPO_URL: &str = "https://openchart.orbit-paas.io/orbit/o7n/";

/// Versioned deployment manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// Target platform version; empty means the manifest is unusable
    #[serde(default)]
    pub version: String,

    /// Default namespace suggested by the manifest
    #[serde(default)]
    pub namespace: Option<String>,

    /// Default persistence access modes for stateful components
    #[serde(default)]
    pub access_modes: Vec<String>,

    /// Ordered component definitions
    #[serde(default)]
    pub components: Vec<Component>,
}

/// A single installable component of the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Release name, prefixed per invocation
    pub name: String,

    /// Chart reference (repo/chart)
    pub chart: String,

    /// Chart version to install
    pub chart_version: String,

    /// Values handed to the package manager verbatim
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Parameters normally collected interactively
    #[serde(default)]
    pub inputs: Vec<ComponentInput>,

    /// Whether the component claims persistent volumes
    #[serde(default)]
    pub persistence: bool,
}

/// An interactive parameter embedded in a component definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInput {
    /// Value key the answer is bound to
    pub key: String,

    /// Operator-facing prompt
    pub prompt: String,

    /// Fallback used with --skip-input
    #[serde(default)]
    pub default: Option<String>,

    /// Do not echo the answer
    #[serde(default)]
    pub password: bool,
}

/// Source a manifest is resolved from
///
/// A local file always takes precedence over the registry.
#[derive(Debug, Clone, Default)]
pub struct ResourceDefinition {
    pub local_file: Option<PathBuf>,
    pub version: String,
}

impl ResourceDefinition {
    pub fn new(local_file: Option<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            local_file,
            version: version.into(),
        }
    }

    /// Resolve the install manifest for the configured version
    pub async fn resolve(&self) -> Result<ReleaseManifest> {
        self.fetch("install.yml").await
    }

    /// Resolve the upgrade manifest for the configured version
    pub async fn resolve_upgrade(&self) -> Result<ReleaseManifest> {
        self.fetch("upgrade.yml").await
    }

    async fn fetch(&self, file_name: &str) -> Result<ReleaseManifest> {
        let raw = match &self.local_file {
            Some(path) => {
                debug!("Reading manifest from local file {}", path.display());
                tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read manifest file {}", path.display()))?
            }
            None => {
                if self.version.is_empty() {
                    anyhow::bail!("No manifest version given and no local resource file set");
                }
                let url = format!("{}{}/{}", MANIFEST_REPO_URL, self.version, file_name);
                info!("Fetching manifest {}", url);
                let response = reqwest::get(&url)
                    .await
                    .with_context(|| format!("Failed to fetch manifest from {}", url))?;
                if !response.status().is_success() {
                    anyhow::bail!(
                        "Manifest registry returned {} for version {}",
                        response.status(),
                        self.version
                    );
                }
                response
                    .text()
                    .await
                    .context("Failed to read manifest response body")?
            }
        };

        let manifest: ReleaseManifest =
            serde_yaml::from_str(&raw).context("Malformed release manifest")?;
        Ok(manifest)
    }
}
