/// Configuration management for orbitctl
use serde::{Deserialize, Serialize};
use std::path::Path;

/// User-supplied installation configuration
///
/// Loaded from the `--config-file` YAML. Describes the target namespace,
/// persistence access modes and external service endpoints. Required for
/// install, optional for upgrade and delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: ConfigSpec,
}

/// Config metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Target namespace for the platform release
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Config spec section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Persistence settings applied to all stateful components
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Endpoints of services hosted outside the cluster
    #[serde(default)]
    pub external: ExternalServices,
}

/// Persistent volume settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Access modes requested for created volumes (e.g. "ReadWriteOnce")
    #[serde(default)]
    pub access_modes: Vec<String>,

    /// Storage class name, cluster default when unset
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// External collaborator endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalServices {
    /// External database used instead of the bundled one
    #[serde(default)]
    pub database: Option<DatabaseEndpoint>,
}

/// Connection details for an externally managed database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl UserConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UserConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Namespace from the config, if one was given
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Generate an example configuration
    pub fn example() -> Self {
        Self {
            metadata: ConfigMetadata {
                namespace: Some("orbit".to_string()),
            },
            spec: ConfigSpec {
                persistence: PersistenceConfig {
                    access_modes: vec!["ReadWriteOnce".to_string()],
                    storage_class: None,
                },
                external: ExternalServices {
                    database: Some(DatabaseEndpoint {
                        host: "db.internal.example.com".to_string(),
                        port: 3306,
                        username: "orbit".to_string(),
                        password: None,
                    }),
                },
            },
        }
    }
}

/// Session context for the Orbit platform API
///
/// The bearer token is assumed pre-provisioned; orbitctl never acquires one
/// itself. Loaded from environment variables, falling back to the context
/// file written by the platform console.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformContext {
    /// Base URL of the platform API
    pub server: String,

    /// Bearer token for every request
    #[serde(default)]
    pub token: String,

    /// Project the session operates in; 0 means unset
    #[serde(default)]
    pub project_id: u64,

    /// Environment the session operates in; 0 means unset
    #[serde(default)]
    pub env_id: u64,

    #[serde(default)]
    pub organization_code: String,

    #[serde(default)]
    pub project_code: String,
}

impl PlatformContext {
    /// Discover the platform session context
    ///
    /// `ORBIT_SERVER` / `ORBIT_TOKEN` override the context file at
    /// `~/.orbit/context.yml`. Returns None when neither source exists, which
    /// disables platform reconciliation for the current command.
    pub fn discover() -> Option<Self> {
        if let (Ok(server), Ok(token)) = (std::env::var("ORBIT_SERVER"), std::env::var("ORBIT_TOKEN")) {
            let mut ctx = Self::from_context_file().unwrap_or_default();
            ctx.server = server;
            ctx.token = token;
            if let Ok(project) = std::env::var("ORBIT_PROJECT_ID") {
                ctx.project_id = project.parse().unwrap_or(0);
            }
            if let Ok(env) = std::env::var("ORBIT_ENV_ID") {
                ctx.env_id = env.parse().unwrap_or(0);
            }
            return Some(ctx);
        }
        Self::from_context_file()
    }

    fn from_context_file() -> Option<Self> {
        let home = std::env::var_os("HOME")?;
        let path = Path::new(&home).join(".orbit").join("context.yml");
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    /// Render the session scope for operator-facing output
    pub fn context_info(&self) -> String {
        format!(
            "organization: {} project: {}",
            self.organization_code, self.project_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_config_roundtrip() {
        let config = UserConfig::example();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: UserConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.namespace(), Some("orbit"));
        assert_eq!(parsed.spec.persistence.access_modes, vec!["ReadWriteOnce"]);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = "metadata:\n  namespace: staging\n";
        let parsed: UserConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.namespace(), Some("staging"));
        assert!(parsed.spec.persistence.access_modes.is_empty());
        assert!(parsed.spec.external.database.is_none());
    }

    #[test]
    fn test_context_info_rendering() {
        let ctx = PlatformContext {
            organization_code: "acme".to_string(),
            project_code: "shop".to_string(),
            ..Default::default()
        };
        assert_eq!(ctx.context_info(), "organization: acme project: shop");
    }
}
