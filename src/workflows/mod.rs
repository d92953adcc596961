/// Release lifecycle workflows
///
/// Composes manifest resolution, the cluster tunnel, the release client and
/// the platform API into the three top-level workflows: install, upgrade and
/// delete. Each workflow is a single linear pass; the tunnel is released on
/// every exit path, including panics, through the tunnel's drop guard.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::config::{PlatformContext, UserConfig};
use crate::kube::{ClusterTunnel, TunnelConfig};
use crate::manifest::{Component, ReleaseManifest, ResourceDefinition};
use crate::platform::PlatformClient;
use crate::release::{ReleaseClient, ReleaseKind, LABEL_KEY, LABEL_VALUE};

/// Namespace used when neither the flags nor the user config name one
pub const FALLBACK_NAMESPACE: &str = "orbit-system";

/// Access mode used when the user config does not request any
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Per-run timeout handed to the package manager
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// "Disabled" timeout: one day, same code path as any other timeout
pub const DISABLED_TIMEOUT_SECS: u64 = 60 * 60 * 24;

// Documented process exit codes for fatal preconditions.
pub const EXIT_MISSING_RESOURCE: i32 = 123;
pub const EXIT_INVALID_USER_CONFIG: i32 = 124;
pub const EXIT_MISSING_USER_CONFIG: i32 = 127;
pub const EXIT_EMPTY_VERSION: i32 = 128;
pub const EXIT_TUNNEL_FAILED: i32 = 129;

/// A non-retryable precondition failure with its documented exit status
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FatalError {
    pub code: i32,
    pub message: String,
}

/// Build an anyhow error wrapping a fatal precondition
pub fn fatal(code: i32, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(FatalError {
        code,
        message: message.into(),
    })
}

/// Flags consumed by the workflows, wired up by the CLI layer
#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub resource_file: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub prefix: Option<String>,
    pub version: Option<String>,
    pub no_timeout: bool,
    pub skip_input: bool,
    pub namespace: Option<String>,
}

/// Per-invocation session context
///
/// Holds the optional platform API client and the tunnel configuration.
/// Passed explicitly into each workflow; nothing is shared across
/// invocations.
pub struct Session {
    pub platform: Option<PlatformClient>,
    pub tunnel: TunnelConfig,
}

impl Session {
    /// Discover ambient platform credentials and cluster config
    pub fn discover() -> Self {
        let platform = PlatformContext::discover().and_then(|ctx| match PlatformClient::new(ctx) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Ignoring platform context: {}", e);
                None
            }
        });
        if platform.is_none() {
            debug!("No platform session; platform reconciliation disabled");
        }
        Self {
            platform,
            tunnel: TunnelConfig::default(),
        }
    }
}

/// Everything one install run needs, built once per invocation
#[derive(Debug)]
pub struct InstallDefinition {
    pub version: String,
    pub namespace: String,
    pub prefix: String,
    pub timeout_secs: u64,
    pub skip_input: bool,
    pub common_labels: BTreeMap<String, String>,
    pub access_modes: Vec<String>,
    /// Operator contact for notifications
    pub mail: Option<String>,
    /// Values derived from the user config, handed to every component
    pub external_values: BTreeMap<String, String>,
    pub components: Vec<Component>,
    /// Attached once the tunnel is open
    pub client: Option<ReleaseClient>,
}

impl InstallDefinition {
    pub async fn run(&self) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .context("Release client not attached to install definition")?;
        client.install(self).await
    }
}

/// Everything one upgrade run needs
///
/// Upgrades target existing releases and do not re-apply namespace defaults.
pub struct UpgradeDefinition {
    pub version: String,
    pub prefix: String,
    pub timeout_secs: u64,
    pub components: Vec<Component>,
    pub client: Option<ReleaseClient>,
}

impl UpgradeDefinition {
    pub async fn run(&self) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .context("Release client not attached to upgrade definition")?;
        client.upgrade(self).await
    }
}

/// Layered configuration defaults, resolved in one place
pub struct ResolvedDefaults {
    pub namespace: String,
    pub access_modes: Vec<String>,
    pub timeout_secs: u64,
}

/// Apply the configuration precedence rules
///
/// Explicit user values always beat the hard-coded fallbacks; the no-timeout
/// flag selects the large disabled-timeout value on the same code path.
/// Callers layer manifest defaults under user values before calling in, so
/// the full chain is flags > user config > manifest > fallback.
pub fn resolve_defaults(
    user_namespace: Option<&str>,
    user_access_modes: &[String],
    no_timeout: bool,
) -> ResolvedDefaults {
    ResolvedDefaults {
        namespace: user_namespace.unwrap_or(FALLBACK_NAMESPACE).to_string(),
        access_modes: if user_access_modes.is_empty() {
            vec![DEFAULT_ACCESS_MODE.to_string()]
        } else {
            user_access_modes.to_vec()
        },
        timeout_secs: if no_timeout {
            DISABLED_TIMEOUT_SECS
        } else {
            DEFAULT_TIMEOUT_SECS
        },
    }
}

/// Build the install definition from flags, user config and manifest
///
/// Fatal (distinct exit codes) when the user config is missing or invalid,
/// when neither a resource file nor a version is given, or when resolution
/// yields an empty version.
pub async fn get_install(flags: &Flags) -> Result<InstallDefinition> {
    let user_config = load_user_config(flags)?;

    let manifest = resolve_manifest(flags, false).await?;
    if manifest.version.is_empty() {
        return Err(fatal(
            EXIT_EMPTY_VERSION,
            "Resolved manifest has no version; refusing to install",
        ));
    }

    let user_modes = if user_config.spec.persistence.access_modes.is_empty() {
        &manifest.access_modes
    } else {
        &user_config.spec.persistence.access_modes
    };
    let defaults = resolve_defaults(
        flags
            .namespace
            .as_deref()
            .or_else(|| user_config.namespace())
            .or(manifest.namespace.as_deref()),
        user_modes,
        flags.no_timeout,
    );

    Ok(InstallDefinition {
        version: manifest.version,
        namespace: defaults.namespace,
        prefix: flags.prefix.clone().unwrap_or_default(),
        timeout_secs: defaults.timeout_secs,
        skip_input: flags.skip_input,
        common_labels: BTreeMap::from([(LABEL_KEY.to_string(), LABEL_VALUE.to_string())]),
        access_modes: defaults.access_modes,
        mail: None,
        external_values: external_values(&user_config),
        components: manifest.components,
        client: None,
    })
}

/// Turn user-config externals into values every component receives
fn external_values(config: &UserConfig) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    if let Some(db) = &config.spec.external.database {
        values.insert("global.database.host".to_string(), db.host.clone());
        values.insert("global.database.port".to_string(), db.port.to_string());
        values.insert(
            "global.database.username".to_string(),
            db.username.clone(),
        );
        if let Some(password) = &db.password {
            values.insert("global.database.password".to_string(), password.clone());
        }
    }
    if let Some(class) = &config.spec.persistence.storage_class {
        values.insert("persistence.storageClass".to_string(), class.clone());
    }
    values
}

/// Install the platform
pub async fn install(
    flags: &Flags,
    session: &Session,
    mail: Option<String>,
    targets: &[String],
) -> Result<()> {
    let mut definition = get_install(flags).await?;
    definition.mail = mail;
    definition.components = select_components(definition.components, targets)?;

    info!(
        "Installing Orbit {} into namespace {}",
        definition.version, definition.namespace
    );

    let mut tunnel = open_tunnel(&session.tunnel).await?;
    definition.client = Some(ReleaseClient::new(
        &tunnel,
        session.tunnel.kubeconfig.clone(),
    ));

    let result = definition.run().await;
    tunnel.close().await;
    result
}

/// Upgrade the platform to the requested version
pub async fn upgrade(flags: &Flags, session: &Session, targets: &[String]) -> Result<()> {
    let mut tunnel = open_tunnel(&session.tunnel).await?;

    let result = async {
        let manifest = resolve_manifest(flags, true).await?;
        if manifest.version.is_empty() {
            return Err(fatal(
                EXIT_EMPTY_VERSION,
                "Resolved upgrade manifest has no version",
            ));
        }

        let definition = UpgradeDefinition {
            version: manifest.version.clone(),
            prefix: flags.prefix.clone().unwrap_or_default(),
            timeout_secs: if flags.no_timeout {
                DISABLED_TIMEOUT_SECS
            } else {
                DEFAULT_TIMEOUT_SECS
            },
            components: select_components(manifest.components, targets)?,
            client: Some(ReleaseClient::new(
                &tunnel,
                session.tunnel.kubeconfig.clone(),
            )),
        };

        info!("Upgrading Orbit to {}", definition.version);
        definition.run().await
    }
    .await;

    tunnel.close().await;
    result
}

/// Outcome of one delete target
pub struct TargetOutcome {
    pub name: String,
    pub result: Result<()>,
}

impl TargetOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delete the named releases
///
/// Targets are independent: one failure is logged and the remaining targets
/// are still attempted. The per-target outcomes are returned in order so the
/// caller keeps full detail instead of a single collapsed error.
pub async fn delete(
    flags: &Flags,
    session: &Session,
    targets: &[String],
) -> Result<Vec<TargetOutcome>> {
    let mut tunnel = open_tunnel(&session.tunnel).await?;

    let context = DeleteContext {
        namespace: flags
            .namespace
            .clone()
            .unwrap_or_else(|| FALLBACK_NAMESPACE.to_string()),
        client: ReleaseClient::new(&tunnel, session.tunnel.kubeconfig.clone()),
        platform: session.platform.as_ref(),
    };

    let outcomes = context.run(targets).await;
    tunnel.close().await;
    Ok(outcomes)
}

/// Scope of a single delete invocation
struct DeleteContext<'a> {
    namespace: String,
    client: ReleaseClient,
    platform: Option<&'a PlatformClient>,
}

impl DeleteContext<'_> {
    async fn run(&self, targets: &[String]) -> Vec<TargetOutcome> {
        delete_targets(
            targets,
            |name| async move {
                self.client
                    .delete_release(&name, &self.namespace, ReleaseKind::Release)
                    .await
            },
            |name| async move { self.track_deletion(&name).await },
        )
        .await
    }

    /// Best-effort deletion-tracking hook; logged, never propagated
    async fn track_deletion(&self, name: &str) {
        let Some(platform) = self.platform else {
            debug!("No platform session, skipping task tracking for {}", name);
            return;
        };
        if let Err(e) = platform.mark_task_deleted(platform.project_id(), name).await {
            warn!("Failed to mark task record for {} as deleted: {}", name, e);
        }
    }
}

/// Drive the per-target delete loop
///
/// The tracking hook runs after every attempt, success or failure, and a
/// failed target never stops the loop.
async fn delete_targets<D, DF, T, TF>(
    targets: &[String],
    mut delete_one: D,
    mut track_one: T,
) -> Vec<TargetOutcome>
where
    D: FnMut(String) -> DF,
    DF: Future<Output = Result<()>>,
    T: FnMut(String) -> TF,
    TF: Future<Output = ()>,
{
    let mut outcomes = Vec::with_capacity(targets.len());
    for name in targets {
        let result = delete_one(name.clone()).await;
        match &result {
            Ok(()) => info!("Deleted {}", name),
            Err(e) => {
                error!("{:#}", e);
                error!("Delete {} failed", name);
            }
        }
        track_one(name.clone()).await;
        outcomes.push(TargetOutcome {
            name: name.clone(),
            result,
        });
    }
    outcomes
}

fn load_user_config(flags: &Flags) -> Result<UserConfig> {
    let Some(path) = &flags.config_file else {
        return Err(fatal(
            EXIT_MISSING_USER_CONFIG,
            "A user config file is required for install (-c/--config-file)",
        ));
    };
    UserConfig::from_file(path).map_err(|e| {
        fatal(
            EXIT_INVALID_USER_CONFIG,
            format!("Failed to load user config {}: {:#}", path.display(), e),
        )
    })
}

async fn resolve_manifest(flags: &Flags, for_upgrade: bool) -> Result<ReleaseManifest> {
    if flags.resource_file.is_none() && flags.version.is_none() {
        return Err(fatal(
            EXIT_MISSING_RESOURCE,
            "Either --resource-file or --version is required",
        ));
    }
    let definition = ResourceDefinition::new(
        flags.resource_file.clone(),
        flags.version.clone().unwrap_or_default(),
    );
    if for_upgrade {
        definition.resolve_upgrade().await
    } else {
        definition.resolve().await
    }
}

async fn open_tunnel(config: &TunnelConfig) -> Result<ClusterTunnel> {
    ReleaseClient::check_helm_installed().await?;
    ClusterTunnel::open(config).await.map_err(|e| {
        fatal(
            EXIT_TUNNEL_FAILED,
            format!("Failed to open package-manager tunnel: {:#}", e),
        )
    })
}

/// Keep only the requested components, all of them when none are named
fn select_components(components: Vec<Component>, targets: &[String]) -> Result<Vec<Component>> {
    if targets.is_empty() {
        return Ok(components);
    }
    for target in targets {
        if !components.iter().any(|c| &c.name == target) {
            anyhow::bail!("Component {} is not part of the manifest", target);
        }
    }
    Ok(components
        .into_iter()
        .filter(|c| targets.contains(&c.name))
        .collect())
}
