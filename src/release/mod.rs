/// Release operations through the package-manager tunnel
///
/// Wraps the tunnel address with install/upgrade/delete operations against
/// named releases, driving helm with `HELM_HOST` pointed at the forwarded
/// port. Provenance labels are applied to everything a release creates.
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::kube::ClusterTunnel;
use crate::manifest::{Component, ComponentInput};
use crate::utils::command::CommandBuilder;
use crate::workflows::{InstallDefinition, UpgradeDefinition};

/// Label key marking objects created by this installer
pub const LABEL_KEY: &str = "orbit-usage";

/// Label value marking objects created by this installer
pub const LABEL_VALUE: &str = "orbit-installer";

/// Kinds of deletable units
///
/// Only full releases are recognized today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    Release,
}

impl std::fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseKind::Release => write!(f, "release"),
        }
    }
}

/// Client for release operations against the open tunnel
#[derive(Debug)]
pub struct ReleaseClient {
    helm_host: String,
    kubeconfig: Option<PathBuf>,
}

impl ReleaseClient {
    pub fn new(tunnel: &ClusterTunnel, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            helm_host: tunnel.address(),
            kubeconfig,
        }
    }

    /// Check if helm is installed
    pub async fn check_helm_installed() -> Result<()> {
        crate::utils::command::check_tool_installed(
            "helm",
            &["version", "--client"],
            "https://helm.sh/docs/intro/install/",
        )
        .await
    }

    /// Install every component of the definition as a fresh release
    pub async fn install(&self, definition: &InstallDefinition) -> Result<()> {
        for component in &definition.components {
            let inputs = resolve_inputs(component, definition.skip_input)?;
            let args = install_args(definition, component, &inputs);

            info!(
                "Installing {} ({} {})",
                component.name, component.chart, component.chart_version
            );
            CommandBuilder::new("helm")
                .args(&args)
                .helm_host(&self.helm_host)
                .kubeconfig(self.kubeconfig.as_deref())
                .context(format!("Failed to install {}", component.name))
                .run_silent()
                .await?;
        }
        Ok(())
    }

    /// Upgrade every component of the definition in place
    pub async fn upgrade(&self, definition: &UpgradeDefinition) -> Result<()> {
        for component in &definition.components {
            let args = upgrade_args(definition, component);

            info!(
                "Upgrading {} to {} {}",
                component.name, component.chart, component.chart_version
            );
            CommandBuilder::new("helm")
                .args(&args)
                .helm_host(&self.helm_host)
                .kubeconfig(self.kubeconfig.as_deref())
                .context(format!("Failed to upgrade {}", component.name))
                .run_silent()
                .await?;
        }
        Ok(())
    }

    /// Remove a named release of the given kind
    pub async fn delete_release(
        &self,
        name: &str,
        namespace: &str,
        kind: ReleaseKind,
    ) -> Result<()> {
        debug!("Deleting {} {} in namespace {}", kind, name, namespace);
        CommandBuilder::new("helm")
            .args(&delete_args(name, kind))
            .helm_host(&self.helm_host)
            .kubeconfig(self.kubeconfig.as_deref())
            .context(format!("Failed to delete {} {}", kind, name))
            .run_silent()
            .await
    }
}

/// Answer a component's interactive inputs
///
/// With skip-input each declared default is used verbatim; an input without
/// a default cannot be skipped.
fn resolve_inputs(component: &Component, skip_input: bool) -> Result<Vec<(String, String)>> {
    let mut answers = Vec::new();
    for input in &component.inputs {
        let value = if skip_input {
            input.default.clone().with_context(|| {
                format!(
                    "Input {} of {} has no default and cannot be skipped",
                    input.key, component.name
                )
            })?
        } else {
            prompt_input(input)?
        };
        answers.push((input.key.clone(), value));
    }
    Ok(answers)
}

fn prompt_input(input: &ComponentInput) -> Result<String> {
    // Secret defaults stay off the terminal.
    match &input.default {
        Some(default) if !input.password => print!("{} [{}]: ", input.prompt, default),
        _ => print!("{}: ", input.prompt),
    }
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read input")?;
    let answer = answer.trim();
    if answer.is_empty() {
        return input
            .default
            .clone()
            .with_context(|| format!("Input {} requires a value", input.key));
    }
    Ok(answer.to_string())
}

fn install_args(
    definition: &InstallDefinition,
    component: &Component,
    inputs: &[(String, String)],
) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        component.chart.clone(),
        "--name".to_string(),
        format!("{}{}", definition.prefix, component.name),
        "--namespace".to_string(),
        definition.namespace.clone(),
        "--version".to_string(),
        component.chart_version.clone(),
        "--timeout".to_string(),
        definition.timeout_secs.to_string(),
    ];

    for (key, value) in &definition.common_labels {
        args.push("--set".to_string());
        args.push(format!("commonLabels.{}={}", key, value));
    }

    if component.persistence {
        args.push("--set".to_string());
        args.push(format!(
            "persistence.accessModes={{{}}}",
            definition.access_modes.join(",")
        ));
    }

    if let Some(mail) = &definition.mail {
        args.push("--set".to_string());
        args.push(format!("global.notification.email={}", mail));
    }

    for (key, value) in &definition.external_values {
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in &component.values {
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in inputs {
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value));
    }

    args
}

fn upgrade_args(definition: &UpgradeDefinition, component: &Component) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        format!("{}{}", definition.prefix, component.name),
        component.chart.clone(),
        "--version".to_string(),
        component.chart_version.clone(),
        "--timeout".to_string(),
        definition.timeout_secs.to_string(),
    ];

    for (key, value) in &component.values {
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value));
    }

    args
}

fn delete_args(name: &str, kind: ReleaseKind) -> Vec<String> {
    match kind {
        ReleaseKind::Release => vec!["delete".to_string(), "--purge".to_string(), name.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::resolve_defaults;
    use std::collections::BTreeMap;

    fn sample_component() -> Component {
        Component {
            name: "registry".to_string(),
            chart: "orbit/registry".to_string(),
            chart_version: "0.5.1".to_string(),
            values: BTreeMap::from([("service.enabled".to_string(), "true".to_string())]),
            inputs: vec![],
            persistence: true,
        }
    }

    fn sample_definition() -> InstallDefinition {
        let defaults = resolve_defaults(Some("orbit"), &[], false);
        InstallDefinition {
            version: "0.19.0".to_string(),
            namespace: defaults.namespace,
            prefix: "prod-".to_string(),
            timeout_secs: defaults.timeout_secs,
            skip_input: true,
            common_labels: BTreeMap::from([(LABEL_KEY.to_string(), LABEL_VALUE.to_string())]),
            access_modes: defaults.access_modes,
            mail: Some("ops@example.com".to_string()),
            external_values: BTreeMap::from([(
                "global.database.host".to_string(),
                "db.internal".to_string(),
            )]),
            components: vec![sample_component()],
            client: None,
        }
    }

    #[test]
    fn test_install_args_carry_labels_and_namespace() {
        let definition = sample_definition();
        let args = install_args(&definition, &definition.components[0], &[]);

        let joined = args.join(" ");
        assert!(joined.contains("install orbit/registry"));
        assert!(joined.contains("--name prod-registry"));
        assert!(joined.contains("--namespace orbit"));
        assert!(joined.contains("commonLabels.orbit-usage=orbit-installer"));
        assert!(joined.contains("persistence.accessModes={ReadWriteOnce}"));
        assert!(joined.contains("global.notification.email=ops@example.com"));
        assert!(joined.contains("global.database.host=db.internal"));
        assert!(joined.contains("service.enabled=true"));
    }

    #[test]
    fn test_install_args_without_persistence() {
        let mut definition = sample_definition();
        definition.components[0].persistence = false;
        let args = install_args(&definition, &definition.components[0], &[]);
        assert!(!args.join(" ").contains("accessModes"));
    }

    #[test]
    fn test_upgrade_args_do_not_set_namespace() {
        let definition = UpgradeDefinition {
            version: "0.20.0".to_string(),
            prefix: String::new(),
            timeout_secs: 3600,
            components: vec![sample_component()],
            client: None,
        };
        let args = upgrade_args(&definition, &definition.components[0]);
        let joined = args.join(" ");
        assert!(joined.starts_with("upgrade registry orbit/registry"));
        assert!(!joined.contains("--namespace"));
    }

    #[test]
    fn test_delete_args_purge_release() {
        let args = delete_args("prod-registry", ReleaseKind::Release);
        assert_eq!(args, vec!["delete", "--purge", "prod-registry"]);
    }

    #[test]
    fn test_skip_input_uses_defaults() {
        let mut component = sample_component();
        component.inputs = vec![ComponentInput {
            key: "admin.password".to_string(),
            prompt: "Admin password".to_string(),
            default: Some("changeit".to_string()),
            password: true,
        }];
        let answers = resolve_inputs(&component, true).unwrap();
        assert_eq!(
            answers,
            vec![("admin.password".to_string(), "changeit".to_string())]
        );
    }

    #[test]
    fn test_skip_input_without_default_is_an_error() {
        let mut component = sample_component();
        component.inputs = vec![ComponentInput {
            key: "admin.password".to_string(),
            prompt: "Admin password".to_string(),
            default: None,
            password: true,
        }];
        assert!(resolve_inputs(&component, true).is_err());
    }

    #[test]
    fn test_release_kind_display() {
        assert_eq!(ReleaseKind::Release.to_string(), "release");
    }
}
