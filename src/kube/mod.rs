/// Cluster tunnel management
///
/// The tunnel is the control channel between orbitctl and the cluster's
/// package-manager service, realized as a `kubectl port-forward` child
/// process. Exactly one tunnel is open per command invocation; it is owned
/// exclusively by that invocation and torn down on every exit path.
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Namespace the package-manager service lives in
pub const PACKAGE_MANAGER_NAMESPACE: &str = "kube-system";

/// Service name of the package manager
pub const PACKAGE_MANAGER_SERVICE: &str = "tiller-deploy";

/// Port the package manager listens on inside the cluster
pub const PACKAGE_MANAGER_PORT: u16 = 44134;

const TUNNEL_READY_TIMEOUT_SECS: u64 = 30;

/// Where and how to open the tunnel
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Ambient kubeconfig, if one was discovered
    pub kubeconfig: Option<PathBuf>,
    pub namespace: String,
    pub service: String,
    pub remote_port: u16,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            kubeconfig: ambient_kubeconfig(),
            namespace: PACKAGE_MANAGER_NAMESPACE.to_string(),
            service: PACKAGE_MANAGER_SERVICE.to_string(),
            remote_port: PACKAGE_MANAGER_PORT,
        }
    }
}

/// Discover the ambient cluster credentials
///
/// Prefers `$KUBECONFIG`, falls back to `~/.kube/config`. A missing config is
/// logged but not fatal here: kubectl may still reach a cluster through its
/// own defaulting, so the tunnel handle decides success.
pub fn ambient_kubeconfig() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("KUBECONFIG") {
        return Some(PathBuf::from(path));
    }
    if let Some(home) = std::env::var_os("HOME") {
        let path = PathBuf::from(home).join(".kube").join("config");
        if path.exists() {
            return Some(path);
        }
    }
    warn!("No kubeconfig found; relying on kubectl defaults");
    None
}

/// Open control channel to the cluster's package manager
///
/// Closing is guaranteed: `close` is idempotent, and dropping an unclosed
/// tunnel kills the port-forward child, so the channel is released even when
/// a workflow errors out or panics mid-run.
pub struct ClusterTunnel {
    child: Option<tokio::process::Child>,
    local_port: u16,
}

impl ClusterTunnel {
    /// Establish the port-forward to the package manager
    pub async fn open(config: &TunnelConfig) -> Result<Self> {
        crate::utils::command::check_tool_installed(
            "kubectl",
            &["version", "--client"],
            "https://kubernetes.io/docs/tasks/tools/",
        )
        .await?;

        let local_port = free_local_port()?;
        let target = format!("svc/{}", config.service);
        let ports = format!("{}:{}", local_port, config.remote_port);

        info!(
            "Opening tunnel to {}/{} on 127.0.0.1:{}",
            config.namespace, config.service, local_port
        );

        let mut command = Command::new("kubectl");
        command
            .args(["port-forward", "-n", &config.namespace, &target, &ports])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &config.kubeconfig {
            command.env("KUBECONFIG", path);
        }

        let mut child = command
            .spawn()
            .context("Failed to spawn kubectl port-forward")?;

        // The forward is ready once the local port accepts a connection.
        let start = Instant::now();
        let timeout = Duration::from_secs(TUNNEL_READY_TIMEOUT_SECS);
        loop {
            if let Some(status) = child.try_wait()? {
                let stderr = read_child_stderr(&mut child).await;
                anyhow::bail!("kubectl port-forward exited with {}: {}", status, stderr);
            }

            if tokio::net::TcpStream::connect(("127.0.0.1", local_port))
                .await
                .is_ok()
            {
                debug!("Tunnel ready on 127.0.0.1:{}", local_port);
                break;
            }

            if start.elapsed() > timeout {
                let _ = child.kill().await;
                anyhow::bail!(
                    "Tunnel to {}/{} did not become ready within {} seconds",
                    config.namespace,
                    config.service,
                    TUNNEL_READY_TIMEOUT_SECS
                );
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        Ok(Self {
            child: Some(child),
            local_port,
        })
    }

    /// Local address the package manager is reachable on
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.local_port)
    }

    /// Tear the tunnel down; a second call is a no-op
    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("Closing tunnel on 127.0.0.1:{}", self.local_port);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill port-forward process: {}", e);
            }
            let _ = child.wait().await;
        }
    }

    #[cfg(test)]
    fn from_parts(child: tokio::process::Child, local_port: u16) -> Self {
        Self {
            child: Some(child),
            local_port,
        }
    }
}

impl Drop for ClusterTunnel {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("Tunnel dropped while open, killing port-forward");
            let _ = child.start_kill();
        }
    }
}

fn free_local_port() -> Result<u16> {
    let listener =
        std::net::TcpListener::bind(("127.0.0.1", 0)).context("Failed to pick a local port")?;
    Ok(listener.local_addr()?.port())
}

async fn read_child_stderr(child: &mut tokio::process::Child) -> String {
    use tokio::io::AsyncReadExt;
    let mut buf = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut buf).await;
    }
    buf.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_placeholder() -> tokio::process::Child {
        Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_free_local_port() {
        let port = free_local_port().unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut tunnel = ClusterTunnel::from_parts(spawn_placeholder(), 45000);
        assert!(tunnel.child.is_some());

        tunnel.close().await;
        assert!(tunnel.child.is_none());

        // Second close must be a no-op, and the drop that follows must not
        // try to kill the already-reaped child.
        tunnel.close().await;
        assert!(tunnel.child.is_none());
    }

    #[tokio::test]
    async fn test_address_format() {
        let mut tunnel = ClusterTunnel::from_parts(spawn_placeholder(), 44134);
        assert_eq!(tunnel.address(), "127.0.0.1:44134");
        tunnel.close().await;
    }

    #[tokio::test]
    async fn test_drop_while_open_kills_child() {
        let tunnel = ClusterTunnel::from_parts(spawn_placeholder(), 45001);
        // Dropping without close must not panic and must reap the child.
        drop(tunnel);
    }
}
