/// orbitctl - installer and upgrader for the Orbit platform
///
/// Drives install, upgrade and delete of the platform's releases on a
/// Kubernetes cluster through the package-manager tunnel, and reconciles the
/// Orbit control plane's view of ingress routing and deployment tasks.
mod config;
mod kube;
mod manifest;
mod platform;
mod release;
mod utils;
mod workflows;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::platform::models::{IngressPathPost, IngressPostInfo};
use crate::platform::task::describe_task;
use crate::workflows::{FatalError, Flags, Session};

#[derive(Parser)]
#[command(name = "orbitctl")]
#[command(about = "Install and operate the Orbit platform on Kubernetes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct CommonFlags {
    /// Local manifest file, wins over registry resolution
    #[arg(long)]
    resource_file: Option<PathBuf>,

    /// User configuration file
    #[arg(short = 'c', long)]
    config_file: Option<PathBuf>,

    /// Prefix applied to every release name
    #[arg(long)]
    prefix: Option<String>,

    /// Platform version to resolve from the registry
    #[arg(long)]
    version: Option<String>,

    /// Run with the disabled-timeout value instead of the default
    #[arg(long)]
    no_timeout: bool,

    /// Answer interactive inputs with their defaults
    #[arg(long)]
    skip_input: bool,

    /// Target namespace
    #[arg(long)]
    namespace: Option<String>,
}

impl From<CommonFlags> for Flags {
    fn from(flags: CommonFlags) -> Self {
        Flags {
            resource_file: flags.resource_file,
            config_file: flags.config_file,
            prefix: flags.prefix,
            version: flags.version,
            no_timeout: flags.no_timeout,
            skip_input: flags.skip_input,
            namespace: flags.namespace,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install the platform
    Install {
        #[command(flatten)]
        flags: CommonFlags,

        /// Operator contact for notifications
        #[arg(long)]
        mail: Option<String>,

        /// Components to install, all when empty
        components: Vec<String>,
    },

    /// Upgrade the platform to a new version
    Upgrade {
        #[command(flatten)]
        flags: CommonFlags,

        /// Components to upgrade, all when empty
        components: Vec<String>,
    },

    /// Delete named releases
    Delete {
        #[command(flatten)]
        flags: CommonFlags,

        /// Releases to delete
        #[arg(required = true)]
        releases: Vec<String>,
    },

    /// Inspect and manage platform ingress routing
    Ingress {
        #[command(subcommand)]
        command: IngressCommands,
    },

    /// Show the deployment-task status of a release
    Status {
        /// Release name
        release: String,
    },

    /// Generate an example user configuration file
    Init {
        /// Where to write the configuration
        #[arg(short = 'c', long, default_value = "config.yml")]
        config_file: PathBuf,
    },
}

#[derive(Subcommand)]
enum IngressCommands {
    /// List ingresses of the current environment
    List,

    /// Create an ingress
    Create {
        /// Ingress name
        name: String,

        /// Host the ingress serves
        #[arg(long)]
        host: String,

        /// Path mappings as path=service:port, repeatable
        #[arg(long = "path", required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("orbitctl={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let session = Session::discover();

    let result = match cli.command {
        Commands::Install {
            flags,
            mail,
            components,
        } => workflows::install(&flags.into(), &session, mail, &components).await,
        Commands::Upgrade { flags, components } => {
            workflows::upgrade(&flags.into(), &session, &components).await
        }
        Commands::Delete { flags, releases } => delete(&flags.into(), &session, &releases).await,
        Commands::Ingress { command } => ingress(&session, command).await,
        Commands::Status { release } => status(&session, &release).await,
        Commands::Init { config_file } => init_config(&config_file).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        let code = e
            .downcast_ref::<FatalError>()
            .map(|fatal| fatal.code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Delete releases and report the per-target outcomes
async fn delete(flags: &Flags, session: &Session, releases: &[String]) -> Result<()> {
    let outcomes = workflows::delete(flags, session, releases).await?;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.succeeded())
        .map(|o| o.name.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("Failed to delete: {}", failed.join(", "));
    }
    Ok(())
}

async fn ingress(session: &Session, command: IngressCommands) -> Result<()> {
    let platform = session
        .platform
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No platform session; set ORBIT_SERVER and ORBIT_TOKEN"))?;

    match command {
        IngressCommands::List => {
            info!("{}", platform.context_info());
            let summaries = platform
                .list_ingress(platform.project_id(), platform.env_id())
                .await?;
            if summaries.is_empty() {
                info!("No ingresses found");
                return Ok(());
            }
            for summary in summaries {
                info!(
                    "{} (id {}) host: {} status: {} paths: [{}] {}",
                    summary.name, summary.id, summary.host, summary.status, summary.paths, summary.age
                );
            }
            Ok(())
        }
        IngressCommands::Create { name, host, paths } => {
            let path_list = paths
                .iter()
                .map(|raw| parse_path_mapping(raw))
                .collect::<Result<Vec<IngressPathPost>>>()?;
            let info = IngressPostInfo {
                name,
                domain: host,
                env_id: platform.env_id(),
                path_list,
            };
            platform.create_ingress(platform.project_id(), &info).await?;
            Ok(())
        }
    }
}

async fn status(session: &Session, release: &str) -> Result<()> {
    let platform = session
        .platform
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No platform session; set ORBIT_SERVER and ORBIT_TOKEN"))?;

    let record = platform
        .task_record(platform.project_id(), release)
        .await?;
    info!("{}", describe_task(&record));
    Ok(())
}

/// Write an example user configuration, refusing to overwrite
async fn init_config(path: &PathBuf) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Configuration file already exists: {}", path.display());
    }

    let yaml = serde_yaml::to_string(&config::UserConfig::example())?;
    tokio::fs::write(path, yaml).await?;
    info!("Example configuration created: {}", path.display());
    Ok(())
}

/// Parse a path mapping given as path=service:port
fn parse_path_mapping(raw: &str) -> Result<IngressPathPost> {
    let (path, backend) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid path mapping {}, expected path=service:port", raw))?;
    let (service, port) = backend
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid backend {}, expected service:port", backend))?;
    Ok(IngressPathPost {
        path: path.to_string(),
        service_name: service.to_string(),
        service_port: port
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid port {}", port))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_mapping() {
        let mapping = parse_path_mapping("/api=backend:8080").unwrap();
        assert_eq!(mapping.path, "/api");
        assert_eq!(mapping.service_name, "backend");
        assert_eq!(mapping.service_port, 8080);

        assert!(parse_path_mapping("/api").is_err());
        assert!(parse_path_mapping("/api=backend").is_err());
        assert!(parse_path_mapping("/api=backend:http").is_err());
    }
}
