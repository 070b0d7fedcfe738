use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use tether_core::build::build;
use tether_core::config::{normalize, RawConfig};
use tether_deploy::ServiceDeployment;
use tether_engine::{manifest, KubeEngine};

#[derive(Parser, Debug)]
#[command(name = "tetherctl", version, about = "Tether CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (wins over the config file)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the workload/endpoint pair and wait for its address
    Up {
        /// Component name; workload, endpoint and labels all derive from it
        name: String,
        /// Path to the YAML configuration file
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Print the manifests that would be submitted, without touching a cluster
    Render {
        /// Component name
        name: String,
        /// Path to the YAML configuration file
        #[arg(short = 'f', long = "file")]
        file: String,
    },
}

fn init_tracing() {
    let env = std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TETHER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TETHER_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_config(path: &str, ns_override: Option<&str>) -> Result<RawConfig> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    let mut raw: RawConfig = serde_yaml::from_str(&text).context("parsing config YAML")?;
    if let Some(ns) = ns_override {
        raw.namespace = Some(ns.to_string());
    }
    Ok(raw)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Up { name, file } => {
            info!(component = %name, file = %file, "up invoked");
            let raw = load_config(&file, cli.namespace.as_deref())?;
            let engine = KubeEngine::try_default().await?;
            let deployment = ServiceDeployment::up(&name, raw, &engine).await?;
            let address = tokio::select! {
                res = deployment.address.wait() => res?,
                _ = tokio::signal::ctrl_c() => {
                    error!(component = %name, "interrupted before the address resolved");
                    anyhow::bail!("interrupted");
                }
            };
            match cli.output {
                Output::Human => {
                    if address.is_empty() {
                        println!("{name}: up (no address allocated)");
                    } else {
                        println!("{name}: up at {address}");
                    }
                }
                Output::Json => println!(
                    "{}",
                    serde_json::json!({ "component": name, "address": address })
                ),
            }
        }
        Commands::Render { name, file } => {
            let raw = load_config(&file, cli.namespace.as_deref())?;
            let cfg = normalize(raw)?;
            let (workload, endpoint) = build(&name, &cfg);
            let dep = manifest::workload_manifest(&workload);
            // Render-time preview: the selector binding resolves to the
            // labels the build step just produced.
            let svc = cfg
                .exposes_ports()
                .then(|| manifest::endpoint_manifest(&endpoint, &workload.labels));
            match cli.output {
                Output::Human => {
                    print!("{}", serde_yaml::to_string(&dep)?);
                    if let Some(svc) = svc {
                        println!("---");
                        print!("{}", serde_yaml::to_string(&svc)?);
                    }
                }
                Output::Json => {
                    let mut docs = vec![serde_json::to_value(&dep)?];
                    if let Some(svc) = svc {
                        docs.push(serde_json::to_value(&svc)?);
                    }
                    println!("{}", serde_json::to_string_pretty(&docs)?);
                }
            }
        }
    }

    Ok(())
}
