use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use tether_core::{to_host_namespace, ClusterId};
use tether_kubehub::{get_kube_client, ClusterHandle, KubeHost};
use tether_mirror::{ControllerManager, DriftPolicy, MirrorConfig, MirrorController, OrphanPolicy, DEFAULT_WORKERS};
use tether_store::ItemBackoff;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tetherctl", version, about = "Mirror tenant cluster objects into a shared host cluster")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind { Services, Configmaps }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the mirror controllers until Ctrl-C
    Run(RunArgs),
    /// Print the host namespace a tenant namespace mirrors into
    HostNs {
        cluster: String,
        namespace: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Tenant cluster as `id=/path/to/kubeconfig` (repeatable)
    #[arg(long = "tenant", env = "TETHER_TENANTS", value_delimiter = ',')]
    tenants: Vec<TenantSpec>,

    /// Host cluster kubeconfig (default: in-cluster / KUBECONFIG)
    #[arg(long = "host-kubeconfig", env = "TETHER_HOST_KUBECONFIG")]
    host_kubeconfig: Option<PathBuf>,

    /// Resource kinds to mirror
    #[arg(long = "kinds", value_enum, value_delimiter = ',', default_values_t = [Kind::Services])]
    kinds: Vec<Kind>,

    /// Reconcile workers per controller
    #[arg(long = "workers", env = "TETHER_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Drift correction on tenant updates: off | enforce
    #[arg(long = "drift", env = "TETHER_DRIFT", default_value_t = DriftPolicy::Off)]
    drift: DriftPolicy,

    /// Mirrored objects of a removed cluster: retain | purge
    #[arg(long = "orphans", env = "TETHER_ORPHANS", default_value_t = OrphanPolicy::Retain)]
    orphans: OrphanPolicy,

    /// Do not create translated host namespaces on demand
    #[arg(long = "no-create-namespaces", action = ArgAction::SetTrue)]
    no_create_namespaces: bool,

    /// Max per-key retry backoff in seconds
    #[arg(long = "backoff-max-secs", env = "TETHER_BACKOFF_MAX_SECS", default_value_t = 1000)]
    backoff_max_secs: u64,
}

#[derive(Clone, Debug)]
struct TenantSpec {
    id: ClusterId,
    kubeconfig: PathBuf,
}

impl FromStr for TenantSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, path) = s.split_once('=').ok_or_else(|| format!("expected id=/path/to/kubeconfig, got {s:?}"))?;
        let id = ClusterId::new(id).map_err(|e| e.to_string())?;
        Ok(Self { id, kubeconfig: PathBuf::from(path) })
    }
}

impl RunArgs {
    fn mirror_config(&self) -> MirrorConfig {
        let defaults = ItemBackoff::default();
        MirrorConfig {
            workers: self.workers.max(1),
            drift: self.drift,
            orphans: self.orphans,
            create_namespaces: !self.no_create_namespaces,
            backoff: ItemBackoff::new(defaults.base, Duration::from_secs(self.backoff_max_secs)),
            ..MirrorConfig::default()
        }
    }
}

fn init_tracing() {
    let env = std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TETHER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid TETHER_METRICS_ADDR; expected host:port");
        }
    }
}

/// Composition root: construct one controller per kind, register them with
/// the manager, then hand every configured tenant cluster to the manager.
async fn run(args: RunArgs) -> Result<()> {
    let config = args.mirror_config();
    info!(workers = config.workers, drift = %config.drift, orphans = %config.orphans, "starting tether");
    let host = get_kube_client(args.host_kubeconfig.as_deref()).await.context("connecting to host cluster")?;

    let mut mgr = ControllerManager::new();
    for kind in &args.kinds {
        match kind {
            Kind::Services => mgr.add_controller(Arc::new(MirrorController::<Service>::new(
                "tenant-service-mirror",
                Arc::new(KubeHost::<Service>::new(host.clone())),
                config.clone(),
            ))),
            Kind::Configmaps => mgr.add_controller(Arc::new(MirrorController::<ConfigMap>::new(
                "tenant-configmap-mirror",
                Arc::new(KubeHost::<ConfigMap>::new(host.clone())),
                config.clone(),
            ))),
        }
    }

    for t in &args.tenants {
        let handle = match ClusterHandle::from_kubeconfig(t.id.clone(), &t.kubeconfig).await {
            Ok(h) => h,
            Err(e) => {
                error!(cluster = %t.id, error = ?e, "skipping tenant cluster");
                continue;
            }
        };
        if let Err(e) = mgr.add_cluster(&handle) {
            error!(cluster = %t.id, error = %e, "failed to add tenant cluster");
        }
    }
    if mgr.clusters().next().is_none() {
        warn!("no tenant clusters registered; controllers will idle");
    }

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let mgr = Arc::new(mgr);
    let running = tokio::spawn({
        let mgr = Arc::clone(&mgr);
        async move { mgr.run(stop_rx).await }
    });

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received; draining controllers");
    let _ = stop_tx.send(true);
    running.await.context("controller manager task")?;
    info!("tether stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::HostNs { cluster, namespace } => {
            let cluster = ClusterId::new(cluster)?;
            let host_ns = to_host_namespace(&cluster, &namespace);
            match cli.output {
                Output::Human => println!("{host_ns}"),
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "cluster": cluster,
                        "namespace": namespace,
                        "hostNamespace": host_ns,
                    }))?
                ),
            }
        }
    }
    Ok(())
}
