//! Lattice AuthorizationPolicy controller

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use lattice_policy_cache::{CompileFailurePolicy, PolicyProvider, ReconcilerConfig};
use tokio_util::sync::CancellationToken;

use lattice_authz::controller::{AuthzPolicyCache, DispatchConfig, Dispatcher};
use lattice_authz::telemetry::{init_tracing, LogFormat};
use lattice_authz::{AuthorizationPolicy, CedarCompiler, KubePolicySource};

/// Interval between policy cache status reports
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Lattice authz - keeps compiled AuthorizationPolicies ready for ext_authz
#[derive(Parser, Debug)]
#[command(name = "lattice-authz", version, about, long_about = None)]
struct Cli {
    /// Generate the AuthorizationPolicy CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Only watch this namespace (default: all namespaces)
    #[arg(long, env = "LATTICE_AUTHZ_NAMESPACE")]
    namespace: Option<String>,

    /// Cedar schema file used for strict policy validation
    #[arg(long, env = "LATTICE_AUTHZ_SCHEMA_FILE")]
    schema_file: Option<PathBuf>,

    /// Drop a policy when a newer revision fails to compile
    /// instead of keeping the last good one
    #[arg(long)]
    evict_on_compile_failure: bool,

    /// Maximum reconciles in flight at once
    #[arg(long, default_value_t = 16)]
    max_concurrent_reconciles: usize,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&AuthorizationPolicy::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    let compiler = match &cli.schema_file {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read schema file {}: {}", path.display(), e)
            })?;
            CedarCompiler::from_schema_text(&text)?
        }
        None => CedarCompiler::new(),
    };

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let reconciler_config = ReconcilerConfig {
        compile_failure: if cli.evict_on_compile_failure {
            CompileFailurePolicy::Evict
        } else {
            CompileFailurePolicy::RetainPrevious
        },
    };

    let cache = AuthzPolicyCache::new(
        Arc::new(KubePolicySource::new(client.clone())),
        Arc::new(compiler),
        reconciler_config,
    );
    let dispatcher = Arc::new(Dispatcher::new(
        &cache,
        DispatchConfig {
            max_concurrent_reconciles: cli.max_concurrent_reconciles,
            ..DispatchConfig::default()
        },
    ));

    let cancel = CancellationToken::new();
    let controller = tokio::spawn(dispatcher.run(client, cli.namespace.clone(), cancel.clone()));

    let provider = cache.provider();
    let store = cache.store();
    let metrics = cache.metrics();
    let mut status = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = status.tick() => {
                if let Ok(policies) = provider.compiled_policies(&cancel) {
                    tracing::info!(
                        policies = policies.len(),
                        stored = store.len(),
                        upserts = metrics.upserts(),
                        removals = metrics.removals(),
                        invalidations = metrics.invalidations(),
                        recomputes = metrics.snapshot_recomputes(),
                        hit_rate = metrics.snapshot_hit_rate(),
                        compile_failures = metrics.compile_failures(),
                        fetch_errors = metrics.fetch_errors(),
                        "Policy cache status"
                    );
                }
            }
        }
    }

    cancel.cancel();
    controller
        .await
        .map_err(|e| anyhow::anyhow!("Controller task failed: {}", e))?;

    Ok(())
}
