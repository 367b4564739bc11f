use crate::{
    admission::Admission,
    config::ConfigStore,
    lookup::{KubeNamespaces, NamespaceLookup},
    metrics::{AdmissionMetrics, ReloadMetrics},
    watch::ConfigWatcher,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[clap(
    name = "route-validator",
    about = "Validates Ingress and Route hostnames against per-namespace domains"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "route_validator=info,warn",
        env = "ROUTE_VALIDATOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Path to the policy configuration file.
    #[clap(
        long,
        default_value = "/etc/route-validator/config.yaml",
        env = "ROUTE_VALIDATOR_CONFIG"
    )]
    config: PathBuf,

    /// How long the config file must be quiet before it is reloaded.
    #[clap(long, default_value = "200")]
    reload_debounce_ms: u64,

    #[clap(long, default_value = "5000")]
    namespace_lookup_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            config,
            reload_debounce_ms,
            namespace_lookup_timeout_ms,
        } = self;

        let mut prom = <Registry>::default();
        let reg = prom.sub_registry_with_prefix("route_validator");
        let admission_metrics = AdmissionMetrics::register(reg);
        let reload_metrics = ReloadMetrics::register(reg);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        let store = ConfigStore::load(&config)
            .with_context(|| format!("failed to load config from {}", config.display()))?;
        let store = Arc::new(store);
        info!(path = %config.display(), fingerprint = ?store.fingerprint(), "Loaded config");

        // Hot reloading is best-effort: the initial policy keeps serving if
        // the watch cannot be established.
        if let Err(error) = ConfigWatcher::new(
            config,
            store.clone(),
            Duration::from_millis(reload_debounce_ms),
            reload_metrics,
        )
        .spawn()
        {
            error!(%error, "Failed to watch config; hot reloading is disabled");
        }

        let namespaces: Arc<dyn NamespaceLookup> = Arc::new(KubeNamespaces::new(
            runtime.client(),
            Duration::from_millis(namespace_lookup_timeout_ms),
        ));
        let runtime = runtime.spawn_server(Admission::new(store, namespaces, admission_metrics));

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
