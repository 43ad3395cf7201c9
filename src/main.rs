//! keo command line entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keo::analyze::FailureAnalyzer;
use keo::config::{Args, Config};
use keo::events::MetricsSink;
use keo::execute::CommandExecutor;
use keo::orchestrator::{FAILURE_EXIT_CODE, Orchestrator, Reporter};
use keo::provider::{ClusterManager, ocm::OcmClient};
use keo::provision::OcmProvisioner;
use keo::report::{CompositeReporter, JsonReporter, SlackReporter};
use keo::upgrade::ClusterUpgrader;
use keo::{BUILD_DATE, COMMIT, VERSION};

#[tokio::main]
async fn main() {
    let config = Config::from_args(Args::parse());

    if let Err(e) = init_tracing(&config.log_format, &config.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(FAILURE_EXIT_CODE);
    }

    info!(
        "Starting keo v{} (commit: {}, build: {})",
        VERSION, COMMIT, BUILD_DATE
    );

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Run failed: {:#}", e);
            std::process::exit(FAILURE_EXIT_CODE);
        }
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` takes precedence over `level`.
fn init_tracing(format: &str, level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {e}"))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

fn build_reporter(config: &Config) -> CompositeReporter {
    let mut reporters: Vec<Box<dyn Reporter>> =
        vec![Box::new(JsonReporter::new(config.report_dir.clone()))];
    if let Some(url) = &config.slack_webhook {
        info!("Slack summary enabled");
        reporters.push(Box::new(SlackReporter::new(url.clone())));
    }
    CompositeReporter::new(reporters)
}

async fn run(config: Config) -> Result<i32> {
    config.validate().context("Invalid configuration")?;
    config.display();

    let provider: Arc<dyn ClusterManager> = Arc::new(OcmClient::new(
        config.ocm_url.clone(),
        config.ocm_token.clone(),
    ));

    let provisioner = OcmProvisioner::new(
        Arc::clone(&provider),
        &config.cluster_id,
        config.readiness(),
        config.skip_destroy_cluster,
    )
    .with_kubeconfig_path(config.kubeconfig.clone());

    let mut orchestrator = Orchestrator::new(
        Arc::new(provisioner),
        Arc::new(CommandExecutor::new(config.test_command.clone())),
        Arc::new(build_reporter(&config)),
        Arc::new(MetricsSink::new(config.report_dir.clone())),
        config.report_dir.clone(),
    );

    if config.enable_analysis {
        orchestrator = orchestrator.with_analyzer(Arc::new(FailureAnalyzer::new()));
    }
    if let Some(settings) = config.upgrade.clone() {
        info!("Upgrade enabled: {:?}", settings.target);
        orchestrator = orchestrator.with_upgrader(Arc::new(ClusterUpgrader::new(
            Arc::clone(&provider),
            settings,
            &config.channel_group,
            &config.graph_url,
            config.readiness(),
        )));
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received interrupt, cancelling run");
                signal_cancel.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    let result = orchestrator.run(&cancel).await;
    info!(
        cluster_id = %result.cluster_id,
        tests_passed = result.tests_passed,
        upgrade_passed = ?result.upgrade_passed,
        errors = result.errors.len(),
        exit_code = result.exit_code,
        "Run finished"
    );
    for e in &result.errors {
        warn!("Run error: {}", e);
    }

    Ok(result.exit_code)
}
