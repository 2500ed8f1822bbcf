use clap::Parser;
use gateway::config::Config;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// HTTP ingress gateway for call uploads.
#[derive(Parser)]
#[command(name = "gateway", version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "gateway.yaml")]
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_file(&args.config)?;

    if let Some(metrics_config) = &config.metrics {
        install_statsd_recorder(&metrics_config.statsd_host, metrics_config.statsd_port);
    }

    if config.listener.host == "0.0.0.0" {
        tracing::warn!("binding to all interfaces; restrict the listener host in production");
    }
    if config.tls.is_some() {
        tracing::warn!("TLS is configured but not yet supported, serving plain HTTP");
    }

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        http2 = config.enable_http2,
        worker_threads = config.worker_threads,
        max_request_body_size = config.max_request_body_size,
        "starting call gateway"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;
    runtime.block_on(gateway::run(config))?;

    tracing::info!("server shutdown complete");
    Ok(())
}

fn install_statsd_recorder(host: &str, port: u16) {
    let recorder = match StatsdBuilder::from(host, port).build(Some("gateway")) {
        Ok(recorder) => recorder,
        Err(err) => {
            tracing::warn!(error = %err, "failed to build statsd recorder, metrics disabled");
            return;
        }
    };
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("metrics recorder already installed");
    }
}
