// ABOUTME: SMSC gateway daemon: listens for ESME binds and relays submissions to the log
// ABOUTME: Receipts follow each registered submission; Ctrl-C shuts everything down in order

use argh::FromArgs;
use smsc_gateway::config::{AuthConfig, GatewayConfig, PipelineConfig, SchedulerConfig};
use smsc_gateway::pipeline::LoggingRelay;
use smsc_gateway::server::Gateway;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// SMPP gateway accepting submissions and returning delivery receipts
#[derive(FromArgs)]
struct CliArgs {
    /// port to listen on; repeat for several ports
    #[argh(option, short = 'p')]
    port: Vec<u16>,

    /// interface to listen on (default: 0.0.0.0)
    #[argh(option)]
    host: Option<String>,

    /// system id an ESME must bind with (default: smppclient1)
    #[argh(option)]
    system_id: Option<String>,

    /// password an ESME must bind with (default: password)
    #[argh(option)]
    password: Option<String>,

    /// accept any credentials
    #[argh(switch)]
    test_mode: bool,

    /// fixed part of the receipt delay in milliseconds (default: 5000)
    #[argh(option)]
    min_delay_ms: Option<u64>,

    /// random jitter added to the receipt delay in milliseconds (default: 5000)
    #[argh(option)]
    delta_ms: Option<u64>,

    /// submissions that may wait for a pipeline worker (default: 10000)
    #[argh(option)]
    queue_capacity: Option<usize>,

    /// pipeline workers kept running (default: 4)
    #[argh(option)]
    core_workers: Option<usize>,

    /// upper bound on pipeline workers (default: 8)
    #[argh(option)]
    max_workers: Option<usize>,

    /// hand rejected submissions to the alternate pool
    #[argh(switch)]
    enable_retries: bool,

    /// log level: trace, debug, info, warn or error (default: info)
    #[argh(option)]
    log_level: Option<Level>,
}

impl CliArgs {
    fn into_config(self) -> GatewayConfig {
        let defaults = GatewayConfig::default();

        let auth = AuthConfig::new(
            self.system_id.unwrap_or(defaults.auth.system_id.clone()),
            self.password.unwrap_or(defaults.auth.password.clone()),
        )
        .with_test_mode(self.test_mode);

        let scheduler = SchedulerConfig::new(
            self.min_delay_ms
                .map_or(defaults.scheduler.min_delay, Duration::from_millis),
            self.delta_ms
                .map_or(defaults.scheduler.delta, Duration::from_millis),
        );

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = pipeline_defaults
            .clone()
            .with_queue_capacity(self.queue_capacity.unwrap_or(pipeline_defaults.queue_capacity))
            .with_workers(
                self.core_workers.unwrap_or(pipeline_defaults.core_workers),
                self.max_workers.unwrap_or(pipeline_defaults.max_workers),
            )
            .with_retries(self.enable_retries);

        let config = defaults
            .with_ports(self.port)
            .with_auth(auth)
            .with_scheduler(scheduler)
            .with_pipeline(pipeline);
        match self.host {
            Some(host) => config.with_host(host),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> smsc_gateway::Result<()> {
    let cli_args: CliArgs = argh::from_env();

    if cli_args.port.is_empty() {
        eprintln!("at least one --port is required\nRun smscd --help for more information.");
        std::process::exit(1);
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli_args.log_level.unwrap_or(Level::INFO))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let gateway = Gateway::start(cli_args.into_config(), LoggingRelay).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    let report = gateway.shutdown().await;
    for (addr, stats) in &report.listeners {
        info!(%addr, accepted = stats.accepted, refused = stats.refused, "listener summary");
    }
    info!(
        relayed = report.pipeline.relayed,
        rejected = report.pipeline.rejected,
        receipts_dispatched = report.scheduler.dispatched,
        receipts_dropped = report.scheduler.dropped,
        "shutdown complete"
    );
    Ok(())
}
