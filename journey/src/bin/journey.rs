//! Command line entry point.
//!
//! Configuration comes from the environment (`JOBS`, `JOBSPEC`, `WORKERS`,
//! `PREFIX`, `NOMAD_ADDR`); see [`journey::HarnessConfig::from_lookup`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use journey::{
    Harness, HarnessBuilder, HarnessConfig, JobTemplate, NomadClient, ProgressView,
    ShutdownToken,
};

#[derive(Parser, Debug)]
#[command(
    name = "journey",
    about = "Drive a Nomad cluster with copies of one job and chart how fast they start"
)]
struct Cli {
    /// Directory receiving raw.json.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit JOBS copies of JOBSPEC, wait for them to run, then collect metrics.
    Start,
    /// Deregister every job under PREFIX.
    Stop,
    /// Collect metrics for a run that began at START_TIME.
    Metrics {
        /// RFC 3339 timestamp or Unix seconds, as logged by `start`.
        start_time: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "journey=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = HarnessConfig::from_env()?;
    if let Some(dir) = cli.output_dir {
        config = config.with_output_dir(dir);
    }

    #[cfg(feature = "metrics")]
    journey::metrics::init_metrics()?;

    let shutdown = ShutdownToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                shutdown.cancel();
            }
        }
    });

    match cli.command {
        Command::Start => {
            config.validate_for_run()?;
            let template = JobTemplate::load(config.job_spec_path()?)?;
            let harness = build_harness(config, shutdown)?;
            run_start(&harness, &template).await
        }
        Command::Stop => {
            let harness = build_harness(config, shutdown)?;
            let summary = harness.stop().await?;
            info!(listed = summary.listed, deregistered = summary.deregistered, "stop finished");
            Ok(())
        }
        Command::Metrics { start_time } => {
            let start = parse_start_time(&start_time)?;
            config.validate_for_run()?;
            let template = JobTemplate::load(config.job_spec_path()?)?;
            let harness = build_harness(config, shutdown)?;
            write_metrics(&harness, &template, start).await
        }
    }
}

fn build_harness(config: HarnessConfig, shutdown: ShutdownToken) -> Result<Harness<NomadClient>> {
    let client = NomadClient::new(&config.nomad_addr)?;
    HarnessBuilder::new(config)
        .with_platform(Arc::new(client))
        .with_shutdown(shutdown)
        .build()
}

async fn run_start(harness: &Harness<NomadClient>, template: &JobTemplate) -> Result<()> {
    let display_stop = ShutdownToken::new();
    let display = tokio::spawn(display_progress(
        harness.progress(),
        harness.config().poll_interval,
        display_stop.clone(),
    ));

    let run = harness.start(template).await;
    display_stop.cancel();
    if let Err(e) = display.await {
        warn!("progress display task failed: {e:?}");
    }
    let run = run?;

    info!(
        start_time = %run.start_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
        unix = run.start_time.timestamp(),
        submitted = run.dispatch.succeeded,
        failed = run.dispatch.failed,
        "run finished"
    );
    if !run.reached_target() {
        bail!(
            "run cancelled before reaching target; collect later with `journey metrics {}`",
            run.start_time.timestamp()
        );
    }

    write_metrics(harness, template, run.start_time).await
}

async fn write_metrics(
    harness: &Harness<NomadClient>,
    template: &JobTemplate,
    start: DateTime<Utc>,
) -> Result<()> {
    let report = harness
        .collect_metrics(template, start)
        .await
        .context("metrics collection failed")?;
    let dir = &harness.config().output_dir;
    let path = report.write_json(dir)?;
    let chart = report.write_chart_json(dir)?;
    info!(
        path = %path.display(),
        chart = %chart.display(),
        buckets = report.running.len(),
        "metrics written"
    );

    #[cfg(feature = "metrics")]
    {
        let path = journey::metrics::write_metrics_text(dir)?;
        info!(path = %path.display(), "harness metrics written");
    }
    Ok(())
}

async fn display_progress<V: ProgressView>(
    view: V,
    interval: std::time::Duration,
    stop: ShutdownToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        info!("{}", view.snapshot().render_line());
    }
}

/// Parse an RFC 3339 timestamp (nanoseconds allowed) or Unix seconds.
fn parse_start_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    let rfc_err = match DateTime::parse_from_rfc3339(raw) {
        Ok(time) => return Ok(time.with_timezone(&Utc)),
        Err(e) => e,
    };
    match raw.parse::<i64>() {
        Ok(secs) => DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| anyhow!("unix time {secs} is out of range")),
        Err(int_err) => Err(anyhow!(
            "could not parse {raw:?} as RFC 3339 ({rfc_err}) or as unix seconds ({int_err})"
        )),
    }
}
