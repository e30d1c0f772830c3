//! vidpipe - run a pipeline described by a config file
//!
//! ```text
//! vidpipe pipeline.toml
//! ```
//!
//! The pipeline runs until every module has finished, a module faults with
//! `halt_on_fault` set, or standard input is closed (Ctrl-D).

use anyhow::Context;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vidpipe_rs::{config::LoggingConfig, AppConfig, Engine, EngineEvent};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.filter))?;

    let (file_layer, guard) = if config.log_to_file {
        let dir = config
            .log_directory()
            .context("Could not determine a log directory")?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "vidpipe.log"));
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Read and discard `input` until end of stream, without buffering it.
fn drain_until_eof(mut input: impl Read) -> std::io::Result<u64> {
    std::io::copy(&mut input, &mut std::io::sink())
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: vidpipe <pipeline.toml|pipeline.json>")?;
    let config = AppConfig::load(&path)?;
    let _guard = init_logging(&config.logging)?;

    tracing::info!("Starting pipeline from {:?}", path);
    let mut engine = Engine::from_config(&config).context("Failed to build pipeline")?;
    engine.start().context("Failed to start pipeline")?;

    let stop = engine.stop_handle();
    std::thread::Builder::new()
        .name("vidpipe-stdin".to_string())
        .spawn(move || {
            let _ = drain_until_eof(std::io::stdin());
            tracing::info!("Standard input closed, stopping");
            stop.request_stop();
        })?;

    while !engine.wait_until_stopped_timeout(EVENT_POLL_INTERVAL) {
        while let Some(event) = engine.try_next_event() {
            match event {
                EngineEvent::ModuleFaulted { module, error } => {
                    tracing::error!("Module '{}' faulted: {}", module, error)
                }
                other => tracing::debug!("{:?}", other),
            }
        }
    }

    engine.stop()?;
    let stats = engine.stats();
    for module in &stats.modules {
        tracing::info!(
            "{}: {} ({} frames, {:.1} ms avg, {:.1} ms max)",
            module.name,
            module.state,
            module.frames_processed,
            module.avg_latency_ms,
            module.max_latency_ms
        );
    }
    engine.clean()?;
    tracing::info!("Pipeline finished");
    Ok(())
}
