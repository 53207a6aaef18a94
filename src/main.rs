use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail_ingest::attachments::LocalObjectStorage;
use mail_ingest::config::PipelineConfig;
use mail_ingest::engine::{BodyEngine, FlagContext, FlagService, HttpFlagService, StaticFlagService};
use mail_ingest::metrics::TracingSink;
use mail_ingest::ocr::{HttpOcrPrimitive, OcrPrimitive, UnconfiguredOcr};
use mail_ingest::pipeline::{Collaborators, ConversionOrchestrator, ConverterSet, HttpConverter, InboundEmail};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        eprintln!("Usage: mail-ingest <file.eml>...");
        std::process::exit(2);
    }

    let config = PipelineConfig::from_env();
    eprintln!("📬 mail-ingest v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Storage: {}", config.storage.base_dir.display());
    eprintln!(
        "   Flags: {}",
        config.services.flag_url.as_deref().unwrap_or("(static, all off)")
    );

    let orchestrator = ConversionOrchestrator::new(&config, collaborators(&config));

    let mut failed = 0usize;
    for path in &paths {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let email = match InboundEmail::parse(&raw) {
            Ok(email) => email,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Skipping unparseable email");
                failed += 1;
                continue;
            }
        };

        let flag_context = FlagContext {
            user_id: email.owner_id().ok(),
            ..Default::default()
        };

        match orchestrator.ingest(&email, &flag_context).await {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Ingestion rejected");
                failed += 1;
            }
        }
    }

    let stats = orchestrator.metrics().performance_stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(processed = paths.len() - failed, failed, "Done");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Wire the HTTP collaborators named in the config.
fn collaborators(config: &PipelineConfig) -> Collaborators {
    let services = &config.services;

    let flags: Arc<dyn FlagService> = match &services.flag_url {
        Some(url) => Arc::new(HttpFlagService::new(url.clone())),
        None => Arc::new(StaticFlagService::new()),
    };

    let mut converters = ConverterSet::new();
    if let Some(url) = &services.remote_converter_url {
        converters = converters.with(Arc::new(HttpConverter::new(
            BodyEngine::Remote,
            url.clone(),
            services.converter_api_key.clone(),
            services.convert_timeout,
        )));
    }
    if let Some(url) = &services.local_renderer_url {
        converters = converters.with(Arc::new(HttpConverter::new(
            BodyEngine::Local,
            url.clone(),
            services.converter_api_key.clone(),
            services.convert_timeout,
        )));
    }

    let ocr: Arc<dyn OcrPrimitive> = match &services.ocr_url {
        Some(url) => Arc::new(HttpOcrPrimitive::new(url.clone(), services.convert_timeout)),
        None => Arc::new(UnconfiguredOcr),
    };

    Collaborators {
        flags,
        converters,
        storage: Arc::new(LocalObjectStorage::new(config.storage.base_dir.clone())),
        ocr,
        telemetry: Arc::new(TracingSink),
    }
}

/// Log to stderr, plus a daily-rolling file when `MAIL_INGEST_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let log_dir = std::env::var("MAIL_INGEST_LOG_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty());
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-ingest.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
