use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use raffle_server::{Api, Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "raffle-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("raffle-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database (in-memory when omitted).
    #[arg(long)]
    database: Option<PathBuf>,

    /// JSON catalog of gifts and users to seed on startup.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// How long a request waits for a cart or gift lock before answering busy.
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Extra attempts per gift after a transient draw failure (0 disables retries).
    #[arg(long)]
    draw_retry_attempts: Option<u32>,

    /// Winner notices are POSTed here as JSON (logged only when omitted).
    #[arg(long)]
    notify_webhook_url: Option<String>,

    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Maximum request body size in bytes (0 disables the limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    if args.lock_timeout_ms == Some(0) {
        anyhow::bail!("lock_timeout_ms must be > 0 when set");
    }

    Ok(ServerConfig {
        database_path: args.database.clone(),
        catalog_path: args.catalog.clone(),
        lock_timeout_ms: args.lock_timeout_ms.unwrap_or(defaults.lock_timeout_ms),
        draw_retry_attempts: args
            .draw_retry_attempts
            .unwrap_or(defaults.draw_retry_attempts),
        draw_retry_backoff_ms: defaults.draw_retry_backoff_ms,
        notify_webhook_url: args
            .notify_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string),
        http_rate_limit_per_second: map_optional_limit(
            args.http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_rate_limit() {
        let args = Args::parse_from([
            "raffle-server",
            "--http-rate-limit-per-second",
            "0",
            "--lock-timeout-ms",
            "250",
            "--notify-webhook-url",
            "  ",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.http_rate_limit_per_second, None);
        assert_eq!(
            config.http_rate_limit_burst,
            ServerConfig::default().http_rate_limit_burst
        );
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.notify_webhook_url, None);
    }

    #[test]
    fn zero_draw_retries_means_single_attempt() {
        let args = Args::parse_from(["raffle-server", "--draw-retry-attempts", "0"]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.draw_retry_attempts, 0);
        assert_eq!(config.engine_config().draw_retry_attempts, 0);
    }

    #[test]
    fn rejects_zero_lock_timeout() {
        let args = Args::parse_from(["raffle-server", "--lock-timeout-ms", "0"]);
        let err = build_config(&args).unwrap_err();
        assert!(
            err.to_string().contains("lock_timeout_ms"),
            "unexpected error: {err}"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config = build_config(&args)?;
    info!(
        database = ?config.database_path,
        catalog = ?config.catalog_path,
        lock_timeout_ms = config.lock_timeout_ms,
        draw_retry_attempts = config.draw_retry_attempts,
        webhook = config.notify_webhook_url.is_some(),
        "starting raffle server"
    );
    let server = Arc::new(Server::open(config).await?);
    let app = Api::new(server).router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;
    Ok(())
}
