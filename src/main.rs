use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insight_service::insights::InsightService;
use insight_service::llm::{CompletionClient, OpenAiCompatClient};
use insight_service::models::Subject;
use insight_service::store::{file::read_dataset, FileDatasetSource};
use insight_service::{api, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OTLP export only when an endpoint is configured; stdout logging always.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "insightd"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "insight_service=debug,insightd=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Generate {
            file,
            athlete_id,
            team_id,
            model,
        }) => {
            let subject = Subject { athlete_id, team_id };
            run_generate(cfg, subject, &file, model).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn build_service(cfg: &config::Config) -> anyhow::Result<InsightService> {
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiCompatClient::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.llm_max_retries,
    )?);
    InsightService::from_config(client, cfg.insights.clone())
        .context("failed to register insight metrics")
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let insights = build_service(&cfg)?;
    let shutdown = CancellationToken::new();

    let sweeper = jobs::sweep::spawn(insights.cache().clone(), shutdown.clone());
    tracing::info!(
        ttl_secs = cfg.insights.cache_ttl.as_secs(),
        "Background cache sweeper started"
    );

    let state = Arc::new(AppState {
        insights,
        datasets: Arc::new(FileDatasetSource::new(cfg.data_dir.clone())),
        default_model: cfg.default_model.clone(),
    });

    let app = api::app_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("insightd listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper.await.ok();
    Ok(())
}

async fn run_generate(
    cfg: config::Config,
    subject: Subject,
    file: &std::path::Path,
    model: Option<String>,
) -> anyhow::Result<()> {
    let dataset = read_dataset(file).await?;
    let model = model.unwrap_or_else(|| cfg.default_model.clone());
    let insights = build_service(&cfg)?;

    let response = insights.generate_insights(&subject, &dataset, &model).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Insight payloads are per-athlete; intermediaries must not keep them.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");
    resp
}
