use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Server;

mod caller;
mod error;
mod http;


pub struct Api {
    server: Arc<Server>,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

impl Api {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn router(&self) -> Router {
        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let allow_any_origin = allowed_origins.contains("*");
        if allowed_origins.is_empty() {
            tracing::warn!("ALLOWED_HTTP_ORIGINS is empty; all browser origins will be rejected");
        }
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Invalid origin in ALLOWED_HTTP_ORIGINS: {}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();

        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-request-id"),
            header::HeaderName::from_static(caller::USER_ID_HEADER),
            header::HeaderName::from_static(caller::USER_ROLE_HEADER),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        let config = &self.server.config;
        let governor_conf = match (config.http_rate_limit_per_second, config.http_rate_limit_burst)
        {
            (Some(rate_per_second), Some(burst_size)) if rate_per_second > 0 && burst_size > 0 => {
                let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
                let period = Duration::from_nanos(nanos_per_request);
                let config = GovernorConfigBuilder::default()
                    .period(period)
                    .burst_size(burst_size)
                    .key_extractor(SmartIpKeyExtractor)
                    .finish()
                    .or_else(|| {
                        tracing::warn!("invalid rate-limit config; falling back to defaults");
                        default_governor_config()
                    });
                config.map(Arc::new)
            }
            _ => None,
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/cart", get(http::get_cart))
            .route("/cart/checkout", post(http::checkout))
            .route("/cart/:gift_id", post(http::add_ticket))
            .route("/cart/items/:purchase_id", delete(http::remove_ticket))
            .route(
                "/cart/items/:purchase_id/quantity",
                put(http::adjust_quantity),
            )
            .route("/purchases/mine", get(http::my_purchases))
            .route("/lottery/status", get(http::lottery_status))
            .route("/lottery/results", get(http::all_results))
            .route("/lottery/results/:gift_id", get(http::result_for_gift))
            .route("/lottery/public-summary", get(http::public_summary))
            .route("/lottery/summary", get(http::summary))
            .route("/lottery/pending-gifts", get(http::pending_gifts))
            .route("/lottery/draw/:gift_id", post(http::draw_gift))
            .route("/lottery/draw-all", post(http::draw_all))
            .route("/lottery/gate", put(http::set_gate))
            .route("/reports/overall", get(http::overall_report))
            .route("/reports/by-gift", get(http::income_by_gift))
            .route("/reports/purchases", get(http::purchases_by_gift))
            .route("/reports/purchases/:gift_id", get(http::purchases_for_gift))
            .route("/reports/ticket-counts", post(http::ticket_counts));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };
        let router = router.layer(cors);
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn(request_id_middleware));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.server.clone())
    }
}

fn parse_allowed_origins(var: &str) -> HashSet<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
