mod admin;
mod error;
mod extractors;
mod kpi;

use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tally_common::types::ServiceInfo;
use tally_config::{init_tracing, AppConfig, AppEnv};
use tally_db::kpi::models::KpiKind;
use tally_db::kpi::pg_repository::PgKpiRepository;
use tally_db::kpi::query::KpiQueryService;
use tally_db::kpi::repositories::KpiRepository;
use tally_db::kpi::seed::seed_records;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub queries: KpiQueryService,
    pub kpi_repo: Arc<dyn KpiRepository>,
    pub app_env: AppEnv,
    pub info: Arc<ServiceInfo>,
}

impl AppState {
    pub fn new(kpi_repo: Arc<dyn KpiRepository>, app_env: AppEnv) -> Self {
        Self {
            queries: KpiQueryService::new(Arc::clone(&kpi_repo)),
            kpi_repo,
            app_env,
            info: Arc::new(ServiceInfo::new("tally-api", app_env.as_str())),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let records = state.kpi_repo.snapshot().await?;
    let mut per_kind: BTreeMap<KpiKind, usize> =
        KpiKind::ALL.iter().map(|kind| (*kind, 0)).collect();
    for record in &records {
        *per_kind.entry(record.kind()).or_default() += 1;
    }

    let mut body = String::new();
    let _ = writeln!(body, "# HELP tally_up Service up indicator");
    let _ = writeln!(body, "# TYPE tally_up gauge");
    let _ = writeln!(body, "tally_up 1");
    let _ = writeln!(body, "# HELP tally_info Service info");
    let _ = writeln!(body, "# TYPE tally_info gauge");
    let _ = writeln!(
        body,
        "tally_info{{service=\"{}\",version=\"{}\",environment=\"{}\"}} 1",
        state.info.name, state.info.version, state.info.environment
    );
    let _ = writeln!(body, "# HELP tally_kpi_records Stored monthly records per KPI kind");
    let _ = writeln!(body, "# TYPE tally_kpi_records gauge");
    for (kind, count) in &per_kind {
        let _ = writeln!(body, "tally_kpi_records{{kind=\"{kind}\"}} {count}");
    }

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    ))
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/metrics", get(metrics))
        .merge(kpi::router());

    if state.app_env.is_development() {
        router = router.merge(admin::router());
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);

    tracing::info!(service = "tally-api", env = ?config.app_env, "starting");

    let pool = tally_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");
    tally_db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let state = AppState::new(Arc::new(PgKpiRepository::new(pool)), config.app_env);

    if config.app_env.is_development() && config.dev_seed_on_start {
        let summary = state
            .kpi_repo
            .reset(seed_records())
            .await
            .expect("failed to seed kpi store");
        tracing::info!(inserted = summary.inserted, "seeded development data");
    }

    let app = build_router(state);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tally_db::kpi::memory_repository::MemoryKpiRepository;
    use tally_db::kpi::models::YearMonth;
    use tower::ServiceExt;

    async fn seeded(app_env: AppEnv) -> (Router, MemoryKpiRepository) {
        let repo = MemoryKpiRepository::new();
        repo.reset(seed_records()).await.unwrap();
        let state = AppState::new(Arc::new(repo.clone()), app_env);
        (build_router(state), repo)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        (status, read_body(resp).await)
    }

    async fn read_body(resp: axum::http::Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn read_body_string(resp: axum::http::Response<Body>) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // ── Health / Info ───────────────────────────────────────────────

    #[tokio::test]
    async fn health_returns_ok() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn info_returns_service_name() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "tally-api");
        assert_eq!(body["environment"], "production");
    }

    #[tokio::test]
    async fn metrics_returns_prometheus_format() {
        let (app, _) = seeded(AppEnv::Production).await;
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("content-type")
                .unwrap()
                .to_str()
                .unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
        let body = read_body_string(resp).await;
        assert!(body.contains("tally_up 1"));
        assert!(body.contains("environment=\"production\""));
        for kind in KpiKind::ALL {
            assert!(
                body.contains(&format!("tally_kpi_records{{kind=\"{kind}\"}} 12\n")),
                "{kind}: {body}"
            );
        }
    }

    #[tokio::test]
    async fn metrics_follow_the_store() {
        let repo = MemoryKpiRepository::new();
        let app = build_router(AppState::new(Arc::new(repo.clone()), AppEnv::Production));
        let resp = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = read_body_string(resp).await;
        assert!(body.contains("tally_kpi_records{kind=\"support\"} 0\n"));

        repo.get_or_create(KpiKind::Support, YearMonth::new(2025, 1).unwrap())
            .await
            .unwrap();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = read_body_string(resp).await;
        assert!(body.contains("tally_kpi_records{kind=\"support\"} 1\n"));
        assert!(body.contains("tally_kpi_records{kind=\"revenue\"} 0\n"));
    }

    // ── GET /kpis/{kind} ────────────────────────────────────────────

    #[tokio::test]
    async fn exact_month_returns_one_record() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/kpis/orders?year=2024&month=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "order");
        assert_eq!(body["count"], 1);
        let record = &body["data"][0];
        assert_eq!(record["month"], 3);
        let orders = record["total_orders"].as_f64().unwrap();
        let value = record["order_value_sum"].as_f64().unwrap();
        assert_eq!(record["avg_order_value"].as_f64().unwrap(), value / orders);
    }

    #[tokio::test]
    async fn kebab_case_kind_and_whole_year() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/kpis/customer-growth?year=2024").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 12);
        assert_eq!(body["data"][0]["month"], 1);
        assert_eq!(body["data"][11]["month"], 12);
    }

    #[tokio::test]
    async fn date_range_is_inclusive_on_month_start() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) =
            get_json(app, "/kpis/revenue?from_date=2024-03-01&to_date=2024-05-15").await;
        assert_eq!(status, StatusCode::OK);
        let months: Vec<i64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["month"].as_i64().unwrap())
            .collect();
        assert_eq!(months, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn limit_caps_the_result() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/kpis/support?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["month"], 1);
    }

    #[tokio::test]
    async fn zero_limit_returns_everything() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/kpis/support?limit=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 12);
    }

    #[tokio::test]
    async fn unknown_kind_returns_404() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/kpis/weather").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("weather"));
    }

    #[tokio::test]
    async fn invalid_parameters_return_400() {
        for uri in [
            "/kpis/revenue?year=2024&month=13",
            "/kpis/revenue?year=twenty",
            "/kpis/revenue?limit=-1",
            "/kpis/revenue?from_date=2024-06-01&to_date=2024-01-01",
            "/kpis/revenue?from_date=yesterday",
        ] {
            let (app, _) = seeded(AppEnv::Production).await;
            let (status, body) = get_json(app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string(), "{uri}");
        }
    }

    // ── GET /kpis/export ────────────────────────────────────────────

    #[tokio::test]
    async fn export_groups_every_kind() {
        let (app, _) = seeded(AppEnv::Production).await;
        let (status, body) = get_json(app, "/kpis/export").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["generated_at"].is_string());
        for key in [
            "revenue",
            "customer_growth",
            "orders",
            "transactions",
            "invoices",
            "support",
            "system",
        ] {
            assert_eq!(body[key].as_array().unwrap().len(), 12, "{key}");
        }
    }

    // ── POST /admin/reset ───────────────────────────────────────────

    #[tokio::test]
    async fn reset_is_not_routed_in_production() {
        let (app, _) = seeded(AppEnv::Production).await;
        let resp = app
            .oneshot(Request::post("/admin/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reset_restores_seed_in_development() {
        let (app, repo) = seeded(AppEnv::Development).await;
        let extra = tally_db::kpi::models::YearMonth::new(2030, 1).unwrap();
        repo.get_or_create(tally_db::kpi::models::KpiKind::System, extra)
            .await
            .unwrap();
        assert_eq!(repo.len(), 85);

        let resp = app
            .oneshot(Request::post("/admin/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body["deleted"], 85);
        assert_eq!(body["inserted"], 84);
        assert_eq!(body["per_kind"]["revenue"], 12);
        assert_eq!(repo.len(), 84);
    }
}
