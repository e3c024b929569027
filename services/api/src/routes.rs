use crate::infra::{AppState, Orchestrator};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use referral_orchestrator::error::AppError;
use referral_orchestrator::workflows::referral::{
    IntakeReport, PassStage, PipelineError, Referral, ReferralId, ReferralIntake,
    ReferralRepository, ReferralSource, StageSummary,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PassParams {
    #[serde(default)]
    pub(crate) source: Option<String>,
    #[serde(default)]
    pub(crate) dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct IntakeParams {
    #[serde(default)]
    pub(crate) default_source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CancelRequest {
    pub(crate) reason: String,
}

pub(crate) fn with_referral_routes(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/v1/referrals/passes/:stage", post(run_pass_endpoint))
        .route("/api/v1/referrals/intake", post(intake_endpoint))
        .route("/api/v1/referrals/:referral_id", get(referral_endpoint))
        .route("/api/v1/referrals/:referral_id/cancel", post(cancel_endpoint))
        .route("/api/v1/referrals/:referral_id/confirm", post(confirm_endpoint))
        .with_state(orchestrator)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn parse_source(raw: Option<String>) -> Result<Option<ReferralSource>, AppError> {
    Ok(raw.map(|value| value.parse::<ReferralSource>()).transpose()?)
}

pub(crate) async fn run_pass_endpoint(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(stage): Path<String>,
    Query(params): Query<PassParams>,
) -> Result<Json<StageSummary>, AppError> {
    let stage = stage.parse::<PassStage>()?;
    let source = parse_source(params.source)?;
    let dry_run = params.dry_run;

    // Passes block on the repository and executor sessions.
    let summary = tokio::task::spawn_blocking(move || {
        orchestrator.run_stage(stage, source, dry_run)
    })
    .await??;
    Ok(Json(summary))
}

pub(crate) async fn intake_endpoint(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(params): Query<IntakeParams>,
    body: String,
) -> Result<(StatusCode, Json<IntakeReport>), AppError> {
    let mut intake = ReferralIntake::new();
    if let Some(source) = parse_source(params.default_source)? {
        intake = intake.with_default_source(source);
    }

    let report = tokio::task::spawn_blocking(move || {
        intake.import(orchestrator.repository().as_ref(), body.as_bytes())
    })
    .await??;
    Ok((StatusCode::CREATED, Json(report)))
}

pub(crate) async fn referral_endpoint(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(referral_id): Path<String>,
) -> Result<Json<Referral>, AppError> {
    let id = ReferralId(referral_id);
    let referral = tokio::task::spawn_blocking(move || {
        orchestrator
            .repository()
            .fetch(&id)?
            .ok_or(PipelineError::NotFound(id))
    })
    .await??;
    Ok(Json(referral))
}

pub(crate) async fn cancel_endpoint(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(referral_id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Referral>, AppError> {
    let id = ReferralId(referral_id);
    let referral = tokio::task::spawn_blocking(move || {
        orchestrator.cancel_referral(&id, &request.reason)
    })
    .await??;
    Ok(Json(referral))
}

pub(crate) async fn confirm_endpoint(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(referral_id): Path<String>,
) -> Result<Json<Referral>, AppError> {
    let id = ReferralId(referral_id);
    let referral =
        tokio::task::spawn_blocking(move || orchestrator.confirm_pending_action(&id)).await??;
    Ok(Json(referral))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_orchestrator, SimulatedConnector};
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use referral_orchestrator::config::PipelineConfig;
    use referral_orchestrator::workflows::referral::ReferralStatus;
    use serde_json::Value;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(
            build_orchestrator(&PipelineConfig::default(), Arc::new(SimulatedConnector))
                .expect("orchestrator builds"),
        )
    }

    async fn read_json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router
            .clone()
            .oneshot(request)
            .await
            .expect("route executes")
    }

    const EXPORT: &str = "\
external_id,external_patient_id,payer_id
case-1,patient-1,payer-9
case-2,patient-1,payer-9
";

    #[tokio::test]
    async fn intake_then_requested_pass_accepts_and_declines() {
        let orchestrator = orchestrator();
        let router = with_referral_routes(orchestrator.clone());

        let response = send(
            &router,
            Request::post("/api/v1/referrals/intake?default_source=health_plan")
                .header(header::CONTENT_TYPE, "text/csv")
                .body(Body::from(EXPORT))
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let report = read_json_body(response).await;
        assert_eq!(report["rows"], 2);
        let first_id = report["created"][0].as_str().expect("id").to_string();

        let response = send(
            &router,
            Request::post("/api/v1/referrals/passes/requested?source=health_plan")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let summary = read_json_body(response).await;
        assert_eq!(summary["stage"], "requested");
        assert_eq!(summary["num_processed"], 2);
        assert_eq!(summary["num_accepted"], 1);
        assert_eq!(summary["num_declined"], 1);

        let response = send(
            &router,
            Request::get(format!("/api/v1/referrals/{first_id}"))
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let referral = read_json_body(response).await;
        assert_eq!(referral["status"], ReferralStatus::Accepted.label());
    }

    #[tokio::test]
    async fn dry_run_pass_leaves_referrals_untouched() {
        let orchestrator = orchestrator();
        let router = with_referral_routes(orchestrator.clone());
        let report = ReferralIntake::new()
            .with_default_source(ReferralSource::HealthPlan)
            .import(orchestrator.repository().as_ref(), EXPORT.as_bytes())
            .expect("intake succeeds");

        let response = send(
            &router,
            Request::post("/api/v1/referrals/passes/requested?dry_run=true")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let summary = read_json_body(response).await;
        assert_eq!(summary["dry_run"], true);

        let stored = orchestrator
            .repository()
            .fetch(&report.created[0])
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, ReferralStatus::Requested);
    }

    #[tokio::test]
    async fn unknown_stage_and_source_are_bad_requests() {
        let router = with_referral_routes(orchestrator());

        let response = send(
            &router,
            Request::post("/api/v1/referrals/passes/archived")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &router,
            Request::post("/api/v1/referrals/passes/in-progress?source=walk_in")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload = read_json_body(response).await;
        assert!(payload["error"].as_str().expect("message").contains("walk_in"));
    }

    #[tokio::test]
    async fn missing_referral_is_not_found() {
        let router = with_referral_routes(orchestrator());

        let response = send(
            &router,
            Request::get("/api/v1/referrals/ref-999999")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancelling_a_requested_referral_conflicts() {
        let orchestrator = orchestrator();
        let router = with_referral_routes(orchestrator.clone());
        let report = ReferralIntake::new()
            .with_default_source(ReferralSource::HealthPlan)
            .import(orchestrator.repository().as_ref(), EXPORT.as_bytes())
            .expect("intake succeeds");

        let response = send(
            &router,
            Request::post(format!("/api/v1/referrals/{}/cancel", report.created[0]))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"reason":"member_request"}"#))
                .expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn readiness_reflects_the_startup_flag() {
        let readiness = Arc::new(AtomicBool::new(false));
        let state = AppState {
            readiness: readiness.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router = with_referral_routes(orchestrator()).layer(Extension(state));

        let response = send(
            &router,
            Request::get("/ready").body(Body::empty()).expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.store(true, std::sync::atomic::Ordering::Release);
        let response = send(
            &router,
            Request::get("/ready").body(Body::empty()).expect("request builds"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &router,
            Request::get("/health").body(Body::empty()).expect("request builds"),
        )
        .await;
        assert_eq!(read_json_body(response).await["status"], "ok");
    }
}
