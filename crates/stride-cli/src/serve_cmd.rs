use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use stride_core::StrideError;
use stride_core::pipeline::{PlanRun, StreamEvent};
use stride_core::service::{GoalService, SubGoalResponse};
use stride_core::tree::RootGoalInput;
use stride_db::models::PlanItemStatus;

/// Header carrying the caller's user id, set by the upstream gateway.
pub const USER_HEADER: &str = "x-user-id";

/// Header naming the goal whose plan an SSE response is generating.
pub const GOAL_HEADER: &str = "x-goal-id";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

impl From<StrideError> for AppError {
    fn from(err: StrideError) -> Self {
        let status = match &err {
            StrideError::Validation(_)
            | StrideError::QuotaExhausted
            | StrideError::DepthExceeded { .. } => StatusCode::BAD_REQUEST,
            StrideError::NotFound(_) => StatusCode::NOT_FOUND,
            StrideError::Forbidden => StatusCode::FORBIDDEN,
            StrideError::Upstream(_) => StatusCode::BAD_GATEWAY,
            StrideError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = format!("{err:#}");
        if status.is_server_error() {
            error!(status = %status, error = %message, "request failed");
        }
        Self { status, message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// User id taken from the [`USER_HEADER`] header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub i64);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(CallerId)
            .ok_or_else(|| AppError::unauthorized("missing or invalid X-User-Id header"))
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateGoalBody {
    #[serde(default, alias = "goal_name")]
    pub name: String,
    #[serde(default)]
    pub area_of_focus: Option<String>,
    #[serde(default)]
    pub timeline: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubGoalBody {
    #[serde(default, alias = "sub_goal_name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    #[serde(default)]
    pub status: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(service: GoalService) -> Router {
    Router::new()
        .route("/api/goals", get(list_goals).post(create_goal))
        .route("/api/goals/{id}", get(goal_detail).delete(delete_goal))
        .route("/api/goals/{id}/plan", post(generate_plan))
        .route("/api/goals/{id}/subgoals", post(request_sub_goal))
        .route("/api/goals/{id}/track", post(track_goal))
        .route("/api/goals/{id}/steps/{step}", get(tracked_step))
        .route("/api/plan-items/{id}", patch(update_plan_item))
        .route("/api/profile", get(profile))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Serve until Ctrl+C, then wait for in-flight generations to persist.
pub async fn run_serve(
    service: GoalService,
    tracker: TaskTracker,
    bind: &str,
    port: u16,
) -> Result<()> {
    let source = service.pipeline().source_name().to_owned();
    let app = build_router(service);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%source, "stride serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracker.close();
    if !tracker.is_empty() {
        info!(in_flight = tracker.len(), "waiting for plan generations to finish");
    }
    tracker.wait().await;
    info!("stride serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Frame a generation as SSE: one `chunk` event per piece, then `done`.
fn sse_response(run: PlanRun) -> Response {
    let events = run.events.map(|event| {
        Ok::<_, Infallible>(match event {
            StreamEvent::Chunk(piece) => Event::default().event("chunk").data(piece),
            StreamEvent::Done => Event::default().event("done").data("[DONE]"),
        })
    });
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_goal(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Json(body): Json<CreateGoalBody>,
) -> Result<Response, AppError> {
    let input = RootGoalInput {
        name: body.name,
        area_of_focus: body.area_of_focus,
        timeline: body.timeline,
    };
    let goal = service.create_goal(user_id, &input).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "goal_id": goal.id })),
    )
        .into_response())
}

async fn list_goals(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
) -> Result<Response, AppError> {
    let goals = service.list_goals(user_id).await?;
    Ok(Json(goals).into_response())
}

async fn goal_detail(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let detail = service.goal_detail(user_id, id).await?;
    Ok(Json(detail).into_response())
}

async fn delete_goal(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let summary = service.delete_goal(user_id, id).await?;
    Ok(Json(summary).into_response())
}

async fn generate_plan(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let run = service.generate_plan(user_id, id).await?;
    Ok(sse_response(run))
}

async fn request_sub_goal(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path(id): Path<i64>,
    Json(body): Json<SubGoalBody>,
) -> Result<Response, AppError> {
    match service.request_sub_goal(user_id, id, &body.name).await? {
        SubGoalResponse::Existing(goal) => Ok(Json(goal).into_response()),
        SubGoalResponse::Generating { goal, run } => {
            let mut response = sse_response(run);
            response
                .headers_mut()
                .insert(GOAL_HEADER, HeaderValue::from(goal.id));
            Ok(response)
        }
    }
}

async fn track_goal(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let outcome = service.track_goal(user_id, id).await?;
    Ok(Json(outcome).into_response())
}

async fn tracked_step(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path((id, step)): Path<(i64, usize)>,
) -> Result<Response, AppError> {
    let step = service.tracked_step(user_id, id, step).await?;
    Ok(Json(step).into_response())
}

async fn update_plan_item(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
    Path(id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> Result<Response, AppError> {
    let status = body
        .status
        .parse::<PlanItemStatus>()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let item = service.update_plan_item(user_id, id, status).await?;
    Ok(Json(item).into_response())
}

async fn profile(
    CallerId(user_id): CallerId,
    State(service): State<GoalService>,
) -> Result<Response, AppError> {
    let profile = service.profile(user_id).await?;
    Ok(Json(profile).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use stride_core::compile::OutlineCompiler;
    use stride_core::generation::ScriptedSource;
    use stride_core::pipeline::PlanPipeline;
    use stride_core::store::PgPlanStore;
    use stride_test_utils::{create_test_db, drop_test_db, seed_user};

    use super::*;

    const PLAN: &str = "# Week 1\nDo X\nDo Y\n# Week 2\nDo Z\n";

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    fn service_with(pool: PgPool, source: ScriptedSource) -> GoalService {
        let compiler = OutlineCompiler::default();
        let store = Arc::new(PgPlanStore::new(pool.clone(), compiler));
        let pipeline = PlanPipeline::new(Arc::new(source), store);
        GoalService::new(pool, pipeline, compiler)
    }

    /// Requests sent to this service must be rejected before any query runs.
    fn offline_service() -> GoalService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost:1/stride")
            .unwrap();
        service_with(pool, ScriptedSource::new([PLAN]))
    }

    async fn send(
        service: &GoalService,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.to_string());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        build_router(service.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    fn event_names(sse: &str) -> Vec<&str> {
        sse.lines()
            .filter_map(|line| line.strip_prefix("event:"))
            .map(str::trim)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Without a database
    // -----------------------------------------------------------------------

    #[test]
    fn stride_errors_map_to_status_codes() {
        let cases = [
            (StrideError::validation("name is required"), StatusCode::BAD_REQUEST),
            (StrideError::QuotaExhausted, StatusCode::BAD_REQUEST),
            (
                StrideError::DepthExceeded { parent_depth: 3 },
                StatusCode::BAD_REQUEST,
            ),
            (StrideError::not_found("goal 9"), StatusCode::NOT_FOUND),
            (StrideError::Forbidden, StatusCode::FORBIDDEN),
            (
                StrideError::Upstream(anyhow::anyhow!("connection reset")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                StrideError::Internal(anyhow::anyhow!("pool timed out")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[tokio::test]
    async fn error_body_is_json() {
        let response = AppError::from(StrideError::not_found("goal 9")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({ "error": "goal 9 not found" }));
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let response = send(&offline_service(), "GET", "/api/profile", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("X-User-Id"));
    }

    #[tokio::test]
    async fn malformed_user_header_is_unauthorized() {
        let service = offline_service();
        for raw in ["abc", "-4", "0", ""] {
            let request = Request::builder()
                .uri("/api/goals")
                .header(USER_HEADER, raw)
                .body(Body::empty())
                .unwrap();
            let response = build_router(service.clone()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "header {raw:?}");
        }
    }

    #[tokio::test]
    async fn blank_names_are_rejected_before_storage() {
        let service = offline_service();

        let response = send(&service, "POST", "/api/goals", Some(1), Some(json!({ "name": "  " }))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &service,
            "POST",
            "/api/goals/4/subgoals",
            Some(1),
            Some(json!({})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_plan_item_status_is_bad_request() {
        let response = send(
            &offline_service(),
            "PATCH",
            "/api/plan-items/3",
            Some(1),
            Some(json!({ "status": "later" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("later"));
    }

    // -----------------------------------------------------------------------
    // Against PostgreSQL
    // -----------------------------------------------------------------------

    #[tokio::test]
    #[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
    async fn plan_is_streamed_persisted_and_tracked() {
        let (pool, db_name) = create_test_db().await;
        let user_id = seed_user(&pool, 3).await;
        let service = service_with(pool.clone(), ScriptedSource::chunked(PLAN, 4));

        let response = send(
            &service,
            "POST",
            "/api/goals",
            Some(user_id),
            Some(json!({ "goal_name": "learn rust", "timeline": "1 month" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let goal_id = body_json(response).await["goal_id"].as_i64().unwrap();

        let response = send(&service, "POST", &format!("/api/goals/{goal_id}/plan"), Some(user_id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_owned();
        assert!(content_type.starts_with("text/event-stream"), "got {content_type}");
        let sse = body_text(response).await;
        let events = event_names(&sse);
        assert!(events.contains(&"chunk"));
        assert_eq!(events.last(), Some(&"done"));

        // Persistence runs after the stream closes.
        let tracker = service.pipeline().tracker();
        tracker.close();
        tracker.wait().await;

        let detail = body_json(send(&service, "GET", &format!("/api/goals/{goal_id}"), Some(user_id), None).await).await;
        assert_eq!(detail["plan"], PLAN);
        assert_eq!(detail["is_tracked"], false);

        let profile = body_json(send(&service, "GET", "/api/profile", Some(user_id), None).await).await;
        assert_eq!(profile["generation_quota"], 2);

        let response = send(&service, "POST", &format!("/api/goals/{goal_id}/plan"), Some(user_id), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("already has a plan"));

        let response = send(&service, "POST", &format!("/api/goals/{goal_id}/track"), Some(user_id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["compiled"]["timelines"], 2);

        let step = body_json(send(&service, "GET", &format!("/api/goals/{goal_id}/steps/0"), Some(user_id), None).await).await;
        assert_eq!(step["timeline"]["title"], "Week 1");
        assert_eq!(step["is_last_step"], false);
        let items = step["plan_items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], "Do X");

        let item_id = items[0]["id"].as_i64().unwrap();
        let response = send(
            &service,
            "PATCH",
            &format!("/api/plan-items/{item_id}"),
            Some(user_id),
            Some(json!({ "status": "in_progress" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "in_progress");

        let response = send(&service, "GET", &format!("/api/goals/{goal_id}/steps/2"), Some(user_id), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
    async fn failing_source_is_bad_gateway_and_charges_nothing() {
        let (pool, db_name) = create_test_db().await;
        let user_id = seed_user(&pool, 1).await;
        let service = service_with(
            pool.clone(),
            ScriptedSource::new([PLAN]).failing_on_open("model overloaded"),
        );

        let created = body_json(
            send(&service, "POST", "/api/goals", Some(user_id), Some(json!({ "name": "learn rust" }))).await,
        )
        .await;
        let goal_id = created["goal_id"].as_i64().unwrap();

        let response = send(&service, "POST", &format!("/api/goals/{goal_id}/plan"), Some(user_id), None).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let profile = body_json(send(&service, "GET", "/api/profile", Some(user_id), None).await).await;
        assert_eq!(profile["generation_quota"], 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
    async fn goals_are_scoped_to_their_owner() {
        let (pool, db_name) = create_test_db().await;
        let owner = seed_user(&pool, 1).await;
        let stranger = seed_user(&pool, 1).await;
        let service = service_with(pool.clone(), ScriptedSource::new([PLAN]));

        let created = body_json(
            send(&service, "POST", "/api/goals", Some(owner), Some(json!({ "name": "learn rust" }))).await,
        )
        .await;
        let goal_id = created["goal_id"].as_i64().unwrap();

        let response = send(&service, "GET", &format!("/api/goals/{goal_id}"), Some(stranger), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = send(&service, "DELETE", &format!("/api/goals/{goal_id}"), Some(stranger), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let listed = body_json(send(&service, "GET", "/api/goals", Some(stranger), None).await).await;
        assert_eq!(listed, json!([]));

        let response = send(&service, "DELETE", &format!("/api/goals/{goal_id}"), Some(owner), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["goals"], 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
