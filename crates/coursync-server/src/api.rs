use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use coursync_shared::protocol::{
    AssignmentRecord, CourseRecord, FieldUpdate, NewAssignment, NewCourse, RecordResponse,
};
use coursync_shared::types::Entity;
use coursync_store::DocumentManager;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::db::{self, RemoteDb, Table};
use crate::documents;
use crate::error::ServerError;
use crate::external::{self, ExternalRecordStore};
use crate::push::{self, PushHub};
use crate::webhook;

/// Multipart framing overhead allowed on top of the largest payload.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<RemoteDb>,
    pub hub: Arc<PushHub>,
    pub external: Arc<dyn ExternalRecordStore>,
    pub documents: Arc<DocumentManager>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        db: RemoteDb,
        external: Arc<dyn ExternalRecordStore>,
    ) -> Result<Self, ServerError> {
        let documents =
            DocumentManager::new(&config.document_storage_path, config.storage_limits)?;
        Ok(Self {
            db: Arc::new(db),
            hub: Arc::new(PushHub::new(config.mailbox_capacity)),
            external,
            documents: Arc::new(documents),
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state.config.storage_limits.max_file_size + BODY_LIMIT_SLACK;

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/courses",
            get(list_courses).post(create_course).put(update_course),
        )
        .route("/courses/:id", delete(delete_course))
        .route(
            "/assignments",
            get(list_assignments)
                .post(create_assignment)
                .put(update_assignment),
        )
        .route("/assignments/:id", delete(delete_assignment))
        .route(
            "/assignments/:id/documents",
            get(documents::list_for_assignment),
        )
        .route("/documents", post(documents::upload))
        .route("/documents/:id/versions", post(documents::upload_version))
        .route(
            "/documents/:id",
            get(documents::download).delete(documents::remove),
        )
        .route("/storage", get(documents::storage))
        .route("/events", get(events))
        .route("/webhooks/external", post(webhook::receive))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.hub.connection_count(),
    })
}

/// Open the caller's push stream.
async fn events(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> impl IntoResponse {
    let registration = state.hub.register(user_id);
    push::event_stream(state.hub.clone(), registration, state.config.heartbeat)
}

fn parse_id(raw: &str) -> Result<i64, ServerError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ServerError::BadRequest(format!("invalid record id: {raw}")))
}

// ─── Courses ───

async fn list_courses(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<CourseRecord>>, ServerError> {
    Ok(Json(state.db.list_courses(user_id)?))
}

async fn create_course(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<NewCourse>,
) -> Result<(StatusCode, Json<RecordResponse<CourseRecord>>), ServerError> {
    let fields = req.fields;
    if fields.code.trim().is_empty() || fields.name.trim().is_empty() {
        return Err(ServerError::BadRequest("course code and name are required".into()));
    }
    if state.db.course_code_exists(user_id, &fields.code)? {
        return Err(ServerError::BadRequest(format!(
            "course {} already exists",
            fields.code
        )));
    }

    let external_id = state
        .external
        .create(Entity::Course, &external::course_properties(&fields))
        .await?;

    let record = match state
        .db
        .insert_course(user_id, Some(req.local_id), &external_id, &fields)
    {
        Ok(record) => record,
        Err(e) => {
            discard_external(&state, Entity::Course, &external_id).await;
            return Err(e);
        }
    };

    info!(%user_id, id = record.id, code = %record.fields.code, "course created");
    Ok((
        StatusCode::CREATED,
        Json(RecordResponse {
            message: "Course created".into(),
            record,
        }),
    ))
}

async fn update_course(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<FieldUpdate>,
) -> Result<Json<CourseRecord>, ServerError> {
    let key = state
        .db
        .owned(Table::Courses, user_id, parse_id(&req.id)?)?;
    let field = req.column.parse()?;
    let (column, value) = db::course_column(&req.column, &req.value)?;

    state
        .external
        .update(
            Entity::Course,
            &key.external_id,
            &external::course_property(field, value.clone()),
        )
        .await?;
    state.db.update_column(Table::Courses, key.id, column, &value)?;

    Ok(Json(state.db.course(key.id)?))
}

async fn delete_course(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let key = state.db.owned(Table::Courses, user_id, parse_id(&id)?)?;
    let course = state.db.course(key.id)?;

    state
        .external
        .delete(Entity::Course, &key.external_id)
        .await?;

    state.db.soft_delete(Table::Courses, key.id)?;
    let assignment_ids = state
        .db
        .soft_delete_course_assignments(user_id, &course.fields.code)?;
    let files = documents::purge_for_assignments(&state, assignment_ids.clone()).await?;

    info!(
        %user_id,
        id = key.id,
        assignments = assignment_ids.len(),
        files,
        "course deleted"
    );
    Ok(Json(serde_json::json!({
        "deleted": true,
        "assignments": assignment_ids.len(),
    })))
}

// ─── Assignments ───

async fn list_assignments(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<AssignmentRecord>>, ServerError> {
    Ok(Json(state.db.list_assignments(user_id)?))
}

async fn create_assignment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<NewAssignment>,
) -> Result<(StatusCode, Json<RecordResponse<AssignmentRecord>>), ServerError> {
    let fields = req.fields;
    if fields.title.trim().is_empty() {
        return Err(ServerError::BadRequest("assignment title is required".into()));
    }
    if !state.db.course_code_exists(user_id, &fields.course_code)? {
        return Err(ServerError::BadRequest(format!(
            "unknown course {}",
            fields.course_code
        )));
    }

    let external_id = state
        .external
        .create(Entity::Assignment, &external::assignment_properties(&fields))
        .await?;

    let record = match state
        .db
        .insert_assignment(user_id, Some(req.local_id), &external_id, &fields)
    {
        Ok(record) => record,
        Err(e) => {
            discard_external(&state, Entity::Assignment, &external_id).await;
            return Err(e);
        }
    };

    info!(%user_id, id = record.id, "assignment created");
    Ok((
        StatusCode::CREATED,
        Json(RecordResponse {
            message: "Assignment created".into(),
            record,
        }),
    ))
}

async fn update_assignment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<FieldUpdate>,
) -> Result<Json<AssignmentRecord>, ServerError> {
    let key = state
        .db
        .owned(Table::Assignments, user_id, parse_id(&req.id)?)?;
    let field = req.column.parse()?;
    let (column, value) = db::assignment_column(&req.column, &req.value)?;

    state
        .external
        .update(
            Entity::Assignment,
            &key.external_id,
            &external::assignment_property(field, value.clone()),
        )
        .await?;
    state
        .db
        .update_column(Table::Assignments, key.id, column, &value)?;

    Ok(Json(state.db.assignment(key.id)?))
}

async fn delete_assignment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let key = state
        .db
        .owned(Table::Assignments, user_id, parse_id(&id)?)?;

    state
        .external
        .delete(Entity::Assignment, &key.external_id)
        .await?;

    state.db.soft_delete(Table::Assignments, key.id)?;
    let files = documents::purge_for_assignments(&state, vec![key.id]).await?;

    info!(%user_id, id = key.id, files, "assignment deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Best-effort removal of an external record whose local row never landed.
async fn discard_external(state: &AppState, entity: Entity, external_id: &str) {
    if let Err(e) = state.external.delete(entity, external_id).await {
        warn!(
            entity = entity.as_str(),
            external_id,
            error = %e,
            "failed to discard external record"
        );
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(state, listener).await
}

/// Serve on an already bound listener.
pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP API server");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> (AppState, Arc<MemoryStore>) {
        let external = Arc::new(MemoryStore::new());
        let config = ServerConfig {
            document_storage_path: dir.path().join("documents"),
            ..Default::default()
        };
        let state = AppState::new(
            config,
            RemoteDb::open_in_memory().unwrap(),
            external.clone(),
        )
        .unwrap();
        (state, external)
    }

    fn json_request(method: &str, uri: &str, user: i64, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", user.to_string())
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_course_as(app: &Router, user: i64, code: &str) -> Value {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/courses",
                user,
                json!({ "local_id": 1, "code": code, "name": "Intro" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn health_needs_no_user() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(&dir);
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_user_header_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(&dir);
        let response = build_router(state)
            .oneshot(Request::get("/assignments").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_mirrors_into_external_store() {
        let dir = tempfile::tempdir().unwrap();
        let (state, external) = test_state(&dir);
        let app = build_router(state);

        create_course_as(&app, 1, "CS101").await;
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/assignments",
                1,
                json!({ "local_id": 7, "title": "Lab 1", "course_code": "CS101" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        let external_id = body["record"]["external_id"].as_str().unwrap();
        assert_eq!(body["record"]["local_id"], 7);
        assert_eq!(external.page(external_id).unwrap()["title"], "Lab 1");
        assert_eq!(external.len(), 2);
    }

    #[tokio::test]
    async fn assignment_for_unknown_course_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (state, external) = test_state(&dir);
        let response = build_router(state)
            .oneshot(json_request(
                "POST",
                "/assignments",
                1,
                json!({ "local_id": 1, "title": "Lab", "course_code": "NOPE" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(external.is_empty());
    }

    #[tokio::test]
    async fn update_rejects_unknown_column_and_foreign_records() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(&dir);
        let app = build_router(state);

        let course = create_course_as(&app, 1, "CS101").await;
        let id = course["record"]["id"].as_i64().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/courses",
                1,
                json!({ "id": id, "column": "user_id", "value": 2 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/courses",
                2,
                json!({ "id": id, "column": "name", "value": "Stolen" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/courses",
                1,
                json!({ "id": id, "column": "credits", "value": "6" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["credits"], 6);
    }

    #[tokio::test]
    async fn delete_course_hides_its_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let (state, external) = test_state(&dir);
        let app = build_router(state);

        let course = create_course_as(&app, 1, "CS101").await;
        app.clone()
            .oneshot(json_request(
                "POST",
                "/assignments",
                1,
                json!({ "local_id": 2, "title": "Lab", "course_code": "CS101" }),
            ))
            .await
            .unwrap();

        let id = course["record"]["id"].as_i64().unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/courses/{id}"))
                    .header("x-user-id", "1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["assignments"], 1);

        let response = app
            .clone()
            .oneshot(Request::get("/assignments").header("x-user-id", "1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!([]));
        assert_eq!(external.len(), 1);
    }
}
