//! Change feed from the external record store.
//!
//! Each delivery describes one change made outside the application. It is
//! applied to the remote store and then pushed to the owning user's
//! mailbox. Deliveries for records that are already in the target state
//! are acknowledged without a push.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use coursync_shared::constants::WEBHOOK_SECRET_HEADER;
use coursync_shared::protocol::{FieldUpdate, PushNotification};
use coursync_shared::types::{AssignmentFields, ChangeKind, CourseFields, Entity, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::api::AppState;
use crate::db::{self, Table};
use crate::documents;
use crate::error::ServerError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalChange {
    AssignmentCreated {
        user_id: UserId,
        external_id: String,
        #[serde(flatten)]
        fields: AssignmentFields,
    },
    AssignmentUpdated {
        external_id: String,
        column: String,
        value: Value,
    },
    AssignmentDeleted {
        external_id: String,
    },
    CourseCreated {
        user_id: UserId,
        external_id: String,
        #[serde(flatten)]
        fields: CourseFields,
    },
    CourseUpdated {
        external_id: String,
        column: String,
        value: Value,
    },
    CourseDeleted {
        external_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookResponse {
    pub applied: bool,
    pub delivered: bool,
}

impl WebhookResponse {
    fn ignored() -> Self {
        Self {
            applied: false,
            delivered: false,
        }
    }
}

fn verify_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ServerError> {
    let Some(expected) = expected else {
        return Err(ServerError::Forbidden(
            "Webhooks are disabled (no WEBHOOK_SECRET configured)".into(),
        ));
    };

    let given = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let given = given.as_bytes();
    let expected = expected.as_bytes();
    if given.len() != expected.len() || given.ct_eq(expected).unwrap_u8() != 1 {
        return Err(ServerError::Forbidden("Invalid webhook secret".into()));
    }
    Ok(())
}

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(change): Json<ExternalChange>,
) -> Result<Json<WebhookResponse>, ServerError> {
    verify_secret(&headers, state.config.webhook_secret.as_deref())?;
    debug!(?change, "webhook received");

    let Some((user_id, notification)) = apply(&state, change).await? else {
        return Ok(Json(WebhookResponse::ignored()));
    };

    let delivered = state.hub.publish(user_id, &notification);
    info!(
        %user_id,
        entity = notification.entity.as_str(),
        kind = notification.kind.past_tense(),
        external_id = %notification.id,
        delivered,
        "external change applied"
    );
    Ok(Json(WebhookResponse {
        applied: true,
        delivered,
    }))
}

/// Apply a change to the remote store. Returns the owner and the
/// notification to push, or `None` when nothing changed.
pub async fn apply(
    state: &AppState,
    change: ExternalChange,
) -> Result<Option<(UserId, PushNotification)>, ServerError> {
    match change {
        ExternalChange::AssignmentCreated {
            user_id,
            external_id,
            fields,
        } => {
            if state
                .db
                .by_external_id(Table::Assignments, &external_id)?
                .is_some()
            {
                return Ok(None);
            }
            let record = state
                .db
                .insert_assignment(user_id, None, &external_id, &fields)?;
            Ok(Some((
                user_id,
                PushNotification {
                    kind: ChangeKind::Create,
                    entity: Entity::Assignment,
                    message: format!("{} added to {}", record.fields.title, record.fields.course_code),
                    id: external_id,
                    data: serde_json::to_value(&record)?,
                },
            )))
        }

        ExternalChange::AssignmentUpdated {
            external_id,
            column,
            value,
        } => {
            let Some(key) = state.db.by_external_id(Table::Assignments, &external_id)? else {
                return Ok(None);
            };
            let (column, value) = db::assignment_column(&column, &value)?;
            let field = column.parse()?;
            if state.db.assignment(key.id)?.fields.get(field) == value {
                return Ok(None);
            }
            state
                .db
                .update_column(Table::Assignments, key.id, column, &value)?;
            let record = state.db.assignment(key.id)?;
            Ok(Some((
                key.user_id,
                PushNotification {
                    kind: ChangeKind::Update,
                    entity: Entity::Assignment,
                    message: format!("{} changed", record.fields.title),
                    id: external_id,
                    data: serde_json::to_value(FieldUpdate {
                        id: key.id.to_string(),
                        column: column.to_string(),
                        value,
                    })?,
                },
            )))
        }

        ExternalChange::AssignmentDeleted { external_id } => {
            let Some(key) = state.db.by_external_id(Table::Assignments, &external_id)? else {
                return Ok(None);
            };
            let record = state.db.assignment(key.id)?;
            state.db.soft_delete(Table::Assignments, key.id)?;
            documents::purge_for_assignments(state, vec![key.id]).await?;
            Ok(Some((
                key.user_id,
                PushNotification {
                    kind: ChangeKind::Delete,
                    entity: Entity::Assignment,
                    message: format!("{} removed", record.fields.title),
                    id: external_id,
                    data: serde_json::json!({ "id": key.id }),
                },
            )))
        }

        ExternalChange::CourseCreated {
            user_id,
            external_id,
            fields,
        } => {
            if state
                .db
                .by_external_id(Table::Courses, &external_id)?
                .is_some()
            {
                return Ok(None);
            }
            if state.db.course_code_exists(user_id, &fields.code)? {
                return Err(ServerError::BadRequest(format!(
                    "course {} already exists",
                    fields.code
                )));
            }
            let record = state
                .db
                .insert_course(user_id, None, &external_id, &fields)?;
            Ok(Some((
                user_id,
                PushNotification {
                    kind: ChangeKind::Create,
                    entity: Entity::Course,
                    message: format!("{} added", record.fields.code),
                    id: external_id,
                    data: serde_json::to_value(&record)?,
                },
            )))
        }

        ExternalChange::CourseUpdated {
            external_id,
            column,
            value,
        } => {
            let Some(key) = state.db.by_external_id(Table::Courses, &external_id)? else {
                return Ok(None);
            };
            let (column, value) = db::course_column(&column, &value)?;
            let field = column.parse()?;
            if state.db.course(key.id)?.fields.get(field) == value {
                return Ok(None);
            }
            state
                .db
                .update_column(Table::Courses, key.id, column, &value)?;
            let record = state.db.course(key.id)?;
            Ok(Some((
                key.user_id,
                PushNotification {
                    kind: ChangeKind::Update,
                    entity: Entity::Course,
                    message: format!("{} changed", record.fields.code),
                    id: external_id,
                    data: serde_json::to_value(FieldUpdate {
                        id: key.id.to_string(),
                        column: column.to_string(),
                        value,
                    })?,
                },
            )))
        }

        ExternalChange::CourseDeleted { external_id } => {
            let Some(key) = state.db.by_external_id(Table::Courses, &external_id)? else {
                return Ok(None);
            };
            let record = state.db.course(key.id)?;
            state.db.soft_delete(Table::Courses, key.id)?;
            let ids = state
                .db
                .soft_delete_course_assignments(key.user_id, &record.fields.code)?;
            documents::purge_for_assignments(state, ids).await?;
            Ok(Some((
                key.user_id,
                PushNotification {
                    kind: ChangeKind::Delete,
                    entity: Entity::Course,
                    message: format!("{} removed", record.fields.code),
                    id: external_id,
                    data: serde_json::json!({ "id": key.id }),
                },
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::build_router;
    use crate::config::ServerConfig;
    use crate::db::RemoteDb;
    use crate::external::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(dir: &tempfile::TempDir) -> AppState {
        let config = ServerConfig {
            document_storage_path: dir.path().to_path_buf(),
            webhook_secret: Some("hook-secret".into()),
            ..Default::default()
        };
        AppState::new(
            config,
            RemoteDb::open_in_memory().unwrap(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    fn delivery(secret: &str, body: Value) -> Request<Body> {
        Request::post("/webhooks/external")
            .header("x-webhook-secret", secret)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn created() -> Value {
        json!({
            "type": "assignment_created",
            "user_id": 1,
            "external_id": "page-1",
            "title": "Essay",
            "course_code": "HIST2",
        })
    }

    #[tokio::test]
    async fn wrong_secret_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let response = build_router(state(&dir))
            .oneshot(delivery("guess", created()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn update_is_pushed_with_remote_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let mut reg = state.hub.register(UserId(1));

        let (_, create) = apply(&state, serde_json::from_value(created()).unwrap())
            .await
            .unwrap()
            .unwrap();
        state.hub.publish(UserId(1), &create);
        let remote_id = create.data["id"].as_i64().unwrap();

        let change = json!({
            "type": "assignment_updated",
            "external_id": "page-1",
            "column": "deadline",
            "value": "2024-06-01",
        });
        let response = build_router(state.clone())
            .oneshot(delivery("hook-secret", change.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let _created = reg.receiver.try_recv().unwrap();
        let pushed: PushNotification =
            serde_json::from_str(&reg.receiver.try_recv().unwrap()).unwrap();
        assert_eq!(pushed.kind, ChangeKind::Update);
        assert_eq!(pushed.id, "page-1");
        let update: FieldUpdate = serde_json::from_value(pushed.data).unwrap();
        assert_eq!(update.id, remote_id.to_string());
        assert_eq!(update.value, json!("2024-06-01T00:00:00Z"));

        // Same value again changes nothing and pushes nothing.
        let again = apply(&state, serde_json::from_value(change).unwrap())
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn delete_of_unknown_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let change = json!({ "type": "assignment_deleted", "external_id": "missing" });
        let outcome = apply(&state, serde_json::from_value(change).unwrap())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
