//! External record store the server mirrors records into.
//!
//! The production implementation talks to the Notion pages API. Without an
//! integration token the server falls back to [`MemoryStore`], which hands
//! out random page ids and keeps properties in process.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use coursync_shared::types::{
    AssignmentField, AssignmentFields, CourseField, CourseFields, Entity, FieldKind,
};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServerError;

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// One column as the external store sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: &'static str,
    pub kind: FieldKind,
    /// The page title column.
    pub title: bool,
    pub value: Value,
}

pub fn assignment_properties(fields: &AssignmentFields) -> Vec<Property> {
    AssignmentField::ALL
        .iter()
        .map(|f| assignment_property(*f, fields.get(*f)))
        .collect()
}

pub fn assignment_property(field: AssignmentField, value: Value) -> Property {
    Property {
        name: field.column(),
        kind: field.kind(),
        title: field == AssignmentField::Title,
        value,
    }
}

pub fn course_properties(fields: &CourseFields) -> Vec<Property> {
    let mut props = vec![Property {
        name: "code",
        kind: FieldKind::Text,
        title: false,
        value: Value::String(fields.code.clone()),
    }];
    props.extend(
        CourseField::ALL
            .iter()
            .map(|f| course_property(*f, fields.get(*f))),
    );
    props
}

pub fn course_property(field: CourseField, value: Value) -> Property {
    Property {
        name: field.column(),
        kind: field.kind(),
        title: field == CourseField::Name,
        value,
    }
}

#[async_trait]
pub trait ExternalRecordStore: Send + Sync {
    /// Create a record and return its external id.
    async fn create(&self, entity: Entity, properties: &[Property]) -> Result<String, ServerError>;

    async fn update(
        &self,
        entity: Entity,
        external_id: &str,
        property: &Property,
    ) -> Result<(), ServerError>;

    async fn delete(&self, entity: Entity, external_id: &str) -> Result<(), ServerError>;
}

// ---------------------------------------------------------------------------
// Notion
// ---------------------------------------------------------------------------

pub struct NotionStore {
    http: reqwest::Client,
    api_key: String,
    assignments_db: String,
    courses_db: String,
}

impl NotionStore {
    pub fn new(api_key: String, assignments_db: String, courses_db: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            assignments_db,
            courses_db,
        }
    }

    fn database_for(&self, entity: Entity) -> Result<&str, ServerError> {
        let id = match entity {
            Entity::Assignment => &self.assignments_db,
            Entity::Course => &self.courses_db,
            Entity::Unknown => {
                return Err(ServerError::BadRequest("unknown entity".into()));
            }
        };
        if id.is_empty() {
            return Err(ServerError::External(format!(
                "no Notion database configured for {}",
                entity.as_str()
            )));
        }
        Ok(id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ServerError> {
        let response = request
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| ServerError::External(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Notion request rejected");
            return Err(ServerError::External(format!("Notion returned {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ServerError::External(e.to_string()))
    }
}

/// Notion property payload for one column.
pub fn notion_property(property: &Property) -> Value {
    let text = |s: &str| json!([{ "type": "text", "text": { "content": s } }]);

    if property.title {
        let content = property.value.as_str().unwrap_or_default();
        return json!({ "title": text(content) });
    }

    match (property.kind, &property.value) {
        (FieldKind::Timestamp, Value::Null) => json!({ "date": null }),
        (FieldKind::Timestamp, v) => json!({ "date": { "start": v } }),
        (FieldKind::Bool, v) => json!({ "checkbox": v.as_bool().unwrap_or(false) }),
        (FieldKind::Integer, v) => json!({ "number": v }),
        (FieldKind::Text, Value::Null) => json!({ "rich_text": [] }),
        (FieldKind::Text, Value::String(s)) => json!({ "rich_text": text(s) }),
        (FieldKind::Text, v) => json!({ "rich_text": text(&v.to_string()) }),
    }
}

fn notion_properties<'a>(properties: impl IntoIterator<Item = &'a Property>) -> Value {
    let map: Map<String, Value> = properties
        .into_iter()
        .map(|p| (p.name.to_string(), notion_property(p)))
        .collect();
    Value::Object(map)
}

#[async_trait]
impl ExternalRecordStore for NotionStore {
    async fn create(&self, entity: Entity, properties: &[Property]) -> Result<String, ServerError> {
        let database_id = self.database_for(entity)?;
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": notion_properties(properties),
        });

        let page = self
            .send(self.http.post(format!("{NOTION_API}/pages")).json(&body))
            .await?;

        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::External("Notion response carried no page id".into()))?;
        debug!(entity = entity.as_str(), external_id = id, "Notion page created");
        Ok(id.to_string())
    }

    async fn update(
        &self,
        entity: Entity,
        external_id: &str,
        property: &Property,
    ) -> Result<(), ServerError> {
        let body = json!({ "properties": notion_properties([property]) });
        self.send(
            self.http
                .patch(format!("{NOTION_API}/pages/{external_id}"))
                .json(&body),
        )
        .await?;
        debug!(
            entity = entity.as_str(),
            external_id,
            column = property.name,
            "Notion page updated"
        );
        Ok(())
    }

    async fn delete(&self, entity: Entity, external_id: &str) -> Result<(), ServerError> {
        self.send(
            self.http
                .patch(format!("{NOTION_API}/pages/{external_id}"))
                .json(&json!({ "archived": true })),
        )
        .await?;
        debug!(entity = entity.as_str(), external_id, "Notion page archived");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process fallback
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    pages: Mutex<HashMap<String, (Entity, Map<String, Value>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored properties of a page, if it exists.
    pub fn page(&self, external_id: &str) -> Option<Map<String, Value>> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_id)
            .map(|(_, props)| props.clone())
    }

    pub fn len(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExternalRecordStore for MemoryStore {
    async fn create(&self, entity: Entity, properties: &[Property]) -> Result<String, ServerError> {
        let id = Uuid::new_v4().to_string();
        let props = properties
            .iter()
            .map(|p| (p.name.to_string(), p.value.clone()))
            .collect();
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), (entity, props));
        Ok(id)
    }

    async fn update(
        &self,
        _entity: Entity,
        external_id: &str,
        property: &Property,
    ) -> Result<(), ServerError> {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let (_, props) = pages
            .get_mut(external_id)
            .ok_or_else(|| ServerError::External(format!("no page {external_id}")))?;
        props.insert(property.name.to_string(), property.value.clone());
        Ok(())
    }

    async fn delete(&self, _entity: Entity, external_id: &str) -> Result<(), ServerError> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(external_id);
        Ok(())
    }
}
