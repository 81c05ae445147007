//! HTTP client for the coursync server's record and document routes.

use async_trait::async_trait;
use coursync_shared::constants::USER_ID_HEADER;
use coursync_shared::protocol::{
    AssignmentRecord, CourseRecord, DocumentInfo, FieldUpdate, NewAssignment, NewCourse,
    RecordResponse,
};
use coursync_shared::types::{DocumentType, UserId};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Operations the client performs against the remote store.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_courses(&self) -> Result<Vec<CourseRecord>>;
    async fn create_course(&self, course: &NewCourse) -> Result<CourseRecord>;
    async fn update_course(&self, update: &FieldUpdate) -> Result<()>;
    async fn delete_course(&self, remote_id: i64) -> Result<()>;

    async fn list_assignments(&self) -> Result<Vec<AssignmentRecord>>;
    async fn create_assignment(&self, assignment: &NewAssignment) -> Result<AssignmentRecord>;
    async fn update_assignment(&self, update: &FieldUpdate) -> Result<()>;
    async fn delete_assignment(&self, remote_id: i64) -> Result<()>;

    /// Upload a payload against the remote copy of an assignment.
    async fn upload_document(
        &self,
        assignment_remote_id: i64,
        doc_type: DocumentType,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentInfo>;

    /// Append a version to the server chain that `parent_remote_id` belongs
    /// to.
    async fn upload_version(
        &self,
        parent_remote_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentInfo>;
}

#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    user_id: UserId,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header(USER_ID_HEADER, self.user_id.to_string())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %body, "server rejected request");
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        Ok(self.send(request).await?.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn list_courses(&self) -> Result<Vec<CourseRecord>> {
        self.send_json(self.request(reqwest::Method::GET, "/courses"))
            .await
    }

    async fn create_course(&self, course: &NewCourse) -> Result<CourseRecord> {
        let response: RecordResponse<CourseRecord> = self
            .send_json(self.request(reqwest::Method::POST, "/courses").json(course))
            .await?;
        Ok(response.record)
    }

    async fn update_course(&self, update: &FieldUpdate) -> Result<()> {
        self.send(self.request(reqwest::Method::PUT, "/courses").json(update))
            .await?;
        Ok(())
    }

    async fn delete_course(&self, remote_id: i64) -> Result<()> {
        self.send(self.request(reqwest::Method::DELETE, &format!("/courses/{remote_id}")))
            .await?;
        Ok(())
    }

    async fn list_assignments(&self) -> Result<Vec<AssignmentRecord>> {
        self.send_json(self.request(reqwest::Method::GET, "/assignments"))
            .await
    }

    async fn create_assignment(&self, assignment: &NewAssignment) -> Result<AssignmentRecord> {
        let response: RecordResponse<AssignmentRecord> = self
            .send_json(
                self.request(reqwest::Method::POST, "/assignments")
                    .json(assignment),
            )
            .await?;
        Ok(response.record)
    }

    async fn update_assignment(&self, update: &FieldUpdate) -> Result<()> {
        self.send(self.request(reqwest::Method::PUT, "/assignments").json(update))
            .await?;
        Ok(())
    }

    async fn delete_assignment(&self, remote_id: i64) -> Result<()> {
        self.send(self.request(
            reqwest::Method::DELETE,
            &format!("/assignments/{remote_id}"),
        ))
        .await?;
        Ok(())
    }

    async fn upload_document(
        &self,
        assignment_remote_id: i64,
        doc_type: DocumentType,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentInfo> {
        let form = Form::new()
            .text("assignment_id", assignment_remote_id.to_string())
            .text("type", doc_type.as_str())
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        self.send_json(
            self.request(reqwest::Method::POST, "/documents")
                .multipart(form),
        )
        .await
    }

    async fn upload_version(
        &self,
        parent_remote_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentInfo> {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        let path = format!("/documents/{parent_remote_id}/versions");

        self.send_json(self.request(reqwest::Method::POST, &path).multipart(form))
            .await
    }
}
