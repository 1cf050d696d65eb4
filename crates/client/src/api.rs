//! Control-plane client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use bulkpull_types::{
    CancelResponse, DataSourceHandle, Estimate, EstimateRequest, Job, JobId, JobList, SearchQuery,
    StartJobRequest, StartJobResponse,
};

use crate::error::ClientError;

const USER_ID_HEADER: &str = "x-user-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The job operations a subscriber needs. [`HttpJobApi`] talks to a live
/// server; tests substitute scripted implementations.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn estimate(
        &self,
        query: &SearchQuery,
        source: &DataSourceHandle,
    ) -> Result<Estimate, ClientError>;

    async fn start(&self, request: &StartJobRequest) -> Result<JobId, ClientError>;

    async fn get(&self, job_id: &str) -> Result<Job, ClientError>;

    async fn cancel(&self, job_id: &str) -> Result<CancelResponse, ClientError>;

    async fn list(&self) -> Result<JobList, ClientError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpJobApi {
    base_url: String,
    user_id: String,
    client: reqwest::Client,
}

impl HttpJobApi {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let resp = request.header(USER_ID_HEADER, &self.user_id).send().await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(message));
        }
        Err(ClientError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn estimate(
        &self,
        query: &SearchQuery,
        source: &DataSourceHandle,
    ) -> Result<Estimate, ClientError> {
        let body = EstimateRequest {
            query: query.clone(),
            data_source_handle: source.clone(),
        };
        self.send(self.client.post(self.url("/estimate")).json(&body))
            .await
    }

    async fn start(&self, request: &StartJobRequest) -> Result<JobId, ClientError> {
        let resp: StartJobResponse = self
            .send(self.client.post(self.url("/jobs")).json(request))
            .await?;
        Ok(resp.job_id)
    }

    async fn get(&self, job_id: &str) -> Result<Job, ClientError> {
        self.send(self.client.get(self.url(&format!("/jobs/{job_id}"))))
            .await
    }

    async fn cancel(&self, job_id: &str) -> Result<CancelResponse, ClientError> {
        self.send(self.client.post(self.url(&format!("/jobs/{job_id}/cancel"))))
            .await
    }

    async fn list(&self) -> Result<JobList, ClientError> {
        self.send(self.client.get(self.url("/jobs"))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkpull_types::JobStatus;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_get_sends_identity_and_decodes_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/jobs/job_1")
            .match_header("x-user-id", "u1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id":"job_1","status":"running","progress":{"currentPage":3,"totalPages":10,
                "processedRecords":300,"totalEstimated":1000,"percentage":30.0},
                "createdAt":"2026-01-01T00:00:00Z"}"#,
            )
            .create_async()
            .await;

        let api = HttpJobApi::new(format!("{}/", server.url()), "u1").unwrap();
        let job = api.get("job_1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress.percentage, 30.0);
    }

    #[tokio::test]
    async fn test_404_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/jobs/nope")
            .with_status(404)
            .with_body(r#"{"error":"Job not found: nope"}"#)
            .create_async()
            .await;

        let api = HttpJobApi::new(server.url(), "u1").unwrap();
        match api.get("nope").await {
            Err(ClientError::NotFound(message)) => assert_eq!(message, "Job not found: nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_posts_camel_case_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/jobs")
            .match_body(Matcher::PartialJsonString(
                r#"{"tableName":"Leads","dataSourceHandle":"people"}"#.into(),
            ))
            .with_status(202)
            .with_body(r#"{"jobId":123}"#)
            .create_async()
            .await;

        let api = HttpJobApi::new(server.url(), "u1").unwrap();
        let job_id = api
            .start(&StartJobRequest {
                table_name: "Leads".into(),
                query: SearchQuery::terms("cto"),
                data_source_handle: DataSourceHandle::new("people"),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(job_id, "123");
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_kept() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/estimate")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let api = HttpJobApi::new(server.url(), "u1").unwrap();
        let err = api
            .estimate(&SearchQuery::terms("cto"), &DataSourceHandle::new("people"))
            .await
            .unwrap_err();
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
