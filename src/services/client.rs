use crate::config::Session;
use crate::error::{JobError, Result};
use crate::models::job::{JobHandle, JobKind, JobProgress, JobRequest, SubmitBody};
use crate::models::result::{JobResult, ResultPayload, ScanReport};
use crate::models::target::AffectedTargets;
use log::{debug, error};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Request/response surface of the external job service.
pub trait JobService: Send + Sync + 'static {
    fn submit(&self, request: &JobRequest) -> impl Future<Output = Result<JobHandle>> + Send;

    fn poll(&self, kind: JobKind, job_id: &str) -> impl Future<Output = Result<JobProgress>> + Send;

    /// Only valid once a poll has observed `completed`.
    fn fetch_result(&self, kind: JobKind, job_id: &str) -> impl Future<Output = Result<ResultPayload>> + Send;

    fn affected_targets(&self, item_codes: &[String]) -> impl Future<Output = Result<AffectedTargets>> + Send;
}

#[derive(Serialize)]
struct AffectedTargetsBody<'a> {
    item_codes: &'a [String],
}

pub struct JobClient {
    client: reqwest::Client,
    base_url: String,
}

impl JobClient {
    pub fn new(base_url: &str, session: &Session, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("posture-jobs"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &session.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| JobError::Validation(format!("invalid access token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn submit_url(&self, request: &JobRequest) -> String {
        match request.body() {
            SubmitBody::Scan { .. } => format!("{}/api/scan/full", self.base_url),
            SubmitBody::SingleTarget { .. } => format!("{}/api/fix/execute", self.base_url),
            SubmitBody::MultiTarget { .. } => format!("{}/api/fix/execute-batch", self.base_url),
        }
    }

    fn job_url(&self, kind: JobKind, action: &str, job_id: &str) -> String {
        let family = match kind {
            JobKind::Scan(_) => "scan",
            JobKind::Remediation => "fix",
        };
        format!("{}/api/{}/{}/{}", self.base_url, family, action, job_id)
    }
}

impl JobService for JobClient {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle> {
        let url = self.submit_url(request);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(&request.body()).send().await?;
        let response = check_status(response).await?;

        Ok(response.json().await?)
    }

    async fn poll(&self, kind: JobKind, job_id: &str) -> Result<JobProgress> {
        let url = self.job_url(kind, "progress", job_id);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        let response = check_status(response).await?;

        Ok(response.json().await?)
    }

    async fn fetch_result(&self, kind: JobKind, job_id: &str) -> Result<ResultPayload> {
        let url = self.job_url(kind, "result", job_id);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        // 425 Too Early
        if matches!(response.status().as_u16(), 404 | 409 | 425) {
            return Err(JobError::NotReady(job_id.to_string()));
        }
        let response = check_status(response).await?;

        match kind {
            JobKind::Scan(_) => Ok(ResultPayload::Scan(response.json::<ScanReport>().await?)),
            JobKind::Remediation => Ok(ResultPayload::Remediation(response.json::<JobResult>().await?)),
        }
    }

    async fn affected_targets(&self, item_codes: &[String]) -> Result<AffectedTargets> {
        if item_codes.is_empty() {
            return Err(JobError::Validation("no items to look up".to_string()));
        }

        let url = format!("{}/api/fix/affected-servers", self.base_url);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&AffectedTargetsBody { item_codes })
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(response.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("Job service error {}: {}", status, body);

    Err(JobError::Transport {
        status: Some(status.as_u16()),
        message: error_detail(&body).unwrap_or_else(|| format!("job service returned {}", status)),
    })
}

fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_extracted_from_backend_error_body() {
        assert_eq!(
            error_detail(r#"{"detail": "server not registered"}"#).as_deref(),
            Some("server not registered")
        );
        assert_eq!(error_detail("<html>oops</html>"), None);
    }

    #[test]
    fn urls_follow_job_family() {
        let client = JobClient::new("http://backend:8000/", &Session::anonymous(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.job_url(JobKind::Remediation, "progress", "j1"),
            "http://backend:8000/api/fix/progress/j1"
        );
        assert_eq!(
            client.job_url(JobKind::Scan(crate::models::job::ScanScope::Db), "result", "j2"),
            "http://backend:8000/api/scan/result/j2"
        );
    }
}
