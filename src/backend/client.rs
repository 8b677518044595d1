use super::{
    Backend, BackendError, BackendResponse, CountResult, JobQuery, JobQueryResult, SendRequest,
};
use crate::config::BackendConfig;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;

const JOB_ENDPOINT: &str = "job";
const BOOT_COUNT_ENDPOINT: &str = "count/boot";
const SEND_ENDPOINT: &str = "send";

/// Join a base URL and an endpoint path with exactly one `/`.
pub fn join_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// reqwest-backed [`Backend`].
///
/// The authorization token is installed as a default header when the client
/// is built and never changes afterwards.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = config.token.as_deref() {
            let mut value = HeaderValue::from_str(token)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("kernelci-reports/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<BackendResponse<T>, BackendError> {
        let url = join_endpoint(&self.base_url, path);
        log::debug!("GET {} {:?}", url, params);

        let response = self.http.get(&url).query(params).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            log::debug!("GET {} returned {}", url, status);
            return Ok(BackendResponse::status(status));
        }

        let bytes = response.bytes().await?;
        let body = match serde_json::from_slice(&bytes) {
            Ok(body) => Some(body),
            Err(err) => {
                log::warn!("failed to decode response from {}: {}", url, err);
                None
            }
        };

        Ok(BackendResponse { status, body })
    }
}

#[rocket::async_trait]
impl Backend for BackendClient {
    async fn query_jobs(
        &self,
        query: &JobQuery,
    ) -> Result<BackendResponse<JobQueryResult>, BackendError> {
        self.get_json(JOB_ENDPOINT, &query.params()).await
    }

    async fn count_boots(
        &self,
        job: &str,
        kernel: &str,
    ) -> Result<BackendResponse<CountResult>, BackendError> {
        self.get_json(BOOT_COUNT_ENDPOINT, &[("job", job), ("kernel", kernel)])
            .await
    }

    async fn send_report(&self, request: &SendRequest) -> Result<StatusCode, BackendError> {
        let url = join_endpoint(&self.base_url, SEND_ENDPOINT);
        log::debug!("POST {} for {} {}", url, request.job, request.kernel);

        let response = self.http.post(&url).json(request).send().await?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_join_endpoint() {
        assert_eq!(
            join_endpoint("https://api.example.org", "job"),
            "https://api.example.org/job"
        );
        assert_eq!(
            join_endpoint("https://api.example.org/", "/count/boot"),
            "https://api.example.org/count/boot"
        );
    }

    #[test]
    fn test_client_rejects_invalid_token() {
        let config = BackendConfig {
            base_url: "https://api.example.org".to_string(),
            token: Some("bad\ntoken".to_string()),
            connect_timeout: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
        };
        assert!(matches!(
            BackendClient::new(&config),
            Err(BackendError::InvalidToken(_))
        ));
    }
}
