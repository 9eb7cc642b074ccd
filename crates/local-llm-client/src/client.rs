//! Client for a local Ollama-compatible inference server.

use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ClientError;
use crate::types::{
    ErrorBody, GenerateRequest, GenerateResponse, ModelInfo, PullRequest, PullResponse,
    TagsResponse, VersionResponse,
};

/// Client for a local inference server.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct Client {
    /// HTTP client for making requests
    http_client: reqwest::Client,
    /// Server root, always ending in `/`
    base_url: Url,
}

impl Client {
    /// Create a new client for the server at `base_url`.
    ///
    /// # Example
    /// ```rust,no_run
    /// use local_llm_client::Client;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new("http://127.0.0.1:11434")?;
    /// let models = client.list_models().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::build(base_url, None)
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Self::build(base_url, Some(timeout))
    }

    fn build(base_url: &str, timeout: Option<Duration>) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().map_err(ClientError::HttpError)?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// The server root this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }

    /// Fetch the server version (a cheap liveness probe).
    pub async fn version(&self) -> Result<String, ClientError> {
        let url = self.endpoint("api/version")?;
        let response = self.http_client.get(url).send().await?;
        let body: VersionResponse = Self::parse(response).await?;
        Ok(body.version)
    }

    /// List the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let url = self.endpoint("api/tags")?;
        let response = self.http_client.get(url).send().await?;
        let body: TagsResponse = Self::parse(response).await?;
        Ok(body.models)
    }

    /// Check whether `model` is installed.
    pub async fn has_model(&self, model: &str) -> Result<bool, ClientError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.matches(model)))
    }

    /// Download `model`, returning once the server reports completion.
    pub async fn pull(&self, model: &str) -> Result<(), ClientError> {
        let url = self.endpoint("api/pull")?;
        tracing::info!("[local-llm] Pulling model {}", model);

        let response = self
            .http_client
            .post(url)
            .json(&PullRequest {
                model: model.to_string(),
                stream: false,
            })
            .send()
            .await?;
        let body: PullResponse = Self::parse(response).await?;

        if body.status != "success" {
            return Err(ClientError::ApiError {
                status: 200,
                message: format!("pull finished with status '{}'", body.status),
            });
        }

        tracing::info!("[local-llm] Model {} pulled", model);
        Ok(())
    }

    /// Run a single non-streaming generation.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ClientError> {
        let url = self.endpoint("api/generate")?;
        tracing::debug!(
            "[local-llm] generate model={} prompt_chars={}",
            request.model,
            request.prompt.chars().count()
        );

        let response = self.http_client.post(url).json(request).send().await?;
        Self::parse(response).await
    }

    /// Turn a response into `T`, mapping non-success statuses to `ApiError`.
    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ClientError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerateOptions;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = Client::new("http://localhost:11434/proxy").unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:11434/proxy/");
        assert_eq!(
            client.endpoint("api/tags").unwrap().as_str(),
            "http://localhost:11434/proxy/api/tags"
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = Client::new("not a url").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn list_models_and_has_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [
                    { "name": "gemma3:latest", "size": 42 },
                    { "name": "qwen2.5:0.5b", "size": 7 }
                ]
            })))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri()).unwrap();
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert!(client.has_model("gemma3").await.unwrap());
        assert!(client.has_model("qwen2.5:0.5b").await.unwrap());
        assert!(!client.has_model("qwen2.5").await.unwrap());
    }

    #[tokio::test]
    async fn generate_sends_options_and_returns_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "gemma3",
                "prompt": "hello",
                "stream": false,
                "options": { "top_k": 3 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gemma3",
                "response": "hi there",
                "done": true,
                "context": [1, 2, 3]
            })))
            .mount(&server)
            .await;

        let client = Client::new(&server.uri()).unwrap();
        let request = GenerateRequest::new("gemma3", "hello").with_options(GenerateOptions {
            top_k: Some(3),
            ..Default::default()
        });
        let response = client.generate(&request).await.unwrap();
        assert_eq!(response.response, "hi there");
        assert_eq!(response.context, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "error": "model 'nope' not found" })),
            )
            .mount(&server)
            .await;

        let client = Client::new(&server.uri()).unwrap();
        let err = client
            .generate(&GenerateRequest::new("nope", "x"))
            .await
            .unwrap_err();
        assert!(err.is_model_missing());
        assert!(err.to_string().contains("model 'nope' not found"));
    }

    #[tokio::test]
    async fn pull_reports_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "failed" })),
            )
            .mount(&server)
            .await;

        let client = Client::new(&server.uri()).unwrap();
        assert!(client.pull("gemma3").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        // Port 9 (discard) is closed on test machines
        let client = Client::with_timeout("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.version().await.unwrap_err();
        assert!(err.is_connect() || err.is_timeout());
    }
}
