//! HTTP transport to the forecasting backend

use super::{BaselineRequest, BaselineTransport, Endpoint, QueueTask};
use crate::config::BackendConfig;
use crate::error::{BaselineError, Result};
use crate::resilience::RequestQueue;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::sync::Arc;
use tracing::debug;

const ERROR_BODY_LIMIT: usize = 200;

/// Production transport: reqwest for `fetch`, [`RequestQueue`] for `enqueue`
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: BackendConfig,
    queue: Arc<RequestQueue>,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(config: BackendConfig, queue: Arc<RequestQueue>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| BaselineError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            queue,
        })
    }

    /// The admission queue used by `enqueue`
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// GET URL for a request, if it fits within `max_get_url_len`
    fn get_url(&self, endpoint: Endpoint, request: &BaselineRequest) -> Result<Option<Url>> {
        let url = Url::parse_with_params(
            &endpoint.url(&self.config.base_url),
            request.query_pairs(),
        )
        .map_err(|e| BaselineError::config(format!("Invalid backend URL: {}", e)))?;

        Ok((url.as_str().len() <= self.config.max_get_url_len).then_some(url))
    }

    fn map_send_error(&self, err: reqwest::Error) -> BaselineError {
        if err.is_timeout() {
            BaselineError::Timeout(self.config.timeout())
        } else {
            BaselineError::from(err)
        }
    }
}

#[async_trait]
impl BaselineTransport for HttpTransport {
    async fn fetch(&self, endpoint: Endpoint, request: &BaselineRequest) -> Result<String> {
        let builder = match self.get_url(endpoint, request)? {
            Some(url) => {
                debug!(%endpoint, points = request.y.len(), "GET baseline");
                self.client.get(url)
            }
            None => {
                debug!(%endpoint, points = request.y.len(), "POST baseline");
                self.client
                    .post(endpoint.url(&self.config.base_url))
                    .json(request)
            }
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            body.truncate(
                body.char_indices()
                    .nth(ERROR_BODY_LIMIT)
                    .map(|(idx, _)| idx)
                    .unwrap_or(body.len()),
            );
            return Err(BaselineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.text().await.map_err(|e| self.map_send_error(e))
    }

    async fn enqueue<'a>(&'a self, task: QueueTask<'a>) -> Result<String> {
        self.queue.run(task).await
    }

    fn admission_queue(&self) -> Option<&Arc<RequestQueue>> {
        Some(&self.queue)
    }
}
