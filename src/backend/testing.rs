//! Scripted transport for unit tests

use super::{BaselineRequest, BaselineTransport, Endpoint, QueueTask};
use crate::error::{BaselineError, Result};
use crate::resilience::{QueueConfig, RequestQueue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type DelayFn = Box<dyn Fn(&BaselineRequest) -> Duration + Send + Sync>;

/// Transport that answers from a script and records every call
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Result<String>>>,
    default_body: Option<String>,
    hang: bool,
    queue: Option<Arc<RequestQueue>>,
    requests: Mutex<Vec<(Endpoint, BaselineRequest)>>,
    delay: Option<DelayFn>,
    fetches: AtomicUsize,
    enqueued: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: Mutex<Vec<BaselineRequest>>,
}

impl FakeTransport {
    /// Every fetch returns `body`
    pub(crate) fn responding(body: impl Into<String>) -> Self {
        Self {
            default_body: Some(body.into()),
            ..Self::default()
        }
    }

    /// Fetches pop results from `script`; afterwards they fail with a
    /// network error
    pub(crate) fn scripted(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Every fetch fails with a network error
    pub(crate) fn unreachable() -> Self {
        Self::default()
    }

    /// Every fetch never completes
    pub(crate) fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Admit tasks through a real queue
    pub(crate) fn with_queue(mut self, max_concurrent: usize) -> Self {
        self.queue = Some(Arc::new(RequestQueue::new(
            QueueConfig::default().max_concurrent(max_concurrent),
        )));
        self
    }

    /// Each fetch sleeps for `delay(request)` before answering
    pub(crate) fn with_delay(
        mut self,
        delay: impl Fn(&BaselineRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Most fetches that were running at the same time
    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Requests in the order their fetches finished
    pub(crate) fn completed(&self) -> Vec<BaselineRequest> {
        self.completed.lock().clone()
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<(Endpoint, BaselineRequest)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl BaselineTransport for FakeTransport {
    async fn fetch(&self, endpoint: Endpoint, request: &BaselineRequest) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((endpoint, request.clone()));

        if self.hang {
            std::future::pending::<()>().await;
        }

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(request)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().push(request.clone());

        let scripted = self.script.lock().pop_front();
        match (scripted, &self.default_body) {
            (Some(result), _) => result,
            (None, Some(body)) => Ok(body.clone()),
            (None, None) => Err(BaselineError::network("connection refused")),
        }
    }

    async fn enqueue<'a>(&'a self, task: QueueTask<'a>) -> Result<String> {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        match &self.queue {
            Some(queue) => queue.run(task).await,
            None => task.await,
        }
    }

    fn admission_queue(&self) -> Option<&Arc<RequestQueue>> {
        self.queue.as_ref()
    }
}
