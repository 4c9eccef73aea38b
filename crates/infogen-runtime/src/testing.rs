//! Scripted provider shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use infogen_core::{GenerationRequest, ModelId, RawResponse};

use crate::providers::{GenerativeProvider, ProviderError};

/// What the provider does when a given model is called.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Respond(RawResponse),
    Fail(ProviderError),
    /// Respond, but only after a delay.
    After(Duration, RawResponse),
    /// Never resolve.
    Hang,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedProvider {
    steps: HashMap<ModelId, Step>,
    catalog: Result<Vec<ModelId>, ProviderError>,
    calls: Mutex<Vec<ModelId>>,
    catalog_calls: AtomicUsize,
    hung_dropped: Arc<AtomicBool>,
    fingerprint: u64,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            steps: HashMap::new(),
            catalog: Ok(Vec::new()),
            calls: Mutex::new(Vec::new()),
            catalog_calls: AtomicUsize::new(0),
            hung_dropped: Arc::new(AtomicBool::new(false)),
            fingerprint: 7,
        }
    }

    pub(crate) fn on(mut self, model: &str, step: Step) -> Self {
        self.steps.insert(ModelId::new(model), step);
        self
    }

    pub(crate) fn with_catalog(mut self, models: &[&str]) -> Self {
        self.catalog = Ok(models.iter().map(|m| ModelId::new(*m)).collect());
        self
    }

    pub(crate) fn with_catalog_error(mut self, error: ProviderError) -> Self {
        self.catalog = Err(error);
        self
    }

    pub(crate) fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Models called so far, in order.
    pub(crate) fn calls(&self) -> Vec<ModelId> {
        self.calls.lock().clone()
    }

    pub(crate) fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    /// Whether a `Hang` call was abandoned by dropping its future.
    pub(crate) fn hung_call_dropped(&self) -> bool {
        self.hung_dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    async fn generate(
        &self,
        model: &ModelId,
        _request: &GenerationRequest,
    ) -> Result<RawResponse, ProviderError> {
        self.calls.lock().push(model.clone());

        match self.steps.get(model).cloned() {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::After(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Step::Hang) => {
                let _flag = DropFlag(self.hung_dropped.clone());
                std::future::pending().await
            }
            None => Err(ProviderError::ApiError {
                status: 404,
                message: format!("models/{} is not found", model),
            }),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelId>, ProviderError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        self.catalog.clone()
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn credential_fingerprint(&self) -> u64 {
        self.fingerprint
    }
}
