//! Prediction service - owns the loaded model for the process lifetime

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::model::{CancelToken, InputSchema, LoadedModel, ModelInfo, PredictError, Predictor, Table, TableError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error("Prediction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Prediction task failed: {0}")]
    Task(String),
}

pub struct PredictionService {
    predictor: Arc<dyn Predictor>,
    schema: InputSchema,
    info: Option<ModelInfo>,
    timeout: Duration,
}

impl PredictionService {
    pub fn new(model: LoadedModel, timeout: Duration) -> Self {
        Self {
            predictor: model.predictor,
            schema: model.schema,
            info: Some(model.info),
            timeout,
        }
    }

    /// Service around a bare predictor, without registry metadata
    pub fn from_predictor(predictor: Arc<dyn Predictor>, schema: InputSchema, timeout: Duration) -> Self {
        Self {
            predictor,
            schema,
            info: None,
            timeout,
        }
    }

    pub fn info(&self) -> Option<&ModelInfo> {
        self.info.as_ref()
    }

    /// Convert the payload and run the model on the blocking pool.
    ///
    /// The inference is cancelled when it times out or when the caller drops
    /// the returned future.
    pub async fn predict(&self, payload: &Value) -> Result<Vec<f64>, ServiceError> {
        let table = Table::from_json(payload, &self.schema)?;
        if table.is_empty() {
            return Ok(Vec::new());
        }

        let rows = table.n_rows();
        let predictor = Arc::clone(&self.predictor);
        let cancel = CancelToken::new();
        let _cancel_guard = cancel.cancel_on_drop();
        let task = tokio::task::spawn_blocking(move || predictor.predict(&table, &cancel));

        let predictions = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => return Err(ServiceError::Task(e.to_string())),
            Err(_) => {
                tracing::warn!("Prediction of {} rows timed out after {:?}, cancelling", rows, self.timeout);
                return Err(ServiceError::Timeout(self.timeout));
            }
        };

        if predictions.len() != rows {
            return Err(PredictError::OutputMismatch {
                expected: rows,
                actual: predictions.len(),
            }
            .into());
        }

        Ok(predictions)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Predictors for tests that do not need an ONNX model.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// `bias + sum(weights[i] * column[i])` per row
    pub struct LinearPredictor {
        pub weights: Vec<f64>,
        pub bias: f64,
    }

    impl Predictor for LinearPredictor {
        fn predict(&self, table: &Table, _cancel: &CancelToken) -> Result<Vec<f64>, PredictError> {
            if table.n_columns() != self.weights.len() {
                return Err(PredictError::InvalidInput(format!(
                    "model expects {} columns, got {}",
                    self.weights.len(),
                    table.n_columns()
                )));
            }
            Ok(table
                .values()
                .rows()
                .into_iter()
                .map(|row| self.bias + row.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>())
                .collect())
        }
    }

    /// Fails every call with the given error kind
    pub enum FailingPredictor {
        Runtime,
        Panic,
        Slow(Duration),
        ShortOutput,
    }

    impl Predictor for FailingPredictor {
        fn predict(&self, table: &Table, _cancel: &CancelToken) -> Result<Vec<f64>, PredictError> {
            match self {
                FailingPredictor::Runtime => {
                    Err(PredictError::Runtime("session exploded at node 42".to_string()))
                }
                FailingPredictor::Panic => panic!("predictor panicked"),
                FailingPredictor::Slow(delay) => {
                    std::thread::sleep(*delay);
                    Ok(vec![0.0; table.n_rows()])
                }
                FailingPredictor::ShortOutput => Ok(vec![0.0; table.n_rows().saturating_sub(1)]),
            }
        }
    }

    pub fn linear_service() -> PredictionService {
        PredictionService::from_predictor(
            Arc::new(LinearPredictor { weights: vec![2.0, 0.5], bias: 1.0 }),
            InputSchema::parse("feature1,feature2").unwrap(),
            Duration::from_secs(5),
        )
    }

    /// Sleeps in small steps until `duration` passes or the call is cancelled
    #[derive(Default)]
    pub struct CountingPredictor {
        pub duration: Duration,
        pub completed: AtomicUsize,
        pub cancelled: AtomicUsize,
    }

    impl Predictor for CountingPredictor {
        fn predict(&self, table: &Table, cancel: &CancelToken) -> Result<Vec<f64>, PredictError> {
            let started = std::time::Instant::now();
            while started.elapsed() < self.duration {
                if cancel.is_cancelled() {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Err(PredictError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.0; table.n_rows()])
        }
    }

    pub fn failing_service(predictor: FailingPredictor, timeout: Duration) -> PredictionService {
        PredictionService::from_predictor(
            Arc::new(predictor),
            InputSchema::parse("feature1,feature2").unwrap(),
            timeout,
        )
    }
}
