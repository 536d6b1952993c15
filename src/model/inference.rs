//! Inference Engine - ONNX Runtime Integration
//!
//! The [`Predictor`] trait is what the service calls; [`OnnxPredictor`] runs
//! an ONNX export of the model with a small pool of sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use parking_lot::{Mutex, MutexGuard};
use ort::session::{RunOptions, Session, builder::GraphOptimizationLevel};
use ort::value::Value;

use super::table::Table;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// The model cannot accept the table's shape.
    #[error("Invalid model input: {0}")]
    InvalidInput(String),
    /// The model output does not line up with the input rows.
    #[error("Model returned {actual} values for {expected} rows")]
    OutputMismatch { expected: usize, actual: usize },
    /// The caller gave up on the prediction.
    #[error("Prediction cancelled")]
    Cancelled,
    #[error("Inference failed: {0}")]
    Runtime(String),
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared between a request and the blocking prediction it started.
///
/// Cancelling terminates any ONNX Runtime run attached to the token, and
/// predictions that have not reached a session yet bail out before running.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    runs: Mutex<Vec<Arc<RunOptions>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        for run in self.inner.runs.lock().iter() {
            if let Err(e) = run.terminate() {
                tracing::warn!("Failed to terminate ONNX run: {}", e);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the token when dropped
    pub fn cancel_on_drop(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }

    /// Tie a session run to this token; terminated at once if already cancelled
    fn attach(&self, run: Arc<RunOptions>) {
        let mut runs = self.inner.runs.lock();
        if self.is_cancelled() {
            if let Err(e) = run.terminate() {
                tracing::warn!("Failed to terminate ONNX run: {}", e);
            }
        }
        runs.push(run);
    }
}

pub struct CancelGuard(CancelToken);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ============================================================================
// PREDICTOR TRAIT
// ============================================================================

/// A loaded model: one output value per input row, in row order.
///
/// Implementations are shared across request handlers and must tolerate
/// concurrent calls.
pub trait Predictor: Send + Sync {
    /// Long-running implementations should stop early once `cancel` fires.
    fn predict(&self, table: &Table, cancel: &CancelToken) -> Result<Vec<f64>, PredictError>;
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

/// How long a waiting prediction blocks on a busy session between cancel checks
const SESSION_WAIT: Duration = Duration::from_millis(10);

/// ONNX Runtime predictor.
///
/// Running a session needs exclusive access, so each session sits behind a
/// mutex and the pool size bounds how many predictions run in parallel.
pub struct OnnxPredictor {
    sessions: Vec<Mutex<Session>>,
    next: AtomicUsize,
    input_name: String,
    output_name: String,
    n_features: usize,
}

impl OnnxPredictor {
    /// Build `pool_size` sessions from serialized model bytes
    pub fn from_bytes(model_bytes: &[u8], pool_size: usize, n_features: usize) -> Result<Self, PredictError> {
        tracing::info!(
            "Loading ONNX model from memory ({} bytes, {} session(s))",
            model_bytes.len(),
            pool_size
        );

        let mut sessions = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let session = Session::builder()
                .map_err(|e| PredictError::Runtime(format!("Session builder error: {}", e)))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| PredictError::Runtime(format!("Optimization error: {}", e)))?
                .commit_from_memory(model_bytes)
                .map_err(|e| PredictError::Runtime(format!("Load from memory error: {}", e)))?;
            sessions.push(session);
        }

        let first = &sessions[0];
        if first.inputs.len() != 1 {
            return Err(PredictError::InvalidInput(format!(
                "expected a model with one tabular input, found {} inputs",
                first.inputs.len()
            )));
        }
        let input_name = first.inputs[0].name.clone();
        let output_name = first.outputs.first()
            .map(|o| o.name.clone())
            .ok_or_else(|| PredictError::Runtime("No output defined".to_string()))?;

        tracing::info!("ONNX model loaded (input: {}, output: {})", input_name, output_name);

        Ok(Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
            input_name,
            output_name,
            n_features,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Take a free session, waiting while all are busy unless cancelled
    fn acquire(&self, cancel: &CancelToken) -> Result<MutexGuard<'_, Session>, PredictError> {
        let len = self.sessions.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;

        loop {
            for offset in 0..len {
                if let Some(guard) = self.sessions[(start + offset) % len].try_lock() {
                    return Ok(guard);
                }
            }
            if cancel.is_cancelled() {
                return Err(PredictError::Cancelled);
            }
            if let Some(guard) = self.sessions[start].try_lock_for(SESSION_WAIT) {
                return Ok(guard);
            }
        }
    }
}

impl Predictor for OnnxPredictor {
    fn predict(&self, table: &Table, cancel: &CancelToken) -> Result<Vec<f64>, PredictError> {
        if table.n_columns() != self.n_features {
            return Err(PredictError::InvalidInput(format!(
                "model expects {} columns, got {}",
                self.n_features,
                table.n_columns()
            )));
        }
        if table.is_empty() {
            return Ok(Vec::new());
        }

        let start_time = std::time::Instant::now();
        let rows = table.n_rows();

        let input_tensor = Value::from_array(table.to_f32())
            .map_err(|e| PredictError::Runtime(format!("Tensor error: {}", e)))?;

        let run_options = Arc::new(RunOptions::new()
            .map_err(|e| PredictError::Runtime(format!("Run options error: {}", e)))?);
        cancel.attach(Arc::clone(&run_options));

        let mut session = self.acquire(cancel)?;
        if cancel.is_cancelled() {
            return Err(PredictError::Cancelled);
        }

        let outputs = session.run_with_options(ort::inputs![input_tensor], &*run_options)
            .map_err(|e| if cancel.is_cancelled() { PredictError::Cancelled } else { classify_run_error(e) })?;

        let output = outputs.get(&self.output_name)
            .ok_or_else(|| PredictError::Runtime("No output".to_string()))?;

        let predictions: Vec<f64> = match output.try_extract_tensor::<f32>() {
            Ok((_, data)) => data.iter().map(|v| *v as f64).collect(),
            Err(_) => output.try_extract_tensor::<f64>()
                .map_err(|e| PredictError::Runtime(format!("Extract error: {}", e)))?
                .1
                .to_vec(),
        };

        if predictions.len() != rows {
            return Err(PredictError::OutputMismatch {
                expected: rows,
                actual: predictions.len(),
            });
        }

        tracing::debug!(
            "Predicted {} rows in {} us",
            rows,
            start_time.elapsed().as_micros()
        );

        Ok(predictions)
    }
}

/// Shape errors reported by ONNX Runtime are the caller's fault
fn classify_run_error(e: ort::Error) -> PredictError {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid dimensions") || lower.contains("invalid rank") {
        PredictError::InvalidInput(message)
    } else {
        PredictError::Runtime(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InputSchema;
    use serde_json::json;

    /// `variable = 1 + 2*f1 + 0.5*f2`, input `float_input` of shape [N, 2]
    const LINEAR_REGRESSOR: &[u8] = include_bytes!("../../tests/fixtures/linear_regressor.onnx");

    fn table(payload: serde_json::Value, columns: &str) -> Table {
        Table::from_json(&payload, &InputSchema::parse(columns).unwrap()).unwrap()
    }

    #[test]
    fn test_invalid_model_bytes() {
        let result = OnnxPredictor::from_bytes(b"definitely not onnx", 1, 2);
        assert!(matches!(result, Err(PredictError::Runtime(_))));
    }

    #[test]
    fn test_onnx_predict() {
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 1, 2).unwrap();
        assert_eq!(predictor.input_name(), "float_input");

        let predictions = predictor
            .predict(&table(json!({"f1": [1, 2], "f2": [3, 4]}), "f1,f2"), &CancelToken::new())
            .unwrap();
        assert_eq!(predictions, vec![4.5, 7.0]);
    }

    #[test]
    fn test_onnx_predict_keeps_row_order() {
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 2, 2).unwrap();
        let rows: Vec<_> = (0..20).map(|i| json!({"f1": i, "f2": 2})).collect();

        let predictions = predictor
            .predict(&table(serde_json::Value::Array(rows), "f1,f2"), &CancelToken::new())
            .unwrap();

        assert_eq!(predictions.len(), 20);
        for (i, p) in predictions.iter().enumerate() {
            assert_eq!(*p, 2.0 + 2.0 * i as f64);
        }
    }

    #[test]
    fn test_onnx_wrong_column_count() {
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 1, 2).unwrap();
        let result = predictor.predict(&table(json!({"f1": [1], "f2": [2], "f3": [3]}), "f1,f2,f3"), &CancelToken::new());
        assert!(matches!(result, Err(PredictError::InvalidInput(_))));
    }

    #[test]
    fn test_onnx_schema_wider_than_model() {
        // Declared width agrees with the schema but not with the graph
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 1, 3).unwrap();
        let result = predictor.predict(&table(json!({"f1": [1], "f2": [2], "f3": [3]}), "f1,f2,f3"), &CancelToken::new());
        assert!(matches!(result, Err(PredictError::InvalidInput(_))));
    }

    #[test]
    fn test_onnx_empty_table() {
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 1, 2).unwrap();
        let predictions = predictor.predict(&table(json!([]), "f1,f2"), &CancelToken::new()).unwrap();
        assert!(predictions.is_empty());
    }

    #[test]
    fn test_cancelled_token_stops_onnx_run() {
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 1, 2).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = predictor.predict(&table(json!({"f1": [1], "f2": [2]}), "f1,f2"), &cancel);
        assert!(matches!(result, Err(PredictError::Cancelled)));
    }

    #[test]
    fn test_waiting_for_busy_session_is_cancellable() {
        let predictor = OnnxPredictor::from_bytes(LINEAR_REGRESSOR, 1, 2).unwrap();
        let _busy = predictor.sessions[0].lock();

        let cancel = CancelToken::new();
        let waiter = cancel.clone();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| predictor.predict(&table(json!({"f1": [1], "f2": [2]}), "f1,f2"), &waiter));
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
            assert!(matches!(handle.join().unwrap(), Err(PredictError::Cancelled)));
        });
    }

    #[test]
    fn test_cancel_on_drop() {
        let cancel = CancelToken::new();
        {
            let _guard = cancel.cancel_on_drop();
            assert!(!cancel.is_cancelled());
        }
        assert!(cancel.is_cancelled());
    }
}
