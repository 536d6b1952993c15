//! MLmodel descriptor - the YAML file MLflow writes into every model directory
//!
//! ```yaml
//! flavors:
//!   onnx:
//!     data: model.onnx
//!     onnx_version: 1.16.0
//! signature:
//!   inputs: '[{"type": "double", "name": "feature1", "required": true}]'
//!   outputs: '[{"type": "tensor", "tensor-spec": {"dtype": "float32", "shape": [-1, 1]}}]'
//! ```
//!
//! Only the parts the server acts on are typed; everything else is ignored.

use std::collections::HashMap;

use serde::Deserialize;

/// File name of the descriptor inside the model directory
pub const MLMODEL_FILE_NAME: &str = "MLmodel";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MlModel {
    #[serde(default)]
    pub flavors: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub signature: Option<ModelSignature>,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// Signature columns, kept as the JSON strings MLflow stores them as
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSignature {
    #[serde(default)]
    pub inputs: Option<String>,
    #[serde(default)]
    pub outputs: Option<String>,
}

impl MlModel {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(bytes)
    }

    pub fn has_flavor(&self, name: &str) -> bool {
        self.flavors.contains_key(name)
    }

    /// ONNX file of the `onnx` flavor, relative to the model directory
    pub fn onnx_data(&self) -> Option<&str> {
        self.flavors.get("onnx")?.get("data")?.as_str()
    }

    pub fn input_signature(&self) -> Option<&str> {
        self.signature.as_ref()?.inputs.as_deref()
    }
}
