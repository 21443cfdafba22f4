//! Engine seam and the ONNX Runtime implementation behind it.
//!
//! A [`Backend`] turns model bytes into an [`Engine`]; the session layer only
//! ever talks to these two traits.

use ndarray::{ArrayD, IxDyn};
use once_cell::sync::OnceCell;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::tensor::{PrimitiveTensorElementType, TensorElementType};
use ort::value::{DynValue, Tensor, ValueType};
use std::borrow::Cow;
use std::fmt::Debug;
use tracing::{debug, warn};

use super::tensor::{Element, ElementType, SlotSpec, TensorBuffer};
use crate::config::{OptimizationLevel, SessionConfig};
use crate::error::{BridgeError, Result};
use crate::LOG_TARGET;

/// A loaded model plus the machinery to execute it.
///
/// Engines are used from one thread at a time; the registry serializes
/// access per session.
pub trait Engine: Send {
    /// Declared input slots, in model order.
    fn inputs(&self) -> &[SlotSpec];

    /// Declared output slots, in model order.
    fn outputs(&self) -> &[SlotSpec];

    /// Run one forward pass. Returns one buffer per output slot.
    fn run(&mut self, inputs: &[TensorBuffer]) -> Result<Vec<TensorBuffer>>;
}

/// Builds engines from serialized models.
pub trait Backend: Send + Sync {
    /// Parse `model` and construct an engine for it.
    fn load(&self, model: &[u8], config: &SessionConfig) -> Result<Box<dyn Engine>>;
}

/// Outcome of the one-time ONNX Runtime environment setup.
static ENVIRONMENT: OnceCell<std::result::Result<(), String>> = OnceCell::new();

/// Commit the process-wide ONNX Runtime environment on first use.
///
/// Runs inside the caller's boundary guard, so a runtime that fails to load
/// surfaces as an engine construction error. A panic leaves the cell empty
/// and the next call retries.
fn environment() -> Result<()> {
    ENVIRONMENT
        .get_or_init(|| {
            ort::init()
                .with_name(LOG_TARGET)
                .commit()
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| BridgeError::engine_build(format!("ONNX Runtime unavailable: {e}")))
}

/// Backend bound to ONNX Runtime's built-in CPU operator set.
#[derive(Debug, Default)]
pub struct OnnxBackend;

impl OnnxBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for OnnxBackend {
    fn load(&self, model: &[u8], config: &SessionConfig) -> Result<Box<dyn Engine>> {
        if model.is_empty() {
            return Err(BridgeError::model_load("model buffer is empty"));
        }
        environment()?;

        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(optimization_level(config.optimization_level)))
            .and_then(|b| b.with_intra_threads(config.num_threads))
            .map_err(|e| BridgeError::engine_build(e.to_string()))?;

        let session = builder
            .commit_from_memory(model)
            .map_err(|e| BridgeError::model_load(e.to_string()))?;

        let inputs = session
            .inputs
            .iter()
            .map(|input| slot_spec(&input.name, &input.input_type))
            .collect::<Result<Vec<_>>>()?;
        let outputs = session
            .outputs
            .iter()
            .map(|output| slot_spec(&output.name, &output.output_type))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            target: LOG_TARGET,
            inputs = inputs.len(),
            outputs = outputs.len(),
            threads = config.num_threads,
            "ONNX Runtime session committed"
        );

        Ok(Box::new(OnnxEngine {
            session,
            inputs,
            outputs,
        }))
    }
}

/// An ONNX Runtime session with its slot metadata.
pub struct OnnxEngine {
    session: Session,
    inputs: Vec<SlotSpec>,
    outputs: Vec<SlotSpec>,
}

impl Engine for OnnxEngine {
    fn inputs(&self) -> &[SlotSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[SlotSpec] {
        &self.outputs
    }

    fn run(&mut self, inputs: &[TensorBuffer]) -> Result<Vec<TensorBuffer>> {
        let feeds: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = self
            .inputs
            .iter()
            .zip(inputs)
            .map(|(spec, buffer)| Ok((Cow::Owned(spec.name.clone()), to_value(buffer)?.into())))
            .collect::<Result<_>>()?;

        let results = self
            .session
            .run(SessionInputs::from(feeds))
            .map_err(|e| BridgeError::inference(e.to_string()))?;

        self.outputs
            .iter()
            .map(|spec| {
                let value = results.get(spec.name.as_str()).ok_or_else(|| {
                    BridgeError::inference(format!("engine produced no output '{}'", spec.name))
                })?;
                from_value(value, spec.element_type)
            })
            .collect()
    }
}

fn optimization_level(level: OptimizationLevel) -> GraphOptimizationLevel {
    match level {
        OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
        OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
        OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
        OptimizationLevel::All => GraphOptimizationLevel::Level3,
    }
}

fn slot_spec(name: &str, value_type: &ValueType) -> Result<SlotSpec> {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => tensor_slot(name, *ty, shape.to_vec()),
        other => Err(BridgeError::allocation(format!(
            "slot '{name}' is not a tensor ({other:?})"
        ))),
    }
}

fn tensor_slot(name: &str, ty: TensorElementType, dims: Vec<i64>) -> Result<SlotSpec> {
    let element_type = element_type(ty).ok_or_else(|| {
        BridgeError::allocation(format!("slot '{name}' has unsupported element type {ty:?}"))
    })?;
    let spec = SlotSpec {
        name: name.to_string(),
        element_type,
        dims,
    };
    if spec.is_dynamic() {
        warn!(
            target: LOG_TARGET,
            slot = name,
            dims = ?spec.dims,
            "dynamic dimensions resolved to 1"
        );
    }
    Ok(spec)
}

fn element_type(ty: TensorElementType) -> Option<ElementType> {
    match ty {
        TensorElementType::Float32 => Some(ElementType::F32),
        TensorElementType::Uint8 => Some(ElementType::U8),
        TensorElementType::Int8 => Some(ElementType::I8),
        TensorElementType::Int32 => Some(ElementType::I32),
        TensorElementType::Int64 => Some(ElementType::I64),
        _ => None,
    }
}

fn to_value(buffer: &TensorBuffer) -> Result<DynValue> {
    match buffer.element_type() {
        ElementType::F32 => typed_value::<f32>(buffer),
        ElementType::U8 => typed_value::<u8>(buffer),
        ElementType::I8 => typed_value::<i8>(buffer),
        ElementType::I32 => typed_value::<i32>(buffer),
        ElementType::I64 => typed_value::<i64>(buffer),
    }
}

fn typed_value<T>(buffer: &TensorBuffer) -> Result<DynValue>
where
    T: Element + PrimitiveTensorElementType + Debug + Clone + 'static,
{
    let array = ArrayD::from_shape_vec(IxDyn(buffer.shape()), buffer.to_vec::<T>()?)
        .map_err(|e| BridgeError::inference(format!("Array shape error: {}", e)))?;
    let tensor = Tensor::from_array(array)
        .map_err(|e| BridgeError::inference(format!("Failed to create input tensor: {}", e)))?;
    Ok(tensor.into_dyn())
}

fn from_value(value: &DynValue, element_type: ElementType) -> Result<TensorBuffer> {
    match element_type {
        ElementType::F32 => typed_buffer::<f32>(value),
        ElementType::U8 => typed_buffer::<u8>(value),
        ElementType::I8 => typed_buffer::<i8>(value),
        ElementType::I32 => typed_buffer::<i32>(value),
        ElementType::I64 => typed_buffer::<i64>(value),
    }
}

fn typed_buffer<T>(value: &DynValue) -> Result<TensorBuffer>
where
    T: Element + PrimitiveTensorElementType + Debug + Clone + 'static,
{
    let (shape, data) = value
        .try_extract_tensor::<T>()
        .map_err(|e| BridgeError::inference(format!("Failed to extract output: {}", e)))?;
    let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    TensorBuffer::from_elements(shape, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture() -> Vec<u8> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../tests/fixtures/dense_1x4_1x2.onnx");
        std::fs::read(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
    }

    #[test]
    fn test_tensor_slot_types() {
        let spec = tensor_slot("x", TensorElementType::Float32, vec![-1, 4]).unwrap();
        assert_eq!(spec.element_type, ElementType::F32);
        assert!(spec.is_dynamic());
        assert_eq!(spec.resolved_shape(), vec![1, 4]);

        let spec = tensor_slot("ids", TensorElementType::Int64, vec![1, 8]).unwrap();
        assert_eq!(spec.element_type, ElementType::I64);

        for ty in [TensorElementType::String, TensorElementType::Bool, TensorElementType::Float16] {
            let err = tensor_slot("s", ty, vec![1]).unwrap_err();
            assert!(matches!(err, BridgeError::Allocation(_)), "{ty:?}");
        }
    }

    #[test]
    fn test_non_tensor_slot_rejected() {
        let map = ValueType::Map {
            key: TensorElementType::Int64,
            value: TensorElementType::Float32,
        };
        let err = slot_spec("m", &map).unwrap_err();
        assert!(matches!(err, BridgeError::Allocation(_)));
        assert!(err.to_string().contains("not a tensor"));
    }

    #[test]
    fn test_empty_model_rejected_before_runtime_setup() {
        let backend = OnnxBackend::new();
        let err = backend.load(&[], &SessionConfig::default()).err().unwrap();
        assert!(matches!(err, BridgeError::ModelLoad(_)));
    }

    #[test]
    fn test_onnx_engine_dense_fixture() {
        let mut engine = OnnxBackend::new()
            .load(&fixture(), &SessionConfig::default())
            .unwrap();
        assert_eq!(engine.inputs()[0].dims, vec![1, 4]);
        assert_eq!(engine.outputs()[0].dims, vec![1, 2]);
        assert_eq!(engine.outputs()[0].element_type, ElementType::F32);

        let x = TensorBuffer::from_elements(vec![1, 4], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let results = engine.run(&[x]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].shape(), &[1, 2]);
        assert_eq!(results[0].to_vec::<f32>().unwrap(), vec![4.0, 6.0]);
    }

    #[test]
    fn test_onnx_backend_rejects_garbage() {
        let err = OnnxBackend::new()
            .load(b"not an onnx model", &SessionConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::ModelLoad(_)));
    }
}
