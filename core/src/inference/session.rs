//! One live inference session: an engine plus the slot buffers it reads and
//! writes.

use tracing::debug;

use super::engine::{Backend, Engine};
use super::tensor::{Element, ElementType, SlotKind, TensorBuffer};
use crate::config::SessionConfig;
use crate::error::{BridgeError, Result};
use crate::LOG_TARGET;

/// A loaded model with its allocated input and output slots.
pub struct Session {
    engine: Box<dyn Engine>,
    inputs: Vec<TensorBuffer>,
    outputs: Vec<TensorBuffer>,
    num_threads: usize,
}

impl Session {
    /// Parse `model`, build its engine and allocate every slot.
    pub fn create(backend: &dyn Backend, model: &[u8], config: &SessionConfig) -> Result<Self> {
        let engine = backend.load(model, config)?;
        Self::with_engine(engine, config.num_threads)
    }

    /// Allocate slots for an already constructed engine.
    pub fn with_engine(engine: Box<dyn Engine>, num_threads: usize) -> Result<Self> {
        let inputs = engine
            .inputs()
            .iter()
            .map(TensorBuffer::allocate)
            .collect::<Result<Vec<_>>>()?;
        let outputs = engine
            .outputs()
            .iter()
            .map(TensorBuffer::allocate)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            engine,
            inputs,
            outputs,
            num_threads,
        })
    }

    /// Thread-count hint the engine was built with.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Look up a slot buffer, bounds-checking the index.
    pub fn slot(&self, kind: SlotKind, index: i32) -> Result<&TensorBuffer> {
        let slots = match kind {
            SlotKind::Input => &self.inputs,
            SlotKind::Output => &self.outputs,
        };
        usize::try_from(index)
            .ok()
            .and_then(|i| slots.get(i))
            .ok_or(BridgeError::InvalidIndex {
                kind,
                index,
                count: slots.len(),
            })
    }

    fn input_mut(&mut self, index: i32) -> Result<&mut TensorBuffer> {
        let count = self.inputs.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.inputs.get_mut(i))
            .ok_or(BridgeError::InvalidIndex {
                kind: SlotKind::Input,
                index,
                count,
            })
    }

    /// Copy `length` elements of `data` into input slot `index`.
    pub fn set_input<T: Element>(&mut self, index: i32, data: &[T], length: i32) -> Result<()> {
        self.input_mut(index)?.write_prefix(data, length)
    }

    /// Copy `length` elements of output slot `index` into `dest`.
    pub fn get_output<T: Element>(&self, index: i32, dest: &mut [T], length: i32) -> Result<()> {
        self.slot(SlotKind::Output, index)?.read_prefix(dest, length)
    }

    /// Run the forward pass over the current input slots.
    ///
    /// Output slots are replaced only when the engine returns a full,
    /// well-typed result set.
    pub fn invoke(&mut self) -> Result<()> {
        let results = self.engine.run(&self.inputs)?;
        if results.len() != self.outputs.len() {
            return Err(BridgeError::inference(format!(
                "engine returned {} outputs, model declares {}",
                results.len(),
                self.outputs.len()
            )));
        }
        if let Some((index, (got, want))) = results
            .iter()
            .zip(&self.outputs)
            .enumerate()
            .find(|(_, (got, want))| got.element_type() != want.element_type())
        {
            return Err(BridgeError::inference(format!(
                "output {} has type {}, expected {}",
                index,
                got.element_type(),
                want.element_type()
            )));
        }
        self.outputs = results;
        debug!(target: LOG_TARGET, outputs = self.outputs.len(), "invoke complete");
        Ok(())
    }

    /// Copy slot extents into `dest`, truncating to its length.
    ///
    /// Returns the number of entries written.
    pub fn copy_shape(&self, kind: SlotKind, index: i32, dest: &mut [i32]) -> Result<usize> {
        let shape = self.slot(kind, index)?.shape();
        let written = shape.len().min(dest.len());
        for (out, &extent) in dest.iter_mut().zip(&shape[..written]) {
            *out = i32::try_from(extent).unwrap_or(i32::MAX);
        }
        Ok(written)
    }

    pub fn rank(&self, kind: SlotKind, index: i32) -> Result<usize> {
        Ok(self.slot(kind, index)?.rank())
    }

    pub fn element_type(&self, kind: SlotKind, index: i32) -> Result<ElementType> {
        Ok(self.slot(kind, index)?.element_type())
    }
}
