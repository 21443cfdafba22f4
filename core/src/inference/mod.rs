//! Inference sessions.
//!
//! This module wraps the native inference library behind the [`Engine`] and
//! [`Backend`] traits and manages the slot buffers copied across the C
//! boundary.

mod engine;
mod session;
mod tensor;

pub use engine::{Backend, Engine, OnnxBackend, OnnxEngine};
pub use session::Session;
pub use tensor::{Element, ElementType, SlotKind, SlotSpec, TensorBuffer};

#[cfg(test)]
pub(crate) use session::testing;
