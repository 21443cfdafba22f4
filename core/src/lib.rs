//! inference-bridge: ONNX Runtime inference sessions behind a C ABI.
//!
//! Managed runtimes (game engines, JVMs, .NET hosts) cannot hold Rust objects
//! directly. This crate keeps every loaded model in a process-wide registry
//! and hands the host an opaque `int64_t` handle instead. The host copies
//! input samples in, runs the model, and copies outputs back out; every
//! failure is reported as a sentinel handle, a negative status, or a zero
//! count, never as a panic crossing the boundary.
//!
//! # C usage
//!
//! ```c
//! ib_init(NULL);
//! int64_t h = ib_create(model_bytes, model_len);
//! if (h == 0) { fprintf(stderr, "%s\n", ib_last_error()); return 1; }
//!
//! float x[4] = {1, 2, 3, 4};
//! float y[2];
//! ib_set_input(h, 0, x, 4);
//! ib_invoke(h);
//! ib_get_output(h, 0, y, 2);
//! ib_destroy(h);
//! ```
//!
//! # Rust usage
//!
//! ```ignore
//! use inference_bridge::{OnnxBackend, Registry, NO_SESSION};
//!
//! let registry = Registry::new(Box::new(OnnxBackend::new()));
//! let handle = registry.create(&std::fs::read("model.onnx")?);
//! assert_ne!(handle, NO_SESSION);
//! registry.set_input(handle, 0, &[1.0, 2.0, 3.0, 4.0], 4);
//! registry.invoke(handle);
//! let mut y = [0.0f32; 2];
//! registry.get_output(handle, 0, &mut y, 2);
//! registry.destroy(handle);
//! ```
//!
//! # Building
//!
//! ```bash
//! cargo build --release
//! ```
//!
//! produces `libinference_bridge.{so,dylib}` / `inference_bridge.dll`, a
//! static archive, and the header `core/include/inference_bridge.h`.

pub mod cli;
pub mod config;
pub mod error;
pub mod ffi;
pub mod inference;
pub mod logging;
pub mod registry;

/// Target used by every tracing event the bridge emits.
pub const LOG_TARGET: &str = "inference_bridge";

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use config::{Config, SessionConfig};
pub use error::{BridgeError, Result, Status};
pub use inference::{Backend, ElementType, Engine, OnnxBackend, Session, SlotKind};
pub use registry::{Registry, NO_SESSION};
