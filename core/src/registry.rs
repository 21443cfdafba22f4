//! Handle registry: opaque integer tokens mapped to owned sessions.
//!
//! Every public method here is a boundary operation. It never panics and
//! never returns a structured error; failures become the operation's
//! documented signal (sentinel handle, negative status, zero, or no-op), are
//! logged, and are stored as the thread's last error.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::error::{self, BridgeError, Result, Status};
use crate::inference::{Backend, Element, Session, SlotKind};
use crate::LOG_TARGET;

/// Handle value that never names a session.
pub const NO_SESSION: i64 = 0;

type SharedSession = Arc<Mutex<Session>>;

/// Owns every live session and hands out tokens for them.
///
/// Tokens come from a monotonic counter and are never reused, so a stale or
/// doubly destroyed handle is simply unknown rather than dangling.
pub struct Registry {
    backend: Box<dyn Backend>,
    config: RwLock<SessionConfig>,
    sessions: Mutex<HashMap<i64, SharedSession>>,
    next_handle: AtomicI64,
}

impl Registry {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            config: RwLock::new(SessionConfig::default()),
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicI64::new(1),
        }
    }

    /// Replace the settings applied to sessions created from now on.
    pub fn configure(&self, config: SessionConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Settings currently applied at create.
    pub fn session_config(&self) -> SessionConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a model and return its handle, or [`NO_SESSION`] on failure.
    pub fn create(&self, model: &[u8]) -> i64 {
        guarded("create", || {
            let config = self.session_config();
            let session = Session::create(self.backend.as_ref(), model, &config)?;
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            self.sessions()
                .insert(handle, Arc::new(Mutex::new(session)));
            info!(
                target: LOG_TARGET,
                handle,
                threads = config.num_threads,
                "interpreter created"
            );
            Ok(handle)
        })
        .unwrap_or(NO_SESSION)
    }

    /// Release a session. Unknown handles, including the sentinel, are ignored.
    pub fn destroy(&self, handle: i64) {
        let _ = guarded("destroy", || {
            if handle == NO_SESSION {
                return Ok(());
            }
            match self.sessions().remove(&handle) {
                Some(_) => info!(target: LOG_TARGET, handle, "interpreter destroyed"),
                None => debug!(target: LOG_TARGET, handle, "destroy of unknown handle ignored"),
            }
            Ok(())
        });
    }

    /// Copy `length` floats into input slot `index`.
    pub fn set_input(&self, handle: i64, index: i32, data: &[f32], length: i32) -> i32 {
        self.set_input_elements("set_input", handle, index, data, length)
    }

    /// Copy `length` raw bytes into input slot `index`.
    pub fn set_input_bytes(&self, handle: i64, index: i32, data: &[u8], length: i32) -> i32 {
        self.set_input_elements("set_input_bytes", handle, index, data, length)
    }

    /// Run the forward pass.
    pub fn invoke(&self, handle: i64) -> i32 {
        status(guarded("invoke", || {
            let session = self.session(handle)?;
            let mut session = lock(&session);
            session.invoke()
        }))
    }

    /// Copy `length` floats from output slot `index` into `dest`.
    pub fn get_output(&self, handle: i64, index: i32, dest: &mut [f32], length: i32) -> i32 {
        self.get_output_elements("get_output", handle, index, dest, length)
    }

    /// Copy `length` raw bytes from output slot `index` into `dest`.
    pub fn get_output_bytes(&self, handle: i64, index: i32, dest: &mut [u8], length: i32) -> i32 {
        self.get_output_elements("get_output_bytes", handle, index, dest, length)
    }

    /// Number of input slots; zero when the handle names no session.
    pub fn input_count(&self, handle: i64) -> i32 {
        self.count(handle, Session::input_count)
    }

    /// Number of output slots; zero when the handle names no session.
    pub fn output_count(&self, handle: i64) -> i32 {
        self.count(handle, Session::output_count)
    }

    /// Fill `dest` with the extents of a slot, truncated to `dest.len()`.
    ///
    /// Silent on failure: `dest` is left untouched. Returns entries written.
    pub fn copy_shape(&self, handle: i64, kind: SlotKind, index: i32, dest: &mut [i32]) -> usize {
        if handle == NO_SESSION {
            return on_sentinel(0);
        }
        guarded("copy_shape", || {
            let session = self.session(handle)?;
            let session = lock(&session);
            session.copy_shape(kind, index, dest)
        })
        .unwrap_or(0)
    }

    /// Rank of a slot; zero when the handle or index is unknown.
    pub fn rank(&self, handle: i64, kind: SlotKind, index: i32) -> i32 {
        if handle == NO_SESSION {
            return on_sentinel(0);
        }
        guarded("rank", || {
            let session = self.session(handle)?;
            let session = lock(&session);
            session.rank(kind, index)
        })
        .map_or(0, saturate)
    }

    /// Element type code of a slot; zero when the handle or index is unknown.
    pub fn element_type(&self, handle: i64, kind: SlotKind, index: i32) -> i32 {
        if handle == NO_SESSION {
            return on_sentinel(0);
        }
        guarded("element_type", || {
            let session = self.session(handle)?;
            let session = lock(&session);
            session.element_type(kind, index)
        })
        .map_or(0, |ty| ty.code())
    }

    fn set_input_elements<T: Element>(
        &self,
        op: &'static str,
        handle: i64,
        index: i32,
        data: &[T],
        length: i32,
    ) -> i32 {
        status(guarded(op, || {
            let session = self.session(handle)?;
            let mut session = lock(&session);
            session.set_input(index, data, length)
        }))
    }

    fn get_output_elements<T: Element>(
        &self,
        op: &'static str,
        handle: i64,
        index: i32,
        dest: &mut [T],
        length: i32,
    ) -> i32 {
        status(guarded(op, || {
            let session = self.session(handle)?;
            let session = lock(&session);
            session.get_output(index, dest, length)
        }))
    }

    fn count(&self, handle: i64, f: fn(&Session) -> usize) -> i32 {
        if handle == NO_SESSION {
            return on_sentinel(0);
        }
        guarded("count", || {
            let session = self.session(handle)?;
            let session = lock(&session);
            Ok(f(&session))
        })
        .map_or(0, saturate)
    }

    fn session(&self, handle: i64) -> Result<SharedSession> {
        if handle == NO_SESSION {
            return Err(BridgeError::InvalidHandle(handle));
        }
        self.sessions()
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::InvalidHandle(handle))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<i64, SharedSession>> {
        lock(&self.sessions)
    }
}

/// A panic mid-operation must not brick the handle, so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Answer for a query on [`NO_SESSION`]. No lookup and no log, but the
/// thread's last error is still reset like any other bridge call.
pub(crate) fn on_sentinel<T>(value: T) -> T {
    error::clear_last_error();
    value
}

fn saturate(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

pub(crate) fn status(result: Result<()>) -> i32 {
    match result {
        Ok(()) => Status::Ok.code(),
        Err(e) => e.status().code(),
    }
}

/// Run one boundary operation, converting errors and panics into a logged
/// `Err` and recording it as the thread's last error.
pub(crate) fn guarded<T>(op: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    error::clear_last_error();
    let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(BridgeError::Panic(panic_message(payload.as_ref()))),
    };
    if let Err(e) = &result {
        error!(target: LOG_TARGET, op, status = e.status().code(), "{}", e);
        error::set_last_error(e);
    }
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::last_error_message;
    use crate::inference::testing::DenseBackend;

    fn registry() -> Registry {
        Registry::new(Box::new(DenseBackend))
    }

    #[test]
    fn test_create_and_destroy() {
        let reg = registry();
        let handle = reg.create(b"dense");
        assert_ne!(handle, NO_SESSION);
        assert_eq!(reg.len(), 1);
        reg.destroy(handle);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_create_failure_returns_sentinel() {
        let reg = registry();
        assert_eq!(reg.create(b"not a model"), NO_SESSION);
        assert!(reg.is_empty());
        assert!(last_error_message().unwrap().contains("Model loading failed"));
    }

    #[test]
    fn test_create_panic_is_contained() {
        let reg = registry();
        assert_eq!(reg.create(b"panic"), NO_SESSION);
        assert!(reg.is_empty());
        assert!(last_error_message().unwrap().contains("backend exploded"));
    }

    #[test]
    fn test_create_allocation_failure() {
        let reg = registry();
        assert_eq!(reg.create(b"huge"), NO_SESSION);
        assert!(reg.is_empty());
        assert!(last_error_message()
            .unwrap()
            .contains("Tensor allocation failed"));
    }

    #[test]
    fn test_output_shape_refreshed_after_invoke() {
        let reg = registry();
        let handle = reg.create(b"dynamic");
        let mut dims = [0i32; 2];
        assert_eq!(reg.copy_shape(handle, SlotKind::Output, 0, &mut dims), 2);
        assert_eq!(dims, [1, 1]);

        let mut out = [0.0f32; 2];
        assert_eq!(reg.get_output(handle, 0, &mut out, 2), Status::InvalidBuffer.code());

        assert_eq!(reg.set_input(handle, 0, &[1.0, 2.0, 3.0, 4.0], 4), 0);
        assert_eq!(reg.invoke(handle), 0);
        assert_eq!(reg.copy_shape(handle, SlotKind::Output, 0, &mut dims), 2);
        assert_eq!(dims, [1, 2]);
        assert_eq!(reg.get_output(handle, 0, &mut out, 2), 0);
        assert_eq!(out, [4.0, 6.0]);
        reg.destroy(handle);
    }

    #[test]
    fn test_sentinel_queries_clear_last_error() {
        let reg = registry();
        assert_eq!(reg.invoke(NO_SESSION), Status::InvalidHandle.code());
        assert!(last_error_message().is_some());
        assert_eq!(reg.output_count(NO_SESSION), 0);
        assert!(last_error_message().is_none());

        assert_eq!(reg.invoke(NO_SESSION), Status::InvalidHandle.code());
        assert_eq!(reg.rank(NO_SESSION, SlotKind::Input, 0), 0);
        assert!(last_error_message().is_none());
    }

    #[test]
    fn test_repeated_cycles_leave_registry_empty() {
        let reg = registry();
        for _ in 0..32 {
            assert_eq!(reg.create(b"bogus"), NO_SESSION);
            let handle = reg.create(b"dense");
            reg.destroy(handle);
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn test_handles_are_unique_and_not_reused() {
        let reg = registry();
        let a = reg.create(b"dense");
        reg.destroy(a);
        let b = reg.create(b"dense");
        assert_ne!(a, b);
        assert_eq!(reg.invoke(a), Status::InvalidHandle.code());
        reg.destroy(b);
    }

    #[test]
    fn test_destroy_sentinel_and_double_destroy() {
        let reg = registry();
        reg.destroy(NO_SESSION);
        let handle = reg.create(b"dense");
        reg.destroy(handle);
        reg.destroy(handle);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_sentinel_operations() {
        let reg = registry();
        let mut out = [0.0f32; 2];
        assert_eq!(reg.set_input(NO_SESSION, 0, &[1.0], 1), Status::InvalidHandle.code());
        assert_eq!(reg.invoke(NO_SESSION), Status::InvalidHandle.code());
        assert_eq!(reg.get_output(NO_SESSION, 0, &mut out, 2), Status::InvalidHandle.code());
        assert_eq!(reg.input_count(NO_SESSION), 0);
        assert_eq!(reg.output_count(NO_SESSION), 0);
        assert_eq!(reg.rank(NO_SESSION, SlotKind::Input, 0), 0);
        assert_eq!(reg.element_type(NO_SESSION, SlotKind::Output, 0), 0);

        let mut dims = [-7i32; 2];
        assert_eq!(reg.copy_shape(NO_SESSION, SlotKind::Output, 0, &mut dims), 0);
        assert_eq!(dims, [-7, -7]);
    }

    #[test]
    fn test_concrete_scenario_is_deterministic() {
        let reg = registry();
        let handle = reg.create(b"dense");
        assert_eq!(reg.input_count(handle), 1);
        assert_eq!(reg.output_count(handle), 1);

        for _ in 0..3 {
            assert_eq!(reg.set_input(handle, 0, &[1.0, 2.0, 3.0, 4.0], 4), 0);
            assert_eq!(reg.invoke(handle), 0);
            let mut out = [0.0f32; 2];
            assert_eq!(reg.get_output(handle, 0, &mut out, 2), 0);
            assert_eq!(out, [4.0, 6.0]);
        }
        reg.destroy(handle);
    }

    #[test]
    fn test_out_of_range_index_mutates_nothing() {
        let reg = registry();
        let handle = reg.create(b"dense");
        assert_eq!(reg.set_input(handle, 0, &[1.0, 2.0, 3.0, 4.0], 4), 0);
        assert_eq!(reg.invoke(handle), 0);

        assert_eq!(
            reg.set_input(handle, 1, &[9.0, 9.0, 9.0, 9.0], 4),
            Status::InvalidIndex.code()
        );
        let mut out = [-1.0f32; 2];
        assert_eq!(reg.get_output(handle, 3, &mut out, 2), Status::InvalidIndex.code());
        assert_eq!(out, [-1.0, -1.0]);

        // Input slot 0 still holds the original values.
        assert_eq!(reg.invoke(handle), 0);
        assert_eq!(reg.get_output(handle, 0, &mut out, 2), 0);
        assert_eq!(out, [4.0, 6.0]);
        reg.destroy(handle);
    }

    #[test]
    fn test_oversized_lengths_fail() {
        let reg = registry();
        let handle = reg.create(b"dense");
        let data = [1.0f32; 8];
        assert_eq!(reg.set_input(handle, 0, &data, 8), Status::InvalidBuffer.code());
        assert_eq!(reg.set_input(handle, 0, &data, -1), Status::InvalidBuffer.code());

        assert_eq!(reg.invoke(handle), 0);
        let mut out = [5.0f32; 4];
        assert_eq!(reg.get_output(handle, 0, &mut out, 4), Status::InvalidBuffer.code());
        assert_eq!(out, [5.0; 4]);
        reg.destroy(handle);
    }

    #[test]
    fn test_engine_failure_status() {
        let reg = registry();
        let handle = reg.create(b"dense");
        assert_eq!(reg.set_input(handle, 0, &[f32::NAN], 1), 0);
        assert_eq!(reg.invoke(handle), Status::Engine.code());
        reg.destroy(handle);
    }

    #[test]
    fn test_byte_input_is_copied_verbatim() {
        let reg = registry();
        let handle = reg.create(b"dense");
        let bytes: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        assert_eq!(reg.set_input_bytes(handle, 0, &bytes, 16), 0);
        assert_eq!(reg.invoke(handle), 0);

        let mut raw = [0u8; 8];
        assert_eq!(reg.get_output_bytes(handle, 0, &mut raw, 8), 0);
        let y: Vec<f32> = raw
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(y, vec![4.0, 6.0]);
        reg.destroy(handle);
    }

    #[test]
    fn test_shape_introspection() {
        let reg = registry();
        let handle = reg.create(b"dense");
        assert_eq!(reg.rank(handle, SlotKind::Input, 0), 2);
        assert_eq!(reg.element_type(handle, SlotKind::Input, 0), 1);
        assert_eq!(reg.rank(handle, SlotKind::Input, 4), 0);

        let mut short = [0i32; 1];
        assert_eq!(reg.copy_shape(handle, SlotKind::Output, 0, &mut short), 1);
        assert_eq!(short, [1]);

        let mut dims = [0i32; 4];
        assert_eq!(reg.copy_shape(handle, SlotKind::Input, 0, &mut dims), 2);
        assert_eq!(dims, [1, 4, 0, 0]);
        reg.destroy(handle);
    }

    #[test]
    fn test_configure_applies_to_new_sessions() {
        let reg = registry();
        reg.configure(SessionConfig {
            num_threads: 2,
            ..SessionConfig::default()
        });
        assert_eq!(reg.session_config().num_threads, 2);
        let handle = reg.create(b"dense");
        let session = reg.session(handle).unwrap();
        assert_eq!(lock(&session).num_threads(), 2);
        reg.destroy(handle);
    }

    #[test]
    fn test_sessions_usable_across_threads() {
        let reg = Arc::new(registry());
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let handle = reg.create(b"dense");
                    let x = i as f32;
                    assert_eq!(reg.set_input(handle, 0, &[x, x, x, x], 4), 0);
                    assert_eq!(reg.invoke(handle), 0);
                    let mut out = [0.0f32; 2];
                    assert_eq!(reg.get_output(handle, 0, &mut out, 2), 0);
                    reg.destroy(handle);
                    out
                })
            })
            .collect();
        for (i, worker) in workers.into_iter().enumerate() {
            let x = i as f32;
            assert_eq!(worker.join().unwrap(), [2.0 * x, 2.0 * x]);
        }
        assert!(reg.is_empty());
    }
}
