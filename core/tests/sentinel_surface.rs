//! Sentinel queries issued before any session exists. Runs in its own test
//! binary so these are the first bridge calls the process makes.

use inference_bridge::ffi::*;
use inference_bridge::{Status, NO_SESSION};

#[test]
fn sentinel_queries_before_any_create() {
    ib_destroy(NO_SESSION);
    assert_eq!(ib_get_input_count(NO_SESSION), 0);
    assert_eq!(ib_get_output_count(NO_SESSION), 0);
    assert_eq!(ib_get_input_rank(NO_SESSION, 0), 0);
    assert_eq!(ib_get_output_type(NO_SESSION, 0), 0);

    let mut dims = [9i32; 2];
    unsafe {
        ib_get_input_shape(NO_SESSION, 0, dims.as_mut_ptr(), 2);
        ib_get_output_shape(NO_SESSION, 0, dims.as_mut_ptr(), 2);
    }
    assert_eq!(dims, [9, 9]);
    assert!(ib_last_error().is_null());

    assert_eq!(ib_invoke(NO_SESSION), Status::InvalidHandle.code());
    assert!(!ib_last_error().is_null());
    assert!(registry().is_empty());
}
