//! Internal helpers.

use crate::error::HandlerError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

pub(crate) use micro_ws::ensure;

/// Runs an application callback, turning a panic into an ordinary callback
/// failure so only the connection it ran for is affected.
pub(crate) fn catch_callback<T>(f: impl FnOnce() -> Result<T, HandlerError>) -> Result<T, HandlerError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panic_message(&*payload).into()))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}
