//! Last-error tracking for the operation surface.
//!
//! Failed operations record their error in thread-local storage so that
//! embedders working with numeric codes can retrieve the message of the
//! most recent failure.

use std::cell::RefCell;

use keyfort_common::{Error, Result};

thread_local! {
    static LAST_ERROR: RefCell<Option<(i64, String)>> = const { RefCell::new(None) };
}

/// Record an error for the current thread and return its code.
pub fn set_last_error(error: &Error) -> i64 {
    let code = error.code();
    tracing::error!(code, "{}", error);
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, error.to_string()));
    });
    code
}

/// The code and message of the most recent error on this thread.
///
/// Returns `(0, None)` when no error has been recorded.
pub fn get_current_error() -> (i64, Option<String>) {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some((code, message)) => (*code, Some(message.clone())),
        None => (0, None),
    })
}

/// Clear the recorded error for the current thread.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Record any error in a result before passing it through.
pub(crate) fn track<T>(result: Result<T>) -> Result<T> {
    if let Err(error) = &result {
        set_last_error(error);
    }
    result
}
