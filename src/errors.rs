//! Generic error handling primitives
//!
//! This is where low-level reporting of operating system errors is
//! implemented. Higher-level modules translate the raw errors emitted here
//! into context-specific error types where the failure modes are documented.

use errno::Errno;
use std::ffi::c_int;
use thiserror::Error;

/// Do something with errno checking
///
/// Call a user-provided callback, which tells if symptoms of an OS-side error
/// were observed. If so, check for appearance of nonzero errno values and
/// report them.
///
/// When this function returns, errno is back to the state where it was before
/// the user callback was invoked.
fn check_errno<R>(callback: impl FnOnce() -> (R, bool)) -> (R, Option<Errno>) {
    let old_errno = errno::errno();
    errno::set_errno(Errno(0));

    let (result, should_check_errno) = callback();

    let mut new_errno = None;
    if should_check_errno {
        let errno = errno::errno();
        if errno != Errno(0) {
            new_errno = Some(errno);
        }
    }
    errno::set_errno(old_errno);

    (result, new_errno)
}

/// Raw error emitted by a system call that follows the usual convention
///
/// System calls that return an `int` error out by returning -1, and report
/// additional detail through errno.
#[derive(Copy, Clone, Debug, Error, Eq, Hash, PartialEq)]
#[error("system call {api} failed with errno {errno:?}")]
pub struct RawOsError {
    /// System call that failed
    pub api: &'static str,

    /// Observed errno value, if errno was set
    pub errno: Option<Errno>,
}

/// Call a system call that returns an `int` where -1 signals failure
///
/// # Errors
///
/// [`RawOsError`] if the call returned -1
pub(crate) fn call_libc_int(
    api: &'static str,
    call: impl FnOnce() -> c_int,
) -> Result<c_int, RawOsError> {
    let (result, errno) = check_errno(|| {
        let result = call();
        (result, result == -1)
    });
    if result == -1 {
        Err(RawOsError { api, errno })
    } else {
        Ok(result)
    }
}
