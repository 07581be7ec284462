// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Defines FFI error codes and their conversion from Rust error types.

use kdebug::dwarf;

pub type FfiResult<T = ()> = Result<T, StatusCode>;

/// Error codes exposed to the C API.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum StatusCode {
    #[error("OK: not actually an error")]
    Ok = 0,

    #[error("No debug information for the requested item")]
    NotFound = 1,

    #[error("Malformed debug information")]
    Malformed = 2,

    #[error("Required pointer argument was NULL")]
    NullArgument = 3,
}

impl From<StatusCode> for FfiResult {
    fn from(code: StatusCode) -> Self {
        if code == StatusCode::Ok {
            Ok(())
        } else {
            Err(code)
        }
    }
}

impl From<FfiResult> for StatusCode {
    fn from(result: FfiResult) -> Self {
        match result {
            Ok(()) => StatusCode::Ok,
            Err(e) => e,
        }
    }
}

impl From<dwarf::Error> for StatusCode {
    fn from(e: dwarf::Error) -> Self {
        if e.is_not_found() {
            Self::NotFound
        } else {
            Self::Malformed
        }
    }
}
