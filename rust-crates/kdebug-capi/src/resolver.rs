// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

use crate::{FfiResult, StatusCode};
use kdebug::boot::{BootRecord, RawBootRecord};
use kdebug::resolve::{FILE_CAPACITY, NAME_CAPACITY};
use kdebug::{KernelDebugInfo, ResolvedLocation, VirtAddr};
use std::ffi::{c_char, CStr};

/// Source location of a code address, as seen by C callers.
///
/// Both byte arrays are NUL-terminated whenever their content is shorter
/// than the array. `fn_namelen` is authoritative for `fn_name`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdebugRipInfo {
    pub file: [u8; FILE_CAPACITY],
    pub fn_name: [u8; NAME_CAPACITY],
    pub fn_namelen: u32,
    pub line: u32,
    pub fn_addr: VirtAddr,
    pub fn_narg: u32,
}

impl From<&ResolvedLocation> for KdebugRipInfo {
    fn from(loc: &ResolvedLocation) -> Self {
        Self {
            file: *loc.file.raw(),
            fn_name: *loc.function_name.raw(),
            fn_namelen: loc.function_name_len() as u32,
            line: loc.line,
            fn_addr: loc.function_entry,
            fn_narg: loc.arg_count,
        }
    }
}

/// Resolve a code address to file, line and function.
///
/// `out` is always written, even on error: fields that couldn't be
/// determined hold `"<unknown>"`, line 0 and `fn_addr == addr`.
///
/// # Safety
///
/// `record` must point to the boot record written by the boot stage, and
/// the ranges therein must stay mapped and unmodified. `out` must be valid
/// for writes. Non-zero addresses below the kernel address space abort.
#[no_mangle]
pub unsafe extern "C" fn kdebug_resolve_address(
    record: *const RawBootRecord,
    addr: VirtAddr,
    out: *mut KdebugRipInfo,
) -> StatusCode {
    if record.is_null() || out.is_null() {
        return StatusCode::NullArgument;
    }

    let kdi = KernelDebugInfo::new(BootRecord::from_raw(*record));
    let mut loc = ResolvedLocation::new(addr);
    let result: FfiResult = kdi.resolve_address(addr, &mut loc).map_err(Into::into);

    out.write(KdebugRipInfo::from(&loc));
    result.into()
}

/// Look up the entry address of the function called `name`.
///
/// Returns 0 if no such function exists or an argument is NULL. Malformed
/// debug information aborts.
///
/// # Safety
///
/// `record` as for [`kdebug_resolve_address`]. `name` must be a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn kdebug_resolve_name(
    record: *const RawBootRecord,
    name: *const c_char,
) -> VirtAddr {
    if record.is_null() || name.is_null() {
        return 0;
    }

    let name = CStr::from_ptr(name);
    KernelDebugInfo::new(BootRecord::from_raw(*record)).resolve_name(name.to_bytes())
}

/// Enable or disable diagnostic output on stderr.
#[no_mangle]
pub extern "C" fn kdebug_set_verbose(enabled: bool) {
    kdebug::dbglog::set_enabled(enabled);
}
