// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod boot;
pub mod bounded;
pub mod dbglog;
pub mod dwarf;
pub mod resolve;
pub mod symtab;

#[cfg(test)]
mod testimage;

pub use resolve::{Config, KernelDebugInfo, ResolvedLocation};

/// Type-erased error type.
///
/// Only used by host-side consumers (tools, tests) to bubble up errors from
/// several modules at once. The resolvers themselves never box errors.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Virtual address in the kernel image's address space.
pub type VirtAddr = u64;
