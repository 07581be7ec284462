// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]

mod resolver;
mod status;

pub use resolver::*;
pub use status::*;
