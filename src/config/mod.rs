// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads toolshim.yaml, validates structure, resolves `${VAR}` references
// from the environment, and builds the typed Config the server runs on.

mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::load_config;
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
