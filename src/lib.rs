// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod engine;
pub mod format;
pub mod message;
pub mod nonstream;
pub mod proxy;
pub mod stream;
pub mod toolcall;
