// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use super::error::ConfigError;

/// Where the gateway's YAML comes from.
///
/// `FileSource` reads `toolshim.yaml` (or whatever `--config` names);
/// `StringSource` hands content over directly so tests skip file I/O.
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// Config file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        tracing::debug!(path = %self.path.display(), "reading config file");
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// In-memory config content.
pub struct StringSource {
    pub content: String,
}

impl StringSource {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}
