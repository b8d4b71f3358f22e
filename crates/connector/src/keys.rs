// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Private key lookup

use std::path::{Path, PathBuf};

use tracing::debug;

use ssh_connector_common::KEY_FILE_NAME;

/// Ordered search for the tunnel private key.
///
/// Candidates, first existing file wins:
/// 1. explicit override directory
/// 2. current working directory
/// 3. the connector's config directory
/// 4. `~/.ssh/tunnel_key`
#[derive(Debug, Clone, Default)]
pub struct KeyLocator {
    override_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    default_path: Option<PathBuf>,
}

impl KeyLocator {
    /// Locator using the process working directory and `~/.ssh`
    pub fn new(config_dir: Option<PathBuf>) -> Self {
        Self {
            override_dir: None,
            working_dir: std::env::current_dir().ok(),
            config_dir,
            default_path: default_key_path(),
        }
    }

    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_default_path(mut self, path: Option<PathBuf>) -> Self {
        self.default_path = path;
        self
    }

    /// Every path that is checked, in order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let dirs = [&self.override_dir, &self.working_dir, &self.config_dir];
        dirs.into_iter()
            .flatten()
            .map(|dir| dir.join(KEY_FILE_NAME))
            .chain(self.default_path.clone())
            .collect()
    }

    /// First candidate that exists as a regular file
    pub fn resolve(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|path| {
            let found = is_file(path);
            debug!("Key candidate {}: {}", path.display(), if found { "found" } else { "missing" });
            found
        })
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

/// `~/.ssh/tunnel_key`
pub fn default_key_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join(KEY_FILE_NAME))
}
