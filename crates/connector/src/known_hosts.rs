// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// SSH Connector - Known Hosts Module
// Trust-on-first-use store for the endpoint's host key (OpenSSH known_hosts format)

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Name of the known_hosts file inside the config directory
pub const KNOWN_HOSTS_FILE_NAME: &str = "known_hosts";

/// A server host key in SSH wire encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    key_type: String,
    key_data: String,
    fingerprint: String,
}

impl HostKey {
    /// Build from the SSH wire encoding (`string algorithm` followed by key fields)
    pub fn from_wire(bytes: &[u8]) -> Self {
        Self {
            key_type: algorithm_name(bytes),
            key_data: STANDARD.encode(bytes),
            fingerprint: fingerprint(bytes),
        }
    }

    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// `SHA256:...` fingerprint, as printed by `ssh-keygen -l`
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResult {
    /// Host key is in known_hosts and matches
    Trusted,
    /// Host key is not in known_hosts (first connection)
    Unknown,
    /// Host key is in known_hosts but doesn't match
    Mismatch {
        expected_fingerprint: String,
        actual_fingerprint: String,
        line_number: usize,
    },
}

/// A single entry in the known_hosts file
#[derive(Debug, Clone)]
struct KnownHostEntry {
    /// Host pattern (e.g., "example.com" or "[example.com]:2222")
    host_pattern: String,
    key_type: String,
    /// Base64-encoded public key
    key_data: String,
    comment: Option<String>,
    /// Line number in file (for error reporting)
    line_number: usize,
}

impl KnownHostEntry {
    /// Parse a single line from known_hosts file
    fn parse(line: &str, line_number: usize) -> Option<Self> {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        // Format: host_pattern key_type key_data [comment]
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            warn!("Invalid known_hosts entry at line {}: too few fields", line_number);
            return None;
        }

        Some(KnownHostEntry {
            host_pattern: parts[0].to_string(),
            key_type: parts[1].to_string(),
            key_data: parts[2].to_string(),
            comment: parts.get(3).map(|s| s.to_string()),
            line_number,
        })
    }

    fn format(&self) -> String {
        match &self.comment {
            Some(comment) => format!("{} {} {} {}", self.host_pattern, self.key_type, self.key_data, comment),
            None => format!("{} {} {}", self.host_pattern, self.key_type, self.key_data),
        }
    }

    fn matches(&self, host: &str, port: u16) -> bool {
        self.host_pattern == format_host_pattern(host, port)
            || (port == 22 && self.host_pattern == host)
    }

    fn verify_key(&self, key: &HostKey) -> bool {
        self.key_type == key.key_type && self.key_data == key.key_data
    }

    fn fingerprint(&self) -> String {
        match STANDARD.decode(&self.key_data) {
            Ok(bytes) => fingerprint(&bytes),
            Err(_) => format!("(unreadable key at line {})", self.line_number),
        }
    }
}

/// Manager for the connector's known_hosts file
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<KnownHostEntry>,
}

impl KnownHosts {
    /// Load known_hosts from a specific path. A missing file is an empty store.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut entries = Vec::new();

        if path.exists() {
            let file = fs::File::open(path)
                .context(format!("Failed to open known_hosts file: {}", path.display()))?;
            let reader = BufReader::new(file);

            for (line_idx, line_result) in reader.lines().enumerate() {
                let line = line_result.context("Failed to read line from known_hosts")?;
                if let Some(entry) = KnownHostEntry::parse(&line, line_idx + 1) {
                    entries.push(entry);
                }
            }

            debug!("Loaded {} entries from known_hosts: {}", entries.len(), path.display());
        } else {
            info!("Known_hosts file does not exist yet: {}", path.display());
        }

        Ok(KnownHosts {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Verify a host key against known_hosts
    pub fn verify(&self, host: &str, port: u16, key: &HostKey) -> VerifyResult {
        let matching: Vec<&KnownHostEntry> =
            self.entries.iter().filter(|e| e.matches(host, port)).collect();

        let Some(first) = matching.first() else {
            return VerifyResult::Unknown;
        };

        if matching.iter().any(|entry| entry.verify_key(key)) {
            return VerifyResult::Trusted;
        }

        VerifyResult::Mismatch {
            expected_fingerprint: first.fingerprint(),
            actual_fingerprint: key.fingerprint.clone(),
            line_number: first.line_number,
        }
    }

    /// Add a new host key (in memory; call `save` to persist)
    pub fn add(&mut self, host: &str, port: u16, key: &HostKey) {
        self.entries.push(KnownHostEntry {
            host_pattern: format_host_pattern(host, port),
            key_type: key.key_type.clone(),
            key_data: key.key_data.clone(),
            comment: None,
            line_number: self.entries.len() + 1,
        });
        info!("Added host key for {}:{} to known_hosts", host, port);
    }

    /// Trust on first use: unknown keys are recorded and accepted,
    /// known keys must match.
    pub fn check_and_record(&mut self, host: &str, port: u16, key: &HostKey) -> Result<VerifyResult> {
        let result = self.verify(host, port, key);
        match &result {
            VerifyResult::Trusted => {
                debug!("Host key for {}:{} verified ({})", host, port, key.fingerprint);
            }
            VerifyResult::Unknown => {
                info!(
                    "First connection to {}:{}, trusting {} key {}",
                    host, port, key.key_type, key.fingerprint
                );
                self.add(host, port, key);
                self.save()?;
            }
            VerifyResult::Mismatch {
                expected_fingerprint,
                actual_fingerprint,
                line_number,
            } => {
                warn!(
                    "HOST KEY MISMATCH for {}:{}: expected {} (line {} of {}), got {}",
                    host,
                    port,
                    expected_fingerprint,
                    line_number,
                    self.path.display(),
                    actual_fingerprint
                );
            }
        }
        Ok(result)
    }

    /// Save known_hosts to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create known_hosts directory")?;
        }

        let mut file = fs::File::create(&self.path)
            .context(format!("Failed to create known_hosts file: {}", self.path.display()))?;

        writeln!(file, "# SSH Connector - Known Hosts")?;
        writeln!(file)?;
        for entry in &self.entries {
            writeln!(file, "{}", entry.format())?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .context("Failed to set known_hosts file permissions")?;
        }

        debug!("Saved {} entries to known_hosts: {}", self.entries.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Format host pattern for known_hosts (e.g., "host" or "[host]:port")
fn format_host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Algorithm name from the SSH wire format: u32 big-endian length, then the name
fn algorithm_name(bytes: &[u8]) -> String {
    let Some(len_bytes) = bytes.get(..4) else {
        return "unknown".to_string();
    };
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    match bytes.get(4..4 + len) {
        Some(name) => String::from_utf8_lossy(name).to_string(),
        None => "unknown".to_string(),
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}
