// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SSH Tunnel Manager Contributors

// Network utility functions

use std::net::IpAddr;

/// Address used both for the remote forward bind and for local dials
pub const LOOPBACK_ADDR: &str = "127.0.0.1";

/// Format a host and port as a connectable address.
/// IPv6 literals are wrapped in brackets ("[::1]:22").
pub fn format_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_host_port() {
        assert_eq!(format_host_port("127.0.0.1", 8080), "127.0.0.1:8080");
        assert_eq!(format_host_port("we3d.com.cn", 22), "we3d.com.cn:22");
        assert_eq!(format_host_port("::1", 22), "[::1]:22");
    }
}
