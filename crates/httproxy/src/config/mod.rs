//! Blacklist and credentials file loaders.
//!
//! On-disk syntax is specified here; the loaders themselves are the trivial
//! I/O the proxy's external collaborators are allowed to keep simple. A
//! missing file is not fatal; the respective subsystem just starts empty.

use std::{
    collections::HashSet,
    net::IpAddr,
    path::Path,
    str::FromStr,
};

use ipnet::IpNet;

/// Four disjoint containers populated at load time. A rule maps to exactly
/// one container, decided by precedence: CIDR, then single IP, then
/// wildcard suffix, then exact domain.
#[derive(Debug, Default, Clone)]
pub struct Blacklist {
    exact_domains: HashSet<String>,
    wildcard_suffixes: HashSet<String>,
    ips: HashSet<String>,
    cidrs: Vec<IpNet>,
}

impl Blacklist {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("blacklist file not found or unreadable: {path:?} ({e})");
                return Ok(Self::empty());
            }
        };

        let mut set = Self::empty();
        for raw_line in text.lines() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            set.add_rule(line);
        }
        Ok(set)
    }

    fn add_rule(&mut self, rule: &str) {
        let rule = rule.to_ascii_lowercase();

        if rule.contains('/') {
            if let Ok(net) = IpNet::from_str(&rule) {
                self.cidrs.push(net);
                return;
            }
        }

        if IpAddr::from_str(&rule).is_ok() {
            self.ips.insert(rule);
            return;
        }

        if let Some(suffix) = rule.strip_prefix("*.") {
            self.wildcard_suffixes.insert(suffix.to_string());
        } else {
            self.exact_domains.insert(rule);
        }
    }

    /// Evaluate a `host` (optionally `host:port`) against the rule set.
    /// First match wins; returns a human-readable reason for the access
    /// log, never shown to the client.
    pub fn is_blocked(&self, host: &str) -> (bool, String) {
        let hostname = strip_port(host).to_ascii_lowercase();
        let hostname = hostname.trim();

        if self.ips.contains(hostname) {
            return (true, format!("IP {hostname} is blacklisted"));
        }

        if let Ok(ip) = IpAddr::from_str(hostname) {
            for net in &self.cidrs {
                if net.contains(&ip) {
                    return (true, format!("IP {hostname} is in blocked range {net}"));
                }
            }
        }

        if self.exact_domains.contains(hostname) {
            return (true, format!("Domain {hostname} is blacklisted"));
        }

        for suffix in &self.wildcard_suffixes {
            if hostname == suffix || hostname.ends_with(&format!(".{suffix}")) {
                return (
                    true,
                    format!("Domain {hostname} matches blocked pattern *.{suffix}"),
                );
            }
        }

        (false, "not blocked".to_string())
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Strip a trailing `:port`, bracket-aware so a bare IPv6 literal (which is
/// nothing but colons) is never mistaken for `host:port`. Mirrors
/// [`crate::protocol::request::split_host_port`]'s bracket handling.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    // A bare (unbracketed) IPv6 literal has more than one colon and no
    // unambiguous port suffix to strip.
    if host.matches(':').count() > 1 {
        return host;
    }
    match host.split_once(':') {
        Some((h, _)) => h,
        None => host,
    }
}

/// Username -> cleartext password. Authentication is enabled iff at least
/// one user was loaded.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    users: std::collections::HashMap<String, String>,
}

impl Credentials {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("auth file not found or unreadable: {path:?} ({e})");
                return Ok(Self::empty());
            }
        };

        let mut users = std::collections::HashMap::new();
        for raw_line in text.lines() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            if let Some((user, pass)) = line.split_once(':') {
                users.insert(user.trim().to_string(), pass.trim().to_string());
            }
        }

        if !users.is_empty() {
            log::info!("loaded {} users for authentication", users.len());
        }

        Ok(Self { users })
    }

    pub fn is_enabled(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn check(&self, username: &str, password: &str) -> bool {
        self.users.get(username).is_some_and(|p| p == password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_wildcard_ip_cidr_precedence() {
        let mut bl = Blacklist::empty();
        bl.add_rule("10.0.0.0/8");
        bl.add_rule("192.168.1.10");
        bl.add_rule("facebook.com");
        bl.add_rule("*.facebook.com");

        assert!(bl.cidrs.len() == 1);
        assert!(bl.ips.contains("192.168.1.10"));
        assert!(bl.exact_domains.contains("facebook.com"));
        assert!(bl.wildcard_suffixes.contains("facebook.com"));
    }

    #[test]
    fn wildcard_matches_root_and_subdomain_not_lookalike() {
        let mut bl = Blacklist::empty();
        bl.add_rule("*.example.com");

        assert!(bl.is_blocked("example.com").0);
        assert!(bl.is_blocked("a.b.example.com").0);
        assert!(!bl.is_blocked("myexample.com").0);
    }

    #[test]
    fn ipv6_cidr_blocks_contained_address() {
        let mut bl = Blacklist::empty();
        bl.add_rule("2001:db8::/32");
        assert!(bl.is_blocked("2001:db8::1").0);
    }

    #[test]
    fn is_blocked_ignores_port_and_case() {
        let mut bl = Blacklist::empty();
        bl.add_rule("Evil.COM");
        assert!(bl.is_blocked("evil.com:8080").0);
    }

    #[test]
    fn comments_and_blanks_ignored() {
        let text = "# social\nfacebook.com\n\n*.facebook.com  # wildcard\n192.168.1.10\n10.0.0.0/8\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");
        std::fs::write(&path, text).unwrap();

        let bl = Blacklist::load(&path).unwrap();
        assert!(bl.is_blocked("facebook.com").0);
        assert!(bl.is_blocked("x.facebook.com").0);
        assert!(bl.is_blocked("192.168.1.10").0);
        assert!(bl.is_blocked("10.1.2.3").0);
    }

    #[test]
    fn credentials_enable_auth_only_when_nonempty() {
        let empty = Credentials::empty();
        assert!(!empty.is_enabled());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "# comment\nalice:secret\n\nbob:hunter2\n").unwrap();
        let creds = Credentials::load(&path).unwrap();
        assert!(creds.is_enabled());
        assert!(creds.check("alice", "secret"));
        assert!(!creds.check("alice", "wrong"));
        assert!(!creds.check("carol", "x"));
    }
}
