//! `Proxy-Authorization: Basic` validation against a loaded user table.

use base64::Engine;

use crate::config::Credentials;

#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials: Credentials,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_enabled()
    }

    /// Validate a `Proxy-Authorization` header value. Any malformed input
    /// (wrong scheme, bad base64, non-UTF-8, missing `:`) is a plain
    /// `false`, never a propagated error.
    pub fn validate(&self, header: Option<&str>) -> bool {
        if !self.credentials.is_enabled() {
            return true;
        }

        let Some(header) = header else {
            return false;
        };

        let Some(token) = header.strip_prefix("Basic ") else {
            return false;
        };

        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(token) else {
            return false;
        };

        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };

        let Some((username, password)) = decoded.split_once(':') else {
            return false;
        };

        self.credentials.check(username, password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_with(users: &[(&str, &str)]) -> Authenticator {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        let body: String = users
            .iter()
            .map(|(u, p)| format!("{u}:{p}\n"))
            .collect();
        std::fs::write(&path, body).unwrap();
        Authenticator::new(Credentials::load(&path).unwrap())
    }

    #[test]
    fn disabled_allows_everyone() {
        let auth = Authenticator::new(Credentials::empty());
        assert!(auth.validate(None));
        assert!(auth.validate(Some("garbage")));
    }

    #[test]
    fn valid_basic_header_passes() {
        let auth = auth_with(&[("alice", "secret")]);
        assert!(auth.validate(Some("Basic YWxpY2U6c2VjcmV0")));
    }

    #[test]
    fn missing_header_fails_when_enabled() {
        let auth = auth_with(&[("alice", "secret")]);
        assert!(!auth.validate(None));
    }

    #[test]
    fn wrong_password_fails() {
        let auth = auth_with(&[("alice", "secret")]);
        let token = base64::engine::general_purpose::STANDARD.encode("alice:wrong");
        assert!(!auth.validate(Some(&format!("Basic {token}"))));
    }

    #[test]
    fn malformed_base64_fails_without_error() {
        let auth = auth_with(&[("alice", "secret")]);
        assert!(!auth.validate(Some("Basic !!!not-base64!!!")));
    }

    #[test]
    fn missing_colon_in_decoded_fails() {
        let auth = auth_with(&[("alice", "secret")]);
        let token = base64::engine::general_purpose::STANDARD.encode("alicesecret");
        assert!(!auth.validate(Some(&format!("Basic {token}"))));
    }

    #[test]
    fn wrong_scheme_fails() {
        let auth = auth_with(&[("alice", "secret")]);
        assert!(!auth.validate(Some("Bearer YWxpY2U6c2VjcmV0")));
    }
}
