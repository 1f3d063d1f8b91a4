//! Access gate for the management plane: localOnly, ipWhitelist, apikey.

use crate::errors::EngineError;
use hyper::HeaderMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    pub local_only: bool,
    /// Exact IPs; `*` (or an empty list) admits everyone.
    pub ip_whitelist: Vec<String>,
    pub api_key: Option<String>,
}

impl AccessPolicy {
    /// Check a management request against the policy.
    pub fn check(&self, addr: &SocketAddr, headers: &HeaderMap) -> Result<(), EngineError> {
        if let Some(expected) = &self.api_key {
            let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
            if presented != Some(expected.as_str()) {
                return Err(EngineError::InsufficientAccess(
                    "missing or invalid api key".to_string(),
                ));
            }
        }

        let ip = addr.ip();
        if self.local_only && !ip.is_loopback() {
            return Err(EngineError::InsufficientAccess(format!(
                "access from {ip} is restricted to localhost"
            )));
        }

        if !self.ip_whitelist.is_empty() && !self.ip_whitelist.iter().any(|e| e == "*") {
            let ip = ip.to_string();
            if !self.ip_whitelist.iter().any(|allowed| allowed == &ip) {
                return Err(EngineError::InsufficientAccess(format!(
                    "{ip} is not on the ip whitelist"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:12345").parse().unwrap()
    }

    #[test]
    fn test_open_policy_admits_everyone() {
        let policy = AccessPolicy::default();
        assert!(policy.check(&addr("10.0.0.9"), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_local_only() {
        let policy = AccessPolicy {
            local_only: true,
            ..Default::default()
        };
        assert!(policy.check(&addr("127.0.0.1"), &HeaderMap::new()).is_ok());
        assert!(policy.check(&addr("10.0.0.9"), &HeaderMap::new()).is_err());
    }

    #[test]
    fn test_ip_whitelist() {
        let policy = AccessPolicy {
            ip_whitelist: vec!["10.0.0.9".to_string()],
            ..Default::default()
        };
        assert!(policy.check(&addr("10.0.0.9"), &HeaderMap::new()).is_ok());
        assert!(policy.check(&addr("10.0.0.8"), &HeaderMap::new()).is_err());

        let open = AccessPolicy {
            ip_whitelist: vec!["*".to_string()],
            ..Default::default()
        };
        assert!(open.check(&addr("10.0.0.8"), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_api_key() {
        let policy = AccessPolicy {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        assert!(policy.check(&addr("127.0.0.1"), &headers).is_err());
        headers.insert("x-api-key", "wrong".parse().unwrap());
        assert!(policy.check(&addr("127.0.0.1"), &headers).is_err());
        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(policy.check(&addr("127.0.0.1"), &headers).is_ok());
    }
}
