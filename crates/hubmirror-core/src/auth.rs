//! Token authentication for upstream requests.
//!
//! When a token is configured every upstream call (GET, HEAD, passthrough)
//! carries `Authorization: Bearer <token>`. Gated repositories on the
//! upstream answer 401/403 without one.

use std::fmt;

/// Environment variable holding the upstream token.
pub const TOKEN_ENV: &str = "HUGGINGFACE_API_TOKEN";

/// Token provider for upstream authentication.
#[derive(Clone, Default)]
pub enum TokenProvider {
    /// Static token (from config or env).
    Static(String),

    /// No authentication.
    #[default]
    None,
}

impl TokenProvider {
    /// Create a static token provider.
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    /// Create from `HUGGINGFACE_API_TOKEN`; empty values mean no auth.
    pub fn from_env() -> Self {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.is_empty() => Self::Static(token),
            _ => Self::None,
        }
    }

    /// Create from an optional configured token.
    pub fn from_option(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Self::static_token(token),
            _ => Self::None,
        }
    }

    /// Get the current token.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Static(token) => Some(token),
            Self::None => None,
        }
    }

    /// `Authorization` header value, if authenticated.
    pub fn bearer(&self) -> Option<String> {
        self.token().map(|token| format!("Bearer {}", token))
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// Never render the token itself.
impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("TokenProvider::Static(<redacted>)"),
            Self::None => f.write_str("TokenProvider::None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_static_token() {
        let provider = TokenProvider::static_token("hf_abc");
        assert_eq!(provider.token(), Some("hf_abc"));
        assert_eq!(provider.bearer().as_deref(), Some("Bearer hf_abc"));
        assert!(provider.is_authenticated());
    }

    #[test]
    fn test_no_token() {
        let provider = TokenProvider::None;
        assert!(provider.bearer().is_none());
        assert!(!provider.is_authenticated());
    }

    #[test]
    fn test_from_option_empty_is_none() {
        assert!(!TokenProvider::from_option(Some("")).is_authenticated());
        assert!(!TokenProvider::from_option(None).is_authenticated());
        assert!(TokenProvider::from_option(Some("t")).is_authenticated());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", TokenProvider::static_token("hf_secret"));
        assert!(!rendered.contains("hf_secret"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(TOKEN_ENV, "hf_env");
        assert_eq!(TokenProvider::from_env().token(), Some("hf_env"));

        std::env::set_var(TOKEN_ENV, "");
        assert!(!TokenProvider::from_env().is_authenticated());

        std::env::remove_var(TOKEN_ENV);
        assert!(!TokenProvider::from_env().is_authenticated());
    }
}
