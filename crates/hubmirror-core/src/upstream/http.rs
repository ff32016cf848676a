//! HTTP layer: request construction and auth.
//!
//! Status codes are returned as data. The only errors produced here are
//! network-level failures.

use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::error::MirrorResult;

/// HTTP backend for making requests (holds reqwest client and auth).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) token_provider: TokenProvider,
}

impl HttpBackend {
    /// Make a single request. No retries: a failed fetch is reported to the
    /// caller, which may simply ask again.
    pub(crate) async fn request(&self, method: Method, url: &str) -> MirrorResult<reqwest::Response> {
        let mut request = self.client.request(method.clone(), url);

        if let Some(bearer) = self.token_provider.bearer() {
            request = request.header(AUTHORIZATION, bearer);
        }

        match request.send().await {
            Ok(response) => {
                debug!(%method, url, status = response.status().as_u16(), "upstream responded");
                Ok(response)
            }
            Err(e) => {
                warn!(%method, url, error = %e, "upstream request failed");
                Err(e.into())
            }
        }
    }
}
