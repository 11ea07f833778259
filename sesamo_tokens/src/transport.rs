use bytes::{BufMut, BytesMut};
use http::header;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

use crate::classify::is_pull_secret;
use crate::manager::TokenManager;

/// A middleware that injects a current access token into outgoing requests
///
/// On each request the middleware asks its [`TokenManager`] for a token
/// that is still comfortably valid and attaches it as the `Authorization`
/// header, using the `Bearer` scheme for ordinary tokens and the
/// `AccessToken` scheme for pull secrets. A request that already carries
/// an `Authorization` header is left untouched, allowing per-request
/// overrides.
///
/// Failing to obtain a token aborts the request before it reaches the
/// wire; no request is ever sent without authorization attached.
///
/// ```no_run
/// use reqwest_middleware::ClientBuilder;
/// use sesamo_tokens::{TokenManager, TokenMiddleware};
///
/// # fn example(manager: TokenManager) {
/// let client = ClientBuilder::new(reqwest::Client::new())
///     .with(TokenMiddleware::new(manager))
///     .build();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct TokenMiddleware {
    manager: TokenManager,
}

impl TokenMiddleware {
    /// Constructs a new middleware from a token manager
    pub fn new(manager: TokenManager) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl Middleware for TokenMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !req.headers().contains_key(header::AUTHORIZATION) {
            let pair = self
                .manager
                .tokens()
                .await
                .map_err(|err| reqwest_middleware::Error::Middleware(anyhow::Error::new(err)))?;
            req.headers_mut()
                .insert(header::AUTHORIZATION, authorization_header(&pair.access));
        }

        next.run(req, extensions).await
    }
}

fn authorization_header(access: &str) -> header::HeaderValue {
    let scheme = if is_pull_secret(access) {
        "AccessToken "
    } else {
        "Bearer "
    };

    let mut header_value = BytesMut::with_capacity(scheme.len() + access.len());
    header_value.put_slice(scheme.as_bytes());
    header_value.put_slice(access.as_bytes());
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value).expect("only valid header bytes");
    value.set_sensitive(true);
    value
}
