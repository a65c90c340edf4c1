//! Bearer token acquisition.
//!
//! # Design
//! The identity provider is a black box that hands out an opaque token on
//! demand, asynchronously, or nothing when the user is signed out. The client
//! only sees the `TokenProvider` capability, so cookie-backed, header-backed
//! and mock providers are interchangeable.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};

/// Supplies the bearer token attached to every request.
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, or `None` when no session is available.
    fn token(&self) -> BoxFuture<'_, Option<String>>;
}

/// A fixed token, or a fixed absence of one.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> BoxFuture<'_, Option<String>> {
        futures::future::ready(self.0.clone()).boxed()
    }
}

/// Adapts an async callback into a `TokenProvider`. Built with `token_fn`.
pub struct FnTokenProvider<F>(F);

/// Wrap `f` so it can be used wherever a `TokenProvider` is expected.
pub fn token_fn<F, Fut>(f: F) -> FnTokenProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    FnTokenProvider(f)
}

impl<F, Fut> TokenProvider for FnTokenProvider<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    fn token(&self) -> BoxFuture<'_, Option<String>> {
        (self.0)().boxed()
    }
}
