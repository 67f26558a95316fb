use std::net::SocketAddr;

use axum::http::HeaderMap;

/// What an [`Authorizer`] gets to look at.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub peer: SocketAddr,
    pub headers: HeaderMap,
}

/// Decides whether a request may queue mail.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, request: &RequestInfo) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&RequestInfo) -> bool + Send + Sync,
{
    fn authorize(&self, request: &RequestInfo) -> bool {
        self(request)
    }
}

/// Admits requests from the local machine only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackAuthorizer;

impl Authorizer for LoopbackAuthorizer {
    fn authorize(&self, request: &RequestInfo) -> bool {
        request.peer.ip().to_canonical().is_loopback()
    }
}
