//! Single-hop delegation shared by every service in the crate.
//!
//! A request either names a peer in its forward directive or it does not.
//! Without one the operation runs locally; with one the directive is stripped
//! and the same request is handed to that peer, whose answer (value or error)
//! is returned as is. Nothing is retried and the peer is free to forward
//! again, so forwarding loops are the operator's problem.

use tracing::info;

use crate::propagation::TraceToken;

/// A request that can carry the name of a peer to delegate to.
pub trait Forwardable {
    /// Name of the peer to forward to, empty when the request is to be
    /// handled locally.
    fn forward_target(&self) -> &str;

    fn clear_forward(&mut self);
}

#[derive(Debug, PartialEq)]
pub enum Hop<R> {
    Local(R),
    Peer { target: String, request: R },
}

/// Decides where `request` is handled. The request travelling to a peer
/// always has its directive cleared.
pub fn route<R: Forwardable>(mut request: R) -> Hop<R> {
    if request.forward_target().is_empty() {
        return Hop::Local(request);
    }
    let target = request.forward_target().to_owned();
    request.clear_forward();
    Hop::Peer { target, request }
}

/// Client side of a hop: dials `target`, attaches `trace` and runs the same
/// logical operation there.
#[tonic::async_trait]
pub trait Peer<R: Send + 'static>: Send + Sync {
    type Output: Send;
    type Error: Send;

    async fn call(
        &self,
        target: &str,
        request: R,
        trace: &TraceToken,
    ) -> Result<Self::Output, Self::Error>;
}

/// Runs `local` on the request, or delegates it to the peer it names.
pub async fn forward_or_local<R, P, F>(
    peer: &P,
    trace: &TraceToken,
    request: R,
    local: F,
) -> Result<P::Output, P::Error>
where
    R: Forwardable + Send + 'static,
    P: Peer<R>,
    F: FnOnce(R) -> Result<P::Output, P::Error>,
{
    match route(request) {
        Hop::Local(request) => local(request),
        Hop::Peer { target, request } => {
            info!(%target, trace_parent = %trace, "forwarding request to peer");
            peer.call(&target, request, trace).await
        }
    }
}

/// Maps a forward target to a peer address by substituting `{target}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerTemplate {
    template: String,
}

impl PeerTemplate {
    pub const PLACEHOLDER: &'static str = "{target}";

    pub fn new(template: impl Into<String>) -> PeerTemplate {
        PeerTemplate {
            template: template.into(),
        }
    }

    pub fn resolve(&self, target: &str) -> String {
        self.template.replace(Self::PLACEHOLDER, target)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}
