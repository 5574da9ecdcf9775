use std::time::Duration;

use tonic::{
    transport::{Channel, Endpoint},
    Code, Request, Response, Status,
};
use tracing::{info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::forward::{forward_or_local, Forwardable, Peer, PeerTemplate};
use crate::pb::calculator_client::CalculatorClient;
use crate::pb::calculator_server::{Calculator, CalculatorServer};
use crate::pb::{
    AddRequest, AddResponse, DivideRequest, DivideResponse, ErrorRequest, ErrorResponse,
    RestrictedRequest, RestrictedResponse, SubtractRequest, SubtractResponse,
};
use crate::propagation::{TracePropagation, TraceToken};

type CalcResult<T> = Result<Response<T>, Status>;

/// A calculator rpc: its local semantics and how to call it on a peer.
#[tonic::async_trait]
pub trait Operation: Forwardable + Sized + Send + Sync + 'static {
    type Output: Send + 'static;

    const NAME: &'static str;

    fn compute(self) -> Result<Self::Output, Status>;

    async fn invoke(
        client: &mut CalculatorClient<Channel>,
        request: Request<Self>,
    ) -> CalcResult<Self::Output>;
}

macro_rules! forwardable {
    ($($request:ty),* $(,)?) => {
        $(
            impl Forwardable for $request {
                fn forward_target(&self) -> &str {
                    &self.forward
                }

                fn clear_forward(&mut self) {
                    self.forward.clear();
                }
            }
        )*
    };
}

forwardable!(
    AddRequest,
    SubtractRequest,
    DivideRequest,
    RestrictedRequest,
    ErrorRequest,
);

#[tonic::async_trait]
impl Operation for AddRequest {
    type Output = AddResponse;
    const NAME: &'static str = "add";

    fn compute(self) -> Result<AddResponse, Status> {
        Ok(AddResponse {
            result: self.a.wrapping_add(self.b),
        })
    }

    async fn invoke(
        client: &mut CalculatorClient<Channel>,
        request: Request<Self>,
    ) -> CalcResult<AddResponse> {
        client.add(request).await
    }
}

#[tonic::async_trait]
impl Operation for SubtractRequest {
    type Output = SubtractResponse;
    const NAME: &'static str = "subtract";

    fn compute(self) -> Result<SubtractResponse, Status> {
        Ok(SubtractResponse {
            result: self.a.wrapping_sub(self.b),
        })
    }

    async fn invoke(
        client: &mut CalculatorClient<Channel>,
        request: Request<Self>,
    ) -> CalcResult<SubtractResponse> {
        client.subtract(request).await
    }
}

#[tonic::async_trait]
impl Operation for DivideRequest {
    type Output = DivideResponse;
    const NAME: &'static str = "divide";

    /// Truncating division. A zero divisor or `i32::MIN / -1` fails the
    /// request instead of the process.
    fn compute(self) -> Result<DivideResponse, Status> {
        match self.a.checked_div(self.b) {
            Some(result) => Ok(DivideResponse { result }),
            None if self.b == 0 => Err(Status::invalid_argument("division by zero")),
            None => Err(Status::invalid_argument(format!(
                "{} / {} overflows a 32-bit integer",
                self.a, self.b
            ))),
        }
    }

    async fn invoke(
        client: &mut CalculatorClient<Channel>,
        request: Request<Self>,
    ) -> CalcResult<DivideResponse> {
        client.divide(request).await
    }
}

#[tonic::async_trait]
impl Operation for RestrictedRequest {
    type Output = RestrictedResponse;
    const NAME: &'static str = "restricted";

    fn compute(self) -> Result<RestrictedResponse, Status> {
        Err(Status::invalid_argument("Invalid argument provided"))
    }

    async fn invoke(
        client: &mut CalculatorClient<Channel>,
        request: Request<Self>,
    ) -> CalcResult<RestrictedResponse> {
        client.restricted(request).await
    }
}

#[tonic::async_trait]
impl Operation for ErrorRequest {
    type Output = ErrorResponse;
    const NAME: &'static str = "error";

    fn compute(self) -> Result<ErrorResponse, Status> {
        Err(Status::new(fault_code(self.code), "Some custom error"))
    }

    async fn invoke(
        client: &mut CalculatorClient<Channel>,
        request: Request<Self>,
    ) -> CalcResult<ErrorResponse> {
        client.error(request).await
    }
}

/// gRPC code for an injected fault. `OK` cannot describe a failure and
/// anything outside the gRPC range is not a code at all; both become
/// `UNKNOWN`.
pub fn fault_code(code: u32) -> Code {
    match i32::try_from(code).map(Code::from_i32) {
        Ok(Code::Ok) | Err(_) => Code::Unknown,
        Ok(code) => code,
    }
}

/// Dials a calculator peer per forwarded call.
#[derive(Clone, Debug)]
pub struct CalculatorPeer {
    template: PeerTemplate,
    propagation: TracePropagation,
    timeout: Option<Duration>,
}

impl CalculatorPeer {
    pub fn new(template: PeerTemplate, propagation: TracePropagation) -> CalculatorPeer {
        CalculatorPeer {
            template,
            propagation,
            timeout: None,
        }
    }

    /// Bound both connecting to and waiting on the peer. Without it a hung
    /// peer hangs the forwarded call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> CalculatorPeer {
        self.timeout = timeout;
        self
    }

    async fn connect(&self, target: &str) -> Result<CalculatorClient<Channel>, Status> {
        let address = self.template.resolve(target);
        let mut endpoint = Endpoint::from_shared(address.clone()).map_err(|err| {
            Status::invalid_argument(format!("invalid peer address {address:?}: {err}"))
        })?;
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.connect_timeout(timeout).timeout(timeout);
        }

        let channel = endpoint.connect().await.map_err(|err| {
            warn!(%target, %address, error = %err, "failed to connect to peer");
            Status::unavailable(format!("failed to connect to peer {target}: {err}"))
        })?;
        Ok(CalculatorClient::new(channel))
    }
}

#[tonic::async_trait]
impl<O: Operation> Peer<O> for CalculatorPeer {
    type Output = O::Output;
    type Error = Status;

    async fn call(&self, target: &str, request: O, trace: &TraceToken) -> Result<O::Output, Status> {
        let mut client = self.connect(target).await?;

        let mut request = Request::new(request);
        self.propagation
            .inject_metadata(trace, request.metadata_mut());

        match O::invoke(&mut client, request).await {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                warn!(operation = O::NAME, %target, ?status, "forwarded request failed");
                Err(status)
            }
        }
    }
}

/// The calculator service: every rpc computes locally or forwards one hop.
#[derive(Clone, Debug)]
pub struct CalculatorService {
    peer: CalculatorPeer,
    propagation: TracePropagation,
}

impl CalculatorService {
    pub fn new(peer: CalculatorPeer, propagation: TracePropagation) -> CalculatorService {
        CalculatorService { peer, propagation }
    }

    pub fn into_server(self) -> CalculatorServer<CalculatorService> {
        CalculatorServer::new(self)
    }

    async fn dispatch<O: Operation>(&self, request: Request<O>) -> CalcResult<O::Output> {
        let trace = self.propagation.extract_metadata(request.metadata());
        let request = request.into_inner();
        info!(
            operation = O::NAME,
            trace_parent = %trace,
            forward = request.forward_target(),
            "handling calculator request"
        );

        let output = forward_or_local(&self.peer, &trace, request, O::compute).await?;
        Ok(Response::new(output))
    }
}

#[tonic::async_trait]
impl Calculator for CalculatorService {
    async fn add(&self, request: Request<AddRequest>) -> CalcResult<AddResponse> {
        self.dispatch(request).await
    }

    async fn subtract(&self, request: Request<SubtractRequest>) -> CalcResult<SubtractResponse> {
        self.dispatch(request).await
    }

    async fn divide(&self, request: Request<DivideRequest>) -> CalcResult<DivideResponse> {
        self.dispatch(request).await
    }

    async fn restricted(
        &self,
        request: Request<RestrictedRequest>,
    ) -> CalcResult<RestrictedResponse> {
        self.dispatch(request).await
    }

    async fn error(&self, request: Request<ErrorRequest>) -> CalcResult<ErrorResponse> {
        self.dispatch(request).await
    }
}

/// Per-request span for the gRPC server, parented on the caller's trace.
pub fn grpc_request_span(propagation: &TracePropagation, request: &http::Request<()>) -> tracing::Span {
    let span = info_span!("grpc request", rpc.path = %request.uri().path());
    span.set_parent(propagation.extract_headers(request.headers()).into_context());
    span
}
