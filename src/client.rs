use clap::Parser;
use tonic::{Request, Status};
use tracing::{info, info_span, Instrument};

use trace_relay::config::{ClientArgs, ClientOperation};
use trace_relay::pb::{
    calculator_client::CalculatorClient, AddRequest, DivideRequest, ErrorRequest,
    RestrictedRequest, SubtractRequest,
};
use trace_relay::{Telemetry, TracePropagation, TraceToken};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();
    let telemetry = Telemetry::init(args.telemetry.clone().into_config("calculator-client"))?;

    let span = info_span!("client call", operation = ?args.operation);
    let outcome = call(&args).instrument(span).await;

    let code = match outcome {
        Ok(result) => {
            println!("{result}");
            0
        }
        Err(status) => {
            eprintln!("{:?}: {}", status.code(), status.message());
            1
        }
    };

    telemetry.shutdown();
    std::process::exit(code);
}

async fn call(args: &ClientArgs) -> Result<String, Status> {
    let trace = TraceToken::current();
    info!(trace_parent = %trace, server = %args.server, forward = %args.forward, "calling calculator");

    let mut client = CalculatorClient::connect(args.server.clone())
        .await
        .map_err(|err| Status::unavailable(err.to_string()))?;

    let propagation = TracePropagation::new();
    let forward = args.forward.clone();

    let result = match args.operation.clone() {
        ClientOperation::Add { a, b } => {
            let request = traced(&propagation, &trace, AddRequest { a, b, forward });
            client.add(request).await?.into_inner().result.to_string()
        }
        ClientOperation::Subtract { a, b } => {
            let request = traced(&propagation, &trace, SubtractRequest { a, b, forward });
            client.subtract(request).await?.into_inner().result.to_string()
        }
        ClientOperation::Divide { a, b } => {
            let request = traced(&propagation, &trace, DivideRequest { a, b, forward });
            client.divide(request).await?.into_inner().result.to_string()
        }
        ClientOperation::Restricted { a } => {
            let request = traced(&propagation, &trace, RestrictedRequest { a, forward });
            client.restricted(request).await?.into_inner().result.to_string()
        }
        ClientOperation::Error { code } => {
            let request = traced(&propagation, &trace, ErrorRequest { code, forward });
            client.error(request).await?;
            "ok".to_owned()
        }
    };
    Ok(result)
}

fn traced<T>(propagation: &TracePropagation, trace: &TraceToken, message: T) -> Request<T> {
    let mut request = Request::new(message);
    propagation.inject_metadata(trace, request.metadata_mut());
    request
}
