//! The HTTP endpoint that feeds inbound messages to the engine.

use std::{convert::TryInto, net::SocketAddr};

use bytes::Bytes;
use tracing::{debug, trace_span, warn};
use warp::{http::StatusCode, Filter};

use addshare_core::message::Message;

use crate::state_machine::requests::RequestSender;

/// Starts an HTTP server at the given address, listening to POST requests
/// carrying AddShare messages on `/message`.
pub async fn serve(addr: SocketAddr, requests: RequestSender) {
    let message = warp::path!("message")
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_sender(requests))
        .and_then(handle_message);

    warp::serve(message.with(warp::log("http"))).run(addr).await
}

fn with_sender(
    requests: RequestSender,
) -> impl Filter<Extract = (RequestSender,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || requests.clone())
}

/// Decodes an inbound message and forwards it to the state machine.
///
/// Undecodable or misaddressed messages are answered with an error status
/// without touching the engine.
async fn handle_message(
    body: Bytes,
    requests: RequestSender,
) -> Result<impl warp::Reply, std::convert::Infallible> {
    let message = match Message::from_bytes(&body) {
        Ok(message) => message,
        Err(err) => {
            warn!("failed to decode inbound message: {}", err);
            return Ok(StatusCode::BAD_REQUEST);
        }
    };

    let span = trace_span!(
        "inbound message",
        kind = message.payload.kind(),
        source = %message.source,
    );
    let request = match message.try_into() {
        Ok(request) => request,
        Err(err) => {
            warn!("inbound message is not a coordinator request: {}", err);
            return Ok(StatusCode::BAD_REQUEST);
        }
    };

    Ok(match requests.request(request, span).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            debug!("request not accepted: {}", err);
            StatusCode::UNPROCESSABLE_ENTITY
        }
    })
}
