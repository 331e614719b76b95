use serde_json::json;
use tokio::task::JoinHandle;

use crate::state::AppState;
use crate::ws::broadcast::{send_to, RoutingError};
use crate::ws::envelope::{self, Envelope, MessageKind};
use crate::ws::{ClientId, ConnectionHandle};

/// What the router did with one inbound frame.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Frame rejected; an error went back to the sender.
    Rejected,
    /// Forwarded to the target and acknowledged.
    Forwarded(ClientId),
    /// Target missing or unreachable; an error went back to the sender.
    Unroutable(RoutingError),
    /// Job bridge invoked. `None` if the request was rejected there.
    JobDispatched(Option<JoinHandle<()>>),
    Echoed,
}

/// Handle one inbound text or binary frame from `sender`.
///
/// Every frame yields at least one reply to the sender; decode and routing
/// failures yield exactly one `error` and nothing else.
pub fn handle_frame(raw: &[u8], sender: &ConnectionHandle, state: &AppState) -> RouteOutcome {
    let mut envelope = match envelope::decode(raw) {
        Ok(env) => env,
        Err(e) => {
            tracing::debug!(client_id = %sender.id(), error = %e, "Rejected inbound frame");
            reply(sender, error_envelope(format!("Invalid message: {}", e)));
            return RouteOutcome::Rejected;
        }
    };

    // Never trust a client-supplied sender
    envelope.from = Some(sender.id().to_string());

    if envelope.kind.is_empty() {
        reply(sender, error_envelope("Message type must be a non-empty string"));
        return RouteOutcome::Rejected;
    }

    if let Some(target) = envelope.to.as_deref().and_then(ClientId::parse) {
        return forward(envelope, target, sender, state);
    }

    if envelope.kind == MessageKind::Job {
        let handle = state
            .jobs
            .dispatch(sender.id().clone(), envelope.payload.as_ref());
        return RouteOutcome::JobDispatched(handle);
    }

    reply(sender, Envelope::server(MessageKind::Echo, envelope.to_value()));
    RouteOutcome::Echoed
}

fn forward(
    envelope: Envelope,
    target: ClientId,
    sender: &ConnectionHandle,
    state: &AppState,
) -> RouteOutcome {
    let kind = envelope.kind.clone();
    let forwarded = Envelope::new(kind.clone(), envelope.payload).with_from(sender.id().as_str());

    match send_to(&state.registry, &target, &forwarded) {
        Ok(()) => {
            tracing::debug!(from = %sender.id(), to = %target, kind = %kind, "Forwarded message");
            reply(
                sender,
                Envelope::server(
                    MessageKind::Ack,
                    json!({ "to": target, "type": kind }),
                ),
            );
            RouteOutcome::Forwarded(target)
        }
        Err(e) => {
            tracing::debug!(from = %sender.id(), to = %target, error = %e, "Forward failed");
            reply(
                sender,
                Envelope::server(
                    MessageKind::Error,
                    json!({ "message": e.to_string(), "to": target }),
                ),
            );
            RouteOutcome::Unroutable(e)
        }
    }
}

fn error_envelope(message: impl Into<String>) -> Envelope {
    Envelope::server(MessageKind::Error, json!({ "message": message.into() }))
}

/// Send to the originating connection; a dead sender is not an error here.
fn reply(sender: &ConnectionHandle, envelope: Envelope) {
    if let Err(e) = sender.send_envelope(&envelope) {
        tracing::debug!(error = %e, kind = %envelope.kind, "Reply dropped");
    }
}
