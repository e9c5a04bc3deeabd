//! # Streaming Transcription Sessions
//!
//! One WebSocket connection is one session. The protocol is deliberately
//! bare: the client sends one binary frame per request, each carrying one
//! complete WAV clip, and receives exactly one text frame back per request,
//! in order. The reply is the transcription, or the empty string when the
//! clip could not be decoded. There is no envelope, no status codes and no
//! session state beyond the connection itself.
//!
//! ## Ordering and isolation:
//! Each session is an independent actor. While a request is in flight the
//! actor's mailbox is suspended, so requests on one connection resolve
//! strictly first-in first-out; other sessions run on their own actors and
//! never wait on this one. A decode failure is answered and forgotten: the
//! session stays open, and no other session can observe it.

use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::Transcriber;

use actix::prelude::*;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_http::ws::Item;
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a connection may stay silent before it is presumed dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Actor owning one client connection and its receive loop.
pub struct SttSession {
    session_id: Uuid,
    state: AppState,
    transcriber: Arc<Transcriber>,

    /// Reassembly buffer for a fragmented inbound message. `true` marks a
    /// binary continuation; text fragments are drained but rejected whole.
    fragment: Option<(bool, BytesMut)>,

    last_heartbeat: Instant,
    requests_handled: u64,
}

impl SttSession {
    pub fn new(state: AppState) -> Self {
        let transcriber = Arc::clone(&state.transcriber);
        Self {
            session_id: Uuid::new_v4(),
            state,
            transcriber,
            fragment: None,
            last_heartbeat: Instant::now(),
            requests_handled: 0,
        }
    }

    /// Resolve one binary request: transcribe, then reply with the text or
    /// with `""` on any decode failure.
    ///
    /// The actor waits on the in-flight future, which holds back every later
    /// frame on this connection until the reply has been written. That is
    /// what makes responses arrive in request order.
    fn handle_request(&mut self, payload: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        let transcriber = Arc::clone(&self.transcriber);
        let state = self.state.clone();
        let session_id = self.session_id;
        let seq = self.requests_handled;
        self.requests_handled += 1;
        let started = Instant::now();

        debug!(%session_id, seq, bytes = payload.len(), "request received");

        let fut = async move { transcriber.transcribe(&payload).await }
            .into_actor(self)
            .map(move |result, _act, ctx| {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let reply = match result {
                    Ok(text) => {
                        debug!(%session_id, seq, elapsed_ms, chars = text.len(), "request resolved");
                        state.record_request(elapsed_ms, false);
                        text
                    }
                    Err(err) => {
                        warn!(%session_id, seq, elapsed_ms, error = %err, "decode failed, replying empty");
                        state.record_request(elapsed_ms, true);
                        String::new()
                    }
                };
                ctx.text(reply);
            });

        ctx.wait(fut);
    }

    /// Answer a frame that cannot be a transcription request.
    ///
    /// The empty-string reply keeps the one-response-per-message pairing
    /// intact for clients that send something unexpected.
    fn reject_request(&mut self, reason: &str, ctx: &mut ws::WebsocketContext<Self>) {
        warn!(session_id = %self.session_id, reason, "unusable frame, replying empty");
        self.requests_handled += 1;
        self.state.record_request(0, true);
        ctx.text("");
    }

    /// Fold one continuation item into the reassembly buffer; returns the
    /// completed message once the final fragment arrives.
    fn handle_fragment(&mut self, item: Item) -> Option<(bool, Bytes)> {
        match item {
            Item::FirstBinary(chunk) => {
                self.fragment = Some((true, BytesMut::from(&chunk[..])));
                None
            }
            Item::FirstText(chunk) => {
                self.fragment = Some((false, BytesMut::from(&chunk[..])));
                None
            }
            Item::Continue(chunk) => {
                if let Some((_, buffer)) = self.fragment.as_mut() {
                    buffer.extend_from_slice(&chunk);
                } else {
                    warn!(session_id = %self.session_id, "continuation frame without a start");
                }
                None
            }
            Item::Last(chunk) => match self.fragment.take() {
                Some((is_binary, mut buffer)) => {
                    buffer.extend_from_slice(&chunk);
                    Some((is_binary, buffer.freeze()))
                }
                None => {
                    warn!(session_id = %self.session_id, "final fragment without a start");
                    None
                }
            },
        }
    }
}

impl Actor for SttSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "session opened");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                info!(session_id = %act.session_id, "heartbeat timeout, closing session");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state.close_session();
        info!(
            session_id = %self.session_id,
            requests = self.requests_handled,
            "session closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SttSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(payload)) => {
                self.last_heartbeat = Instant::now();
                self.handle_request(payload, ctx);
            }
            Ok(ws::Message::Text(_)) => {
                self.last_heartbeat = Instant::now();
                self.reject_request("protocol carries audio as binary frames", ctx);
            }
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                if let Some((is_binary, payload)) = self.handle_fragment(item) {
                    if is_binary {
                        self.handle_request(payload, ctx);
                    } else {
                        self.reject_request("protocol carries audio as binary frames", ctx);
                    }
                }
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session_id, ?reason, "client closed");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                // Transport failure ends this session and nothing else.
                warn!(session_id = %self.session_id, error = %err, "transport error, dropping session");
                ctx.stop();
            }
        }
    }
}

/// HTTP → WebSocket upgrade endpoint.
///
/// Refuses the upgrade with 503 once the configured session cap is reached;
/// accepted connections get their own actor and run independently from the
/// first frame on.
pub async fn stt_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let limits = app_state.get_config().limits;

    if !app_state.try_open_session() {
        return Err(AppError::AtCapacity(format!(
            "session limit of {} reached",
            limits.max_concurrent_sessions
        )));
    }

    let session = SttSession::new(app_state.get_ref().clone());
    ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(limits.max_frame_bytes)
        .start()
        .map_err(|e| {
            // The actor never started, so its stopped() hook never runs.
            app_state.close_session();
            AppError::Internal(e.to_string())
        })
}
