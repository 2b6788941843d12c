use crate::error::AppError;
use crate::middleware::auth::bearer_token;
use crate::state::AppState;
use crate::websocket::message_types::WsInboundEvent;
use crate::websocket::SessionId;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const PRESENCE_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Outbound frame queued by the router.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Frame(String);

struct WsSession {
    user_id: Uuid,
    session_id: SessionId,
    state: AppState,
    outbound: Option<mpsc::Receiver<String>>,
    hb: Instant,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, session_id = %act.session_id, "heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });

        ctx.run_interval(PRESENCE_REFRESH_INTERVAL, |act, _ctx| {
            let router = act.state.router.clone();
            let user_id = act.user_id;
            actix::spawn(async move {
                router.heartbeat(user_id).await;
            });
        });
    }

    fn handle_inbound(&self, event: WsInboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.clone();
        let user_id = self.user_id;
        let session_id = self.session_id;

        match event {
            WsInboundEvent::Ping => {
                ctx.text(r#"{"type":"pong"}"#);
            }
            WsInboundEvent::TypingStart { conversation_id }
            | WsInboundEvent::TypingStop { conversation_id } => {
                let started = matches!(event, WsInboundEvent::TypingStart { .. });
                actix::spawn(async move {
                    match state
                        .conversations
                        .get_for_member(conversation_id, user_id)
                        .await
                    {
                        Ok(conversation) => {
                            state
                                .router
                                .typing(&conversation, user_id, session_id, started)
                                .await;
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, conversation_id = %conversation_id, "ignoring typing signal");
                        }
                    }
                });
            }
            WsInboundEvent::Ack { message_id } => {
                actix::spawn(async move {
                    if let Err(e) = state.messages.mark_delivered(user_id, message_id).await {
                        tracing::debug!(error = %e, message_id = %message_id, "ack not applied");
                    }
                });
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        if let Some(rx) = self.outbound.take() {
            ctx.add_message_stream(ReceiverStream::new(rx).map(Frame));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let router = self.state.router.clone();
        let session_id = self.session_id;
        actix::spawn(async move {
            router.disconnect(session_id).await;
        });
    }
}

impl Handler<Frame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(event) => self.handle_inbound(event, ctx),
                    Err(e) => tracing::warn!(error = %e, "failed to parse WS frame"),
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("binary WebSocket frames not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Authenticate and collect the rooms to subscribe.
async fn handshake(
    state: &AppState,
    params: &WsParams,
    req: &HttpRequest,
) -> Result<(Uuid, Vec<Uuid>), AppError> {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(req))
        .ok_or(AppError::Unauthorized)?;
    let user_id = state.jwt.verify(token)?;
    let rooms = state.conversations.active_conversation_ids(user_id).await?;
    Ok((user_id, rooms))
}

/// GET /ws?token=
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();
    let timeout = state.config.ws_handshake_timeout();

    let (user_id, rooms) = match tokio::time::timeout(timeout, handshake(&state, &params, &req)).await {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "WebSocket connection rejected");
            return Err(e.into());
        }
        Err(_) => {
            tracing::warn!("WebSocket handshake timed out");
            return Err(AppError::ServiceUnavailable("handshake timed out".into()).into());
        }
    };

    let (tx, rx) = mpsc::channel(state.config.session_channel_capacity);
    let session_id = state.router.connect(user_id, &rooms, tx).await;
    match state.conversations.active_conversation_ids(user_id).await {
        Ok(current) => state.router.sync_rooms(session_id, &current).await,
        Err(e) => tracing::warn!(error = %e, user_id = %user_id, "room re-sync failed"),
    }

    let session = WsSession {
        user_id,
        session_id,
        state: state.get_ref().clone(),
        outbound: Some(rx),
        hb: Instant::now(),
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            state.router.disconnect(session_id).await;
            Err(e)
        }
    }
}
