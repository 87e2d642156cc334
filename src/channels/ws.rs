use std::{sync::Arc, time::Duration};

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::{
    AppResult, AppState,
    auth::Authenticated,
    extract::Query,
    gateway::Session,
    hub::Hub,
    model::Event,
    protocol::{self, Reply},
};

#[derive(Debug, Deserialize)]
pub(crate) struct StreamQuery {
    token: Option<String>,
}

/// Upgrade to the event stream. A token (query, bearer header or cookie)
/// authenticates up front; without one the client must send `authenticate`
/// or `resume` before anything else.
#[debug_handler(state = AppState)]
pub(crate) async fn stream(
    State(hub): State<Arc<Hub>>,
    State(heartbeat): State<Duration>,
    Query(StreamQuery { token }): Query<StreamQuery>,
    auth: Option<Authenticated>,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let session = match token {
        Some(token) => Some(hub.gateway.resolve(&token)?),
        None => auth.map(|Authenticated(session)| session),
    };

    Ok(ws.on_upgrade(async move |socket| serve(socket, hub, session, heartbeat).await))
}

enum Step {
    Inbound(Option<Result<WsMessage, axum::Error>>),
    Outbound(Arc<Event>),
    Ping,
    Expired,
}

async fn serve(socket: WebSocket, hub: Arc<Hub>, session: Option<Session>, heartbeat: Duration) {
    let mut conn = hub.connect();
    let conn_id = conn.id().to_owned();

    let (mut sender, mut receiver) = socket.split();

    if let Some(session) = session {
        let reply = match conn.resume(&session.session_token) {
            Ok(session) => Reply::Authenticated(session),
            Err(e) => Reply::error(&e),
        };
        if let Ok(json) = serde_json::to_string(&reply)
            && sender.send(WsMessage::Text(json.into())).await.is_err()
        {
            return;
        }
    }

    // ping at half the deadline
    let ping_every = (heartbeat / 2).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = tokio::time::sleep(heartbeat);
    tokio::pin!(idle);

    loop {
        let step = tokio::select! {
            frame = receiver.next() => Step::Inbound(frame),
            Some((_, event)) = conn.next_event(), if conn.has_feeds() => Step::Outbound(event),
            _ = ticker.tick() => Step::Ping,
            () = &mut idle => Step::Expired,
        };

        if let Step::Inbound(Some(Ok(_))) = &step {
            idle.as_mut().reset(Instant::now() + heartbeat);
        }

        let outgoing = match step {
            Step::Inbound(Some(Ok(WsMessage::Text(text)))) => {
                let reply = match protocol::parse(text.as_str()) {
                    Ok(frame) => protocol::apply(&mut conn, frame).await,
                    Err(e) => Reply::error(&e),
                };
                serde_json::to_string(&reply)
            }
            Step::Inbound(Some(Ok(WsMessage::Close(_))) | None) => break,
            Step::Inbound(Some(Err(e))) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read failed");
                break;
            }
            Step::Inbound(Some(Ok(_))) => continue,
            Step::Outbound(event) => {
                let viewer = conn.session().map(|s| s.user_id.as_str());
                protocol::render_event(&event, viewer)
            }
            Step::Expired => {
                warn!(conn_id = %conn_id, "ws: peer silent for a heartbeat interval, dropping connection");
                break;
            }
            Step::Ping => {
                if sender.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        match outgoing {
            Ok(json) => {
                if sender.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(conn_id = %conn_id, error = %e, "ws: failed to serialize frame"),
        }
    }

    conn.disconnect();
}
