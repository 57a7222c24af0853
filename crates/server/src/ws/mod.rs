// Live chat transport.
//
// One WebSocket route serves every group: a connection authenticates with a
// `hello` frame, joins any number of groups, and receives `receive_message`
// fan-out for each. The durable log stays authoritative — this channel is a
// latency optimization with no replay.

pub mod handler;
pub mod registry;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::{routing::get, Router};
use studia_common::protocol::ws::{self as ws_protocol, WsMessage};

use crate::{api::groups::GroupStore, auth::jwt::IdentityTokenService, chat::Publisher};
use registry::ConnectionRegistry;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 65_536;

#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<ConnectionRegistry>,
    pub publisher: Publisher,
    pub groups: GroupStore,
    pub token_service: Arc<IdentityTokenService>,
}

pub fn router(state: WsState) -> Router {
    Router::new().route("/v1/ws", get(handler::ws_upgrade)).with_state(state)
}

pub(crate) async fn send_frame(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let frame = ws_protocol::encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(frame.into())).await.map_err(|_| ())
}
