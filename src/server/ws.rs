use crate::error_result::Result;
use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::Sender;
use tracing::{info, warn};
use uuid::Uuid;

/// change notices pushed to every connected back-office client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    RefreshReceiptList,
    RefreshReceipt(Uuid),
    RefreshInventory,
    RefreshOrderList,
    RefreshAwbList,
    RefreshHandover(Uuid),
    RefreshSettlementList,
    Ping,
    Pong,
}

pub async fn handle_ws(
    ws: WebSocketUpgrade,
    State(sender): State<Arc<Sender<ControlMessage>>>,
) -> Result<impl IntoResponse> {
    Ok(ws.on_upgrade(|socket| handle_subscribe_change(socket, sender)))
}

#[derive(Serialize, Deserialize, Debug)]
struct WsMsg {
    event: WsEvent,
    message: String,
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
enum WsEvent {
    RefreshReceiptList,
    RefreshReceipt,
    RefreshInventory,
    RefreshOrderList,
    RefreshAwbList,
    RefreshHandover,
    RefreshSettlementList,
    Ping,
    Pong,
}

impl From<ControlMessage> for WsMsg {
    fn from(message: ControlMessage) -> Self {
        let (event, message) = match message {
            ControlMessage::RefreshReceiptList => (WsEvent::RefreshReceiptList, String::new()),
            ControlMessage::RefreshReceipt(id) => (WsEvent::RefreshReceipt, id.to_string()),
            ControlMessage::RefreshInventory => (WsEvent::RefreshInventory, String::new()),
            ControlMessage::RefreshOrderList => (WsEvent::RefreshOrderList, String::new()),
            ControlMessage::RefreshAwbList => (WsEvent::RefreshAwbList, String::new()),
            ControlMessage::RefreshHandover(id) => (WsEvent::RefreshHandover, id.to_string()),
            ControlMessage::RefreshSettlementList => {
                (WsEvent::RefreshSettlementList, String::new())
            }
            ControlMessage::Ping => (WsEvent::Ping, String::new()),
            ControlMessage::Pong => (WsEvent::Pong, String::new()),
        };
        Self { event, message }
    }
}

pub async fn handle_subscribe_change(stream: WebSocket, sender: Arc<Sender<ControlMessage>>) {
    let mut rx = sender.subscribe();
    let cloned_sender = sender.clone();
    let (mut ws_sender, mut ws_receiver) = stream.split();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(Message::Text(text))) = ws_receiver.next().await {
            let Ok(msg) = serde_json::from_str::<WsMsg>(&text) else {
                warn!("ignore unknown ws message: {text}");
                continue;
            };
            if msg.event == WsEvent::Ping && cloned_sender.send(ControlMessage::Pong).is_err() {
                break;
            }
        }
    });
    let mut ping_task = tokio::spawn(async move {
        while sender.send(ControlMessage::Ping).is_ok() {
            tokio::time::sleep(Duration::from_secs(20)).await;
        }
    });
    let mut send_task = tokio::spawn(async move {
        while let Ok(message) = rx.recv().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let text = json!(WsMsg::from(message)).to_string();
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });
    // If any one of the tasks exit, abort the others.
    tokio::select! {
        _ = (&mut ping_task) => {recv_task.abort();send_task.abort();},
        _ = (&mut send_task) => {ping_task.abort();recv_task.abort();},
        _ = (&mut recv_task) => {ping_task.abort();send_task.abort();},
    };
    info!("closing ws connection");
}

/// best effort, nothing happens when no client listens
#[inline]
pub fn send_control_message(sender: &Arc<Sender<ControlMessage>>, message: ControlMessage) {
    if sender.receiver_count() != 0 && sender.send(message).is_err() {
        info!("no receiver")
    };
}

#[inline]
pub fn send_control_messages(sender: &Arc<Sender<ControlMessage>>, messages: &[ControlMessage]) {
    for message in messages {
        send_control_message(sender, message.to_owned());
    }
}
