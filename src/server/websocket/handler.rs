//! WebSocket 路由处理器

use crate::server::websocket::message::{WsClientMessage, WsServerMessage};
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 单连接待发送的应答缓冲
const REPLY_BUFFER: usize = 32;

/// WebSocket 路由处理器
///
/// 升级 HTTP 连接为 WebSocket，推送上传事件
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 处理 WebSocket 连接
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!("新的 WebSocket 连接: {}", connection_id);

    // 先订阅再发送 Connected，避免漏掉握手期间的事件
    let mut events = state.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    if send_json(&mut sender, &WsServerMessage::connected(connection_id.clone()))
        .await
        .is_err()
    {
        error!("发送连接成功消息失败: {}", connection_id);
        return;
    }

    let (reply_tx, mut reply_rx) = mpsc::channel::<WsServerMessage>(REPLY_BUFFER);

    // 发送任务：事件广播 + 对客户端请求的应答
    let send_conn_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => WsServerMessage::event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket 连接消费过慢，丢弃 {} 个事件: {}", skipped, send_conn_id);
                        WsServerMessage::Lagged { skipped }
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if send_json(&mut sender, &message).await.is_err() {
                break;
            }
        }
    });

    let state_recv = state.clone();
    let conn_id_recv = connection_id.clone();

    // 接收任务
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Message::Ping(_) | Message::Pong(_) => {
                    debug!("收到心跳帧: {}", conn_id_recv);
                    continue;
                }
                Message::Close(_) => {
                    info!("收到关闭消息: {}", conn_id_recv);
                    break;
                }
            };

            let reply = handle_client_message(&state_recv, &conn_id_recv, &text);
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    });

    // 等待任一任务结束
    tokio::select! {
        _ = &mut send_task => {
            debug!("发送任务结束: {}", connection_id);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("接收任务结束: {}", connection_id);
            send_task.abort();
        }
    }

    info!("WebSocket 连接已关闭: {}", connection_id);
}

async fn send_json<S>(sender: &mut S, message: &WsServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("序列化消息失败: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await.map_err(|_| ())
}

/// 处理客户端消息，返回应答
fn handle_client_message(state: &AppState, connection_id: &str, text: &str) -> WsServerMessage {
    match serde_json::from_str::<WsClientMessage>(text) {
        Ok(WsClientMessage::Ping { timestamp }) => WsServerMessage::pong(Some(timestamp)),
        Ok(WsClientMessage::RequestSnapshot) => {
            debug!("收到状态快照请求: {}", connection_id);
            snapshot(state)
        }
        Err(e) => {
            warn!("解析客户端消息失败: {} - {}", connection_id, e);
            WsServerMessage::error("PARSE_ERROR", format!("消息解析失败: {}", e))
        }
    }
}

/// 当前上传队列快照
fn snapshot(state: &AppState) -> WsServerMessage {
    WsServerMessage::Snapshot {
        uploads: state.upload_manager.get_all(),
        stats: state.upload_manager.stats(),
    }
}
