//! WebSocket 消息类型定义

use crate::server::events::TimestampedEvent;
use crate::uploader::{UploadItem, UploadStats};
use serde::{Deserialize, Serialize};

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// 心跳 Ping
    Ping {
        /// 客户端时间戳（毫秒）
        timestamp: i64,
    },
    /// 请求上传队列快照
    RequestSnapshot,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    /// 心跳 Pong
    Pong {
        /// 服务端时间戳（毫秒）
        timestamp: i64,
        /// 回显客户端时间戳（用于计算延迟）
        client_timestamp: Option<i64>,
    },
    /// 上传事件
    Event {
        #[serde(flatten)]
        event: TimestampedEvent,
    },
    /// 队列快照
    Snapshot {
        uploads: Vec<UploadItem>,
        stats: UploadStats,
    },
    /// 连接成功
    Connected {
        connection_id: String,
        timestamp: i64,
    },
    /// 客户端消费过慢，部分事件被丢弃，应重新拉取快照
    Lagged { skipped: u64 },
    /// 错误消息
    Error { code: String, message: String },
}

impl WsServerMessage {
    pub fn pong(client_timestamp: Option<i64>) -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
            client_timestamp,
        }
    }

    pub fn connected(connection_id: String) -> Self {
        Self::Connected {
            connection_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn event(event: TimestampedEvent) -> Self {
        Self::Event { event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::events::UploadEvent;

    #[test]
    fn test_client_message_parsing() {
        let json = r#"{"type":"ping","timestamp":1234567890}"#;
        let msg: WsClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            WsClientMessage::Ping { timestamp } => assert_eq!(timestamp, 1234567890),
            _ => panic!("Expected Ping message"),
        }

        let msg: WsClientMessage = serde_json::from_str(r#"{"type":"request_snapshot"}"#).unwrap();
        assert!(matches!(msg, WsClientMessage::RequestSnapshot));
    }

    #[test]
    fn test_event_message_is_flattened() {
        let event = TimestampedEvent::new(
            7,
            UploadEvent::Cancelled {
                task_id: "t1".to_string(),
            },
        );
        let value = serde_json::to_value(WsServerMessage::event(event)).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event_id"], 7);
        assert_eq!(value["event_type"], "cancelled");
        assert_eq!(value["task_id"], "t1");
    }
}
