//! WebSocket 模块
//!
//! 向浏览器实时推送上传事件

mod handler;
mod message;

pub use handler::handle_websocket;
pub use message::{WsClientMessage, WsServerMessage};
