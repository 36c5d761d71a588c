use std::sync::Arc;

use application::{ChatRelay, RelaySession};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ChatWindowId, RelayFrame, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// 单个聊天窗口 WebSocket 连接
///
/// 读循环在当前任务中运行并持有会话；写任务只负责把出站队列中的帧写回套接字。
/// 任意一方结束后会话关闭，连接从注册表中注销。
pub struct WebSocketConnection {
    socket: WebSocket,
    session: RelaySession,
    outbound: mpsc::Receiver<RelayFrame>,
}

impl WebSocketConnection {
    /// 注册连接并进入 `Open` 状态
    pub async fn open(
        socket: WebSocket,
        relay: Arc<ChatRelay>,
        user_id: UserId,
        chat_window_id: ChatWindowId,
    ) -> Self {
        let (mut session, outbound) = RelaySession::new(relay, user_id, chat_window_id);
        session.open().await;
        Self {
            socket,
            session,
            outbound,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            mut session,
            mut outbound,
        } = self;
        let (mut sender, mut incoming) = socket.split();
        let user_id = session.connection().user_id;
        let chat_window_id = session.connection().chat_window_id;

        // 发送任务：出站帧原样写回
        let mut send_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let message = match frame {
                    RelayFrame::Text(text) => WsMessage::Text(text.into()),
                    RelayFrame::Binary(data) => WsMessage::Binary(data.into()),
                };
                if let Err(err) = sender.send(message).await {
                    tracing::warn!(error = %err, "WebSocket写入失败");
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let session_ref = &session;
        let read_loop = async move {
            while let Some(message) = incoming.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::debug!(error = %err, "WebSocket读取失败");
                        break;
                    }
                };
                let frame = match message {
                    WsMessage::Text(text) => RelayFrame::Text(text.as_str().to_owned()),
                    WsMessage::Binary(data) => RelayFrame::Binary(data.to_vec()),
                    WsMessage::Close(_) => {
                        tracing::debug!("WebSocket收到关闭消息");
                        break;
                    }
                    // 心跳由底层协议栈应答
                    WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                };
                session_ref.handle_frame(frame).await;
            }
        };

        tokio::select! {
            _ = read_loop => {
                tracing::debug!("WebSocket接收循环结束");
            }
            _ = &mut send_task => {
                tracing::debug!("WebSocket发送任务结束");
            }
        }

        session.close().await;
        send_task.abort();

        tracing::info!(
            user_id = %user_id,
            chat_window_id = %chat_window_id,
            "WebSocket连接已断开"
        );
    }
}
