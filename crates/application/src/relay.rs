//! 聊天消息转发
//!
//! 每收到一帧都重新读取聊天窗口的参与者，再把原始帧扇出给同一窗口内的其他连接。
//! 转发只负责传输，不做任何持久化。

use std::sync::Arc;
use std::time::Duration;

use domain::{ChatWindowId, ConnectionState, RelayFrame, UserId};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection_registry::{ConnectionRegistry, LiveConnection};
use crate::repository::ChatWindowRepository;

pub use crate::connection_registry::RelayError;

/// 转发参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// 单个接收方的写入截止时间
    pub send_timeout: Duration,
    /// 查询聊天窗口的截止时间
    pub lookup_timeout: Duration,
    /// 每个连接的出站队列容量
    pub outbound_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
        }
    }
}

impl From<&config::RelayConfig> for RelaySettings {
    fn from(value: &config::RelayConfig) -> Self {
        Self {
            send_timeout: value.send_timeout(),
            lookup_timeout: value.lookup_timeout(),
            outbound_buffer: value.outbound_buffer,
        }
    }
}

/// 帧被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    WindowNotFound,
    LookupFailed,
    LookupTimedOut,
    /// 会话尚未打开或已经关闭
    SessionNotOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Dropped(DropReason),
    Delivered { delivered: usize, failed: usize },
}

pub struct ChatRelay {
    registry: Arc<ConnectionRegistry>,
    chat_windows: Arc<dyn ChatWindowRepository>,
    settings: RelaySettings,
}

impl ChatRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        chat_windows: Arc<dyn ChatWindowRepository>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry,
            chat_windows,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 将 `from` 收到的一帧转发给同窗口的其他有效参与者。
    ///
    /// 窗口查询失败只丢弃这一帧；单个接收方写入失败只记录日志，不影响其他接收方。
    pub async fn relay(&self, from: &LiveConnection, frame: RelayFrame) -> RelayOutcome {
        let chat_window_id = from.chat_window_id;
        let lookup = tokio::time::timeout(
            self.settings.lookup_timeout,
            self.chat_windows.find_by_id(chat_window_id),
        )
        .await;

        let window = match lookup {
            Ok(Ok(Some(window))) => window,
            Ok(Ok(None)) => {
                warn!(chat_window_id = %chat_window_id, "聊天窗口不存在，丢弃消息");
                return RelayOutcome::Dropped(DropReason::WindowNotFound);
            }
            Ok(Err(err)) => {
                warn!(chat_window_id = %chat_window_id, error = %err, "查询聊天窗口失败，丢弃消息");
                return RelayOutcome::Dropped(DropReason::LookupFailed);
            }
            Err(_) => {
                warn!(
                    chat_window_id = %chat_window_id,
                    timeout_ms = self.settings.lookup_timeout.as_millis() as u64,
                    "查询聊天窗口超时，丢弃消息"
                );
                return RelayOutcome::Dropped(DropReason::LookupTimedOut);
            }
        };

        // 只按接收方过滤，发送方是否仍在窗口内不影响转发
        let participants = window.participant_set();
        let recipients: Vec<LiveConnection> = self
            .registry
            .snapshot(chat_window_id)
            .await
            .into_iter()
            .filter(|conn| conn.id != from.id && participants.contains(&conn.user_id))
            .collect();

        let deadline = self.settings.send_timeout;
        let sends = recipients.iter().map(|conn| {
            let frame = frame.clone();
            async move { (conn, conn.send(frame, deadline).await) }
        });

        let mut delivered = 0;
        let mut failed = 0;
        for (conn, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    failed += 1;
                    warn!(
                        chat_window_id = %chat_window_id,
                        user_id = %conn.user_id,
                        connection_id = %conn.id,
                        error = %err,
                        "转发消息失败"
                    );
                }
            }
        }

        debug!(
            chat_window_id = %chat_window_id,
            delivered,
            failed,
            bytes = frame.len(),
            "消息转发完成"
        );
        RelayOutcome::Delivered { delivered, failed }
    }
}

/// 单个实时连接的会话状态机：`Connecting → Open → Closing → Closed`。
///
/// 注销只在从 `Open` 离开时发生一次；会话被直接丢弃时由 `Drop` 补做注销。
pub struct RelaySession {
    relay: Arc<ChatRelay>,
    connection: LiveConnection,
    state: ConnectionState,
}

impl RelaySession {
    /// 创建处于 `Connecting` 状态的会话，返回出站帧的接收端供写任务使用
    pub fn new(
        relay: Arc<ChatRelay>,
        user_id: UserId,
        chat_window_id: ChatWindowId,
    ) -> (Self, mpsc::Receiver<RelayFrame>) {
        let (outbound, receiver) = mpsc::channel(relay.settings.outbound_buffer.max(1));
        let session = Self {
            connection: LiveConnection::new(user_id, chat_window_id, outbound),
            relay,
            state: ConnectionState::Connecting,
        };
        (session, receiver)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> &LiveConnection {
        &self.connection
    }

    pub async fn open(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.relay
            .registry
            .register(self.connection.chat_window_id, self.connection.clone())
            .await;
        self.state = ConnectionState::Open;
        info!(
            user_id = %self.connection.user_id,
            chat_window_id = %self.connection.chat_window_id,
            connection_id = %self.connection.id,
            "实时连接已打开"
        );
    }

    pub async fn handle_frame(&self, frame: RelayFrame) -> RelayOutcome {
        if self.state != ConnectionState::Open {
            return RelayOutcome::Dropped(DropReason::SessionNotOpen);
        }
        self.relay.relay(&self.connection, frame).await
    }

    /// 关闭会话。返回本次调用是否执行了注销。
    pub async fn close(&mut self) -> bool {
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                let removed = self
                    .relay
                    .registry
                    .unregister(self.connection.chat_window_id, self.connection.id)
                    .await;
                self.state = ConnectionState::Closed;
                info!(
                    user_id = %self.connection.user_id,
                    chat_window_id = %self.connection.chat_window_id,
                    connection_id = %self.connection.id,
                    "实时连接已关闭"
                );
                removed
            }
            ConnectionState::Connecting => {
                self.state = ConnectionState::Closed;
                false
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Closing) {
            self.state = ConnectionState::Closed;
            let registry = self.relay.registry.clone();
            let chat_window_id = self.connection.chat_window_id;
            let connection_id = self.connection.id;
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    registry.unregister(chat_window_id, connection_id).await;
                });
            } else {
                warn!(connection_id = %connection_id, "运行时不可用，连接未能注销");
            }
        }
    }
}
