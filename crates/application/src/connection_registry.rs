//! 实时连接注册表
//!
//! 聊天窗口ID到实时连接列表的并发安全映射。所有读写都经过同一把锁，
//! 广播方只拿到快照副本，注册/注销不会破坏正在进行的扇出。

use std::collections::HashMap;
use std::time::Duration;

use domain::{ChatWindowId, ConnectionId, RelayFrame, UserId};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// 单个连接上的写入错误，只影响该连接
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

/// 一个用户对一个聊天窗口的实时订阅
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub chat_window_id: ChatWindowId,
    outbound: mpsc::Sender<RelayFrame>,
}

impl LiveConnection {
    pub fn new(
        user_id: UserId,
        chat_window_id: ChatWindowId,
        outbound: mpsc::Sender<RelayFrame>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            chat_window_id,
            outbound,
        }
    }

    /// 在截止时间内把帧放入该连接的出站队列
    pub async fn send(&self, frame: RelayFrame, deadline: Duration) -> Result<(), RelayError> {
        match tokio::time::timeout(deadline, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RelayError::Closed),
            Err(_) => Err(RelayError::Timeout(deadline)),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    windows: RwLock<HashMap<ChatWindowId, Vec<LiveConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, chat_window_id: ChatWindowId, connection: LiveConnection) {
        let mut windows = self.windows.write().await;
        windows.entry(chat_window_id).or_default().push(connection);
    }

    /// 按连接ID注销；连接不存在时什么也不做。返回是否确实移除了连接。
    pub async fn unregister(&self, chat_window_id: ChatWindowId, connection_id: ConnectionId) -> bool {
        let mut windows = self.windows.write().await;
        let Some(connections) = windows.get_mut(&chat_window_id) else {
            return false;
        };

        let before = connections.len();
        connections.retain(|connection| connection.id != connection_id);
        let removed = connections.len() != before;

        if connections.is_empty() {
            windows.remove(&chat_window_id);
        }
        removed
    }

    /// 当前窗口内连接的副本
    pub async fn snapshot(&self, chat_window_id: ChatWindowId) -> Vec<LiveConnection> {
        let windows = self.windows.read().await;
        windows.get(&chat_window_id).cloned().unwrap_or_default()
    }

    pub async fn connection_count(&self, chat_window_id: ChatWindowId) -> usize {
        let windows = self.windows.read().await;
        windows.get(&chat_window_id).map_or(0, Vec::len)
    }

    pub async fn window_count(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn connection(window: ChatWindowId) -> (LiveConnection, mpsc::Receiver<RelayFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (LiveConnection::new(UserId::generate(), window, tx), rx)
    }

    #[tokio::test]
    async fn register_and_snapshot_preserve_order() {
        let registry = ConnectionRegistry::new();
        let window = ChatWindowId::generate();
        let (a, _rx_a) = connection(window);
        let (b, _rx_b) = connection(window);

        registry.register(window, a.clone()).await;
        registry.register(window, b.clone()).await;

        let ids: Vec<_> = registry.snapshot(window).await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(registry.connection_count(window).await, 2);
        assert!(registry.snapshot(ChatWindowId::generate()).await.is_empty());
    }

    #[tokio::test]
    async fn unregister_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        let window = ChatWindowId::generate();
        let (a, _rx) = connection(window);
        registry.register(window, a.clone()).await;

        assert!(!registry.unregister(window, ConnectionId::generate()).await);
        assert!(!registry.unregister(ChatWindowId::generate(), a.id).await);
        assert_eq!(registry.connection_count(window).await, 1);

        assert!(registry.unregister(window, a.id).await);
        assert!(!registry.unregister(window, a.id).await);
        assert_eq!(registry.window_count().await, 0);
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_changes() {
        let registry = ConnectionRegistry::new();
        let window = ChatWindowId::generate();
        let (a, _rx_a) = connection(window);
        let (b, _rx_b) = connection(window);
        registry.register(window, a.clone()).await;

        let snapshot = registry.snapshot(window).await;
        registry.register(window, b).await;
        registry.unregister(window, a.id).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, a.id);
    }

    #[tokio::test]
    async fn send_reports_timeout_and_closed() {
        let window = ChatWindowId::generate();
        let (tx, rx) = mpsc::channel(1);
        let conn = LiveConnection::new(UserId::generate(), window, tx);

        conn.send(RelayFrame::Text("first".into()), Duration::from_millis(20))
            .await
            .unwrap();
        let blocked = conn
            .send(RelayFrame::Text("second".into()), Duration::from_millis(20))
            .await;
        assert_eq!(blocked, Err(RelayError::Timeout(Duration::from_millis(20))));

        drop(rx);
        let closed = conn
            .send(RelayFrame::Text("third".into()), Duration::from_millis(20))
            .await;
        assert_eq!(closed, Err(RelayError::Closed));
    }

    /// 并发注册/注销与快照读取交错进行，最终状态必须恰好是“已注册且未注销”的集合。
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_unregister_keeps_exact_membership() {
        const CONNECTIONS: usize = 200;
        const BROADCASTS: usize = 300;

        let registry = Arc::new(ConnectionRegistry::new());
        let window = ChatWindowId::generate();

        let mut receivers = Vec::new();
        let mut connections = Vec::new();
        for _ in 0..CONNECTIONS {
            let (conn, rx) = connection(window);
            connections.push(conn);
            receivers.push(rx);
        }

        // 随机选择一半连接在注册后立即注销
        let mut rng = rand::rng();
        let mut order: Vec<usize> = (0..CONNECTIONS).collect();
        order.shuffle(&mut rng);
        let removed: HashSet<usize> = order[..CONNECTIONS / 2].iter().copied().collect();

        let mut tasks = Vec::new();
        for (index, conn) in connections.iter().cloned().enumerate() {
            let registry = registry.clone();
            let unregister = removed.contains(&index);
            let jitter = rng.random_range(0..3u64);
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                registry.register(window, conn.clone()).await;
                if unregister {
                    tokio::task::yield_now().await;
                    registry.unregister(window, conn.id).await;
                }
            }));
        }

        for _ in 0..BROADCASTS {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let snapshot = registry.snapshot(window).await;
                let unique: HashSet<_> = snapshot.iter().map(|c| c.id).collect();
                assert_eq!(unique.len(), snapshot.len(), "duplicated entry in snapshot");
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let expected: HashSet<ConnectionId> = connections
            .iter()
            .enumerate()
            .filter(|(index, _)| !removed.contains(index))
            .map(|(_, conn)| conn.id)
            .collect();
        let actual_list = registry.snapshot(window).await;
        let actual: HashSet<ConnectionId> = actual_list.iter().map(|c| c.id).collect();

        assert_eq!(actual_list.len(), expected.len());
        assert_eq!(actual, expected);
    }
}
