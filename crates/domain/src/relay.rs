//! 实时连接相关的值类型

/// 转发的原始帧，内容原样投递给其他参与者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl RelayFrame {
    pub fn len(&self) -> usize {
        match self {
            RelayFrame::Text(text) => text.len(),
            RelayFrame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 单个实时连接的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}
