//! 领域模型错误定义
//!
//! 定义了在线位置与聊天窗口相关的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 验证错误（格式错误的ID、越界坐标、缺失的必填字段）
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 资源不存在错误
    #[error("资源不存在: {resource_type} {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    /// 资源状态不允许当前操作
    #[error("状态无效: {message}")]
    InvalidState { message: String },

    /// 资源冲突（例如重复的有效在线位置）
    #[error("资源冲突: {message}")]
    Conflict { message: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建资源不存在错误
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// 底层存储失败，真实原因只写入日志
    #[error("存储错误: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
