use std::sync::Arc;

use domain::{
    ChatRestriction, ChatWindow, ChatWindowId, DomainError, RestrictionId, UserId,
};
use tracing::info;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{ChatRestrictionRepository, ChatWindowRepository},
};

#[derive(Debug, Clone)]
pub struct CreateChatWindowRequest {
    pub participant_ids: Vec<String>,
    pub is_group: bool,
}

#[derive(Debug, Clone)]
pub struct BlockChatRequest {
    pub chat_window_id: String,
    pub restricted_by: String,
    pub restriction_type: String,
}

pub struct ChatWindowServiceDependencies {
    pub chat_window_repository: Arc<dyn ChatWindowRepository>,
    pub restriction_repository: Arc<dyn ChatRestrictionRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 聊天窗口与屏蔽记录的增查
pub struct ChatWindowService {
    deps: ChatWindowServiceDependencies,
}

impl ChatWindowService {
    pub fn new(deps: ChatWindowServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_window(
        &self,
        request: CreateChatWindowRequest,
    ) -> Result<ChatWindow, ApplicationError> {
        let participant_ids = request
            .participant_ids
            .iter()
            .map(|raw| {
                UserId::parse(raw).map_err(|_| {
                    DomainError::validation_error(
                        "participantIds",
                        format!("invalid participant id: {raw}"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let window = ChatWindow::new(
            ChatWindowId::generate(),
            participant_ids,
            request.is_group,
            self.deps.clock.now(),
        )?;
        let stored = self.deps.chat_window_repository.create(window).await?;

        info!(
            chat_window_id = %stored.id,
            participants = stored.participant_ids.len(),
            is_group = stored.is_group,
            "聊天窗口已创建"
        );
        Ok(stored)
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ChatWindow>, ApplicationError> {
        Ok(self
            .deps
            .chat_window_repository
            .list_by_participant(user_id)
            .await?)
    }

    /// 记录一条屏蔽。转发层不会读取这些记录。
    pub async fn block_chat(
        &self,
        request: BlockChatRequest,
    ) -> Result<ChatRestriction, ApplicationError> {
        let chat_window_id = ChatWindowId::parse(&request.chat_window_id)?;
        let restricted_by = UserId::parse(&request.restricted_by).map_err(|_| {
            DomainError::validation_error("restrictedBy", "malformed id")
        })?;

        let window = self
            .deps
            .chat_window_repository
            .find_by_id(chat_window_id)
            .await?
            .ok_or_else(|| DomainError::not_found("chat window", chat_window_id))?;

        let restriction = ChatRestriction::new(
            RestrictionId::generate(),
            window.id,
            request.restriction_type,
            restricted_by,
            self.deps.clock.now(),
        )?;
        let stored = self.deps.restriction_repository.create(restriction).await?;

        info!(
            chat_window_id = %stored.chat_window_id,
            restricted_by = %stored.restricted_by,
            restriction_type = %stored.restriction_type,
            "聊天屏蔽已记录"
        );
        Ok(stored)
    }
}
