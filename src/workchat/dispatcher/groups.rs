use std::collections::HashSet;

use crate::api::GroupUpdate;
use crate::error::{Result, WorkchatError};
use crate::workchat::{
    Workchat,
    conversations::Conversation,
    ids::{ConversationId, UserId},
};

/// Drops repeated ids and, optionally, `exclude`, keeping first occurrences in order.
fn normalize_members(members: &[UserId], exclude: Option<&UserId>) -> Vec<UserId> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter(|id| Some(*id) != exclude)
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

fn validated_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WorkchatError::InvalidGroup("group name cannot be empty".to_string()));
    }
    Ok(name.to_string())
}

impl Workchat {
    /// Creates a group with the current user as creator.
    ///
    /// `participants` may contain duplicates or the current user; both are dropped
    /// before the request is sent.
    pub async fn create_group(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> Result<Conversation> {
        let result = self.create_group_inner(name, participants).await;
        self.surface("create_group", result)
    }

    async fn create_group_inner(
        &self,
        name: &str,
        participants: &[UserId],
    ) -> Result<Conversation> {
        let name = validated_name(name)?;
        let participants = normalize_members(participants, Some(&self.session.user_id));
        if participants.is_empty() {
            return Err(WorkchatError::InvalidGroup(
                "a group needs at least one other participant".to_string(),
            ));
        }

        let mut fingerprint: Vec<&str> = participants.iter().map(UserId::as_str).collect();
        fingerprint.sort_unstable();
        let _in_flight =
            self.begin_in_flight(format!("create_group:{}:{}", name, fingerprint.join(",")))?;

        let group = self.api.create_group(&name, &participants).await?;
        tracing::info!(
            target: "workchat::dispatcher::create_group",
            "Created group {} with {} participants",
            group.id,
            group.participants.len()
        );
        Ok(self.store_conversation(group).await)
    }

    pub async fn rename_group(
        &self,
        group_id: &ConversationId,
        name: &str,
    ) -> Result<Conversation> {
        let result = async {
            let update = GroupUpdate {
                name: Some(validated_name(name)?),
                ..Default::default()
            };
            self.mutate_group(group_id, update).await
        }
        .await;
        self.surface("rename_group", result)
    }

    pub async fn add_group_members(
        &self,
        group_id: &ConversationId,
        members: &[UserId],
    ) -> Result<Conversation> {
        let result = async {
            let members = normalize_members(members, None);
            if members.is_empty() {
                return Err(WorkchatError::InvalidGroup("no members to add".to_string()));
            }
            let update = GroupUpdate {
                add_participants: Some(members),
                ..Default::default()
            };
            self.mutate_group(group_id, update).await
        }
        .await;
        self.surface("add_group_members", result)
    }

    pub async fn remove_group_members(
        &self,
        group_id: &ConversationId,
        members: &[UserId],
    ) -> Result<Conversation> {
        let result = async {
            let members = normalize_members(members, None);
            if members.is_empty() {
                return Err(WorkchatError::InvalidGroup("no members to remove".to_string()));
            }
            let update = GroupUpdate {
                remove_participants: Some(members),
                ..Default::default()
            };
            self.mutate_group(group_id, update).await
        }
        .await;
        self.surface("remove_group_members", result)
    }

    /// Deletes a group. On success it leaves the store, and the message log if it was open.
    pub async fn delete_group(&self, group_id: &ConversationId) -> Result<()> {
        let result = async {
            self.require_group(group_id).await?;
            let _in_flight = self.begin_in_flight(format!("group:{}", group_id))?;
            self.api.delete_group(group_id).await?;

            let mut state = self.state.write().await;
            let updates = state.remove_conversation(group_id);
            self.streams.publish_all(updates);
            tracing::info!(
                target: "workchat::dispatcher::delete_group",
                "Deleted group {}",
                group_id
            );
            Ok(())
        }
        .await;
        self.surface("delete_group", result)
    }

    /// Sends `update` and replaces the local group with the server's answer.
    /// Nothing changes locally when the request fails.
    async fn mutate_group(
        &self,
        group_id: &ConversationId,
        update: GroupUpdate,
    ) -> Result<Conversation> {
        self.require_group(group_id).await?;
        let _in_flight = self.begin_in_flight(format!("group:{}", group_id))?;

        let group = self.api.update_group(group_id, &update).await?;
        tracing::debug!(
            target: "workchat::dispatcher::mutate_group",
            "Group {} now has {} participants",
            group.id,
            group.participants.len()
        );
        Ok(self.store_conversation(group).await)
    }

    async fn require_group(&self, group_id: &ConversationId) -> Result<()> {
        let state = self.state.read().await;
        match state.conversations.get(group_id) {
            None => Err(WorkchatError::ConversationNotFound(group_id.clone())),
            Some(conversation) if !conversation.is_group() => Err(WorkchatError::InvalidGroup(
                format!("{} is a personal conversation", group_id),
            )),
            Some(_) => Ok(()),
        }
    }
}
