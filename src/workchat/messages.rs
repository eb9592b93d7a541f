use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workchat::ids::{ConversationId, MessageId, UserId};

/// Content shown in place of a message after it has been deleted.
pub const DELETED_MESSAGE_MARKER: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    #[serde(alias = "file")]
    Document,
    Location,
}

impl MessageKind {
    /// Maps an uploaded file's MIME type onto the message kind it is sent as.
    pub fn from_mime_type(mime_type: &str) -> Self {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if mime_type.starts_with("image/") {
            MessageKind::Image
        } else if mime_type.starts_with("video/") {
            MessageKind::Video
        } else {
            MessageKind::Document
        }
    }

    pub fn is_attachment(&self) -> bool {
        matches!(
            self,
            MessageKind::Image | MessageKind::Video | MessageKind::Document
        )
    }
}

/// A chat message as the server delivers it.
///
/// Deleted messages stay in the log: `is_deleted` is set and the content is
/// replaced with [`DELETED_MESSAGE_MARKER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(
        rename = "fileUrl",
        alias = "attachmentRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachment_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Message {
    /// Text used for sidebar previews.
    pub fn preview_text(&self) -> Option<String> {
        if self.is_deleted {
            return Some(DELETED_MESSAGE_MARKER.to_string());
        }
        match (&self.content, self.kind) {
            (Some(content), _) if !content.is_empty() => Some(content.clone()),
            (_, MessageKind::Image) => Some("Photo".to_string()),
            (_, MessageKind::Video) => Some("Video".to_string()),
            (_, MessageKind::Document) => Some("File".to_string()),
            (_, MessageKind::Location) => Some("Location".to_string()),
            _ => None,
        }
    }
}

/// Field-level update applied to a message already in the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<Option<String>>,
    pub is_edited: Option<bool>,
    pub is_deleted: Option<bool>,
    pub attachment_ref: Option<Option<String>>,
}

impl MessagePatch {
    pub fn edited(content: impl Into<String>) -> Self {
        Self {
            content: Some(Some(content.into())),
            is_edited: Some(true),
            ..Default::default()
        }
    }

    pub fn deleted() -> Self {
        Self {
            content: Some(Some(DELETED_MESSAGE_MARKER.to_string())),
            is_deleted: Some(true),
            ..Default::default()
        }
    }

    /// Deleted messages keep the deletion marker: content and edit flag are frozen.
    fn apply(&self, message: &mut Message) {
        if !message.is_deleted {
            if let Some(content) = &self.content {
                message.content = content.clone();
            }
            if let Some(is_edited) = self.is_edited {
                message.is_edited = is_edited;
            }
        }
        if let Some(is_deleted) = self.is_deleted {
            message.is_deleted = is_deleted;
        }
        if let Some(attachment_ref) = &self.attachment_ref {
            message.attachment_ref = attachment_ref.clone();
        }
    }
}

/// Ordered log of the open conversation's messages.
///
/// Order is arrival order. The store never sorts: the server pushes a single
/// conversation's messages in creation order over one connection.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    conversation_id: Option<ConversationId>,
    messages: Vec<Message>,
    positions: HashMap<MessageId, usize>,
}

impl MessageStore {
    /// The conversation whose log this is.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Empties the log and points it at another conversation (or none).
    pub fn reset(&mut self, conversation_id: Option<ConversationId>) {
        self.conversation_id = conversation_id;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.positions.clear();
    }

    /// Replaces the whole log. Repeated ids in `messages` keep their first occurrence.
    pub fn set_all(&mut self, messages: Vec<Message>) {
        self.clear();
        for message in messages {
            self.append(message);
        }
    }

    /// Adds `message` at the end unless a message with the same id is already present.
    ///
    /// Returns `true` if the log changed.
    pub fn append(&mut self, message: Message) -> bool {
        if self.positions.contains_key(&message.id) {
            return false;
        }
        self.positions
            .insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }

    /// Inserts an older page in front of the log, skipping ids already present.
    ///
    /// Returns the messages that were actually inserted.
    pub fn prepend_history(&mut self, older: Vec<Message>) -> Vec<Message> {
        let mut inserted: Vec<Message> = Vec::with_capacity(older.len());
        for message in older {
            if self.positions.contains_key(&message.id)
                || inserted.iter().any(|m| m.id == message.id)
            {
                continue;
            }
            inserted.push(message);
        }
        if inserted.is_empty() {
            return inserted;
        }

        let mut log = inserted.clone();
        log.append(&mut self.messages);
        self.messages = log;
        self.reindex();
        inserted
    }

    /// Applies `patch` in place. Unknown ids are ignored.
    pub fn patch(&mut self, id: &MessageId, patch: &MessagePatch) -> Option<&Message> {
        let position = *self.positions.get(id)?;
        let message = self.messages.get_mut(position)?;
        patch.apply(message);
        Some(&*message)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.positions
            .get(id)
            .and_then(|position| self.messages.get(*position))
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn reindex(&mut self) {
        self.positions = self
            .messages
            .iter()
            .enumerate()
            .map(|(position, message)| (message.id.clone(), position))
            .collect();
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::make_message;
    use super::*;

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_append_same_id_twice_keeps_first() {
        let mut store = MessageStore::default();
        let first = make_message("42", "c1", "u1");
        let mut duplicate = make_message("42", "c1", "u1");
        duplicate.content = Some("redelivered".to_string());

        assert!(store.append(first));
        assert!(!store.append(duplicate));

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&MessageId::from("42")).unwrap().content.as_deref(),
            Some("message 42")
        );
    }

    #[test]
    fn test_append_keeps_arrival_order() {
        let mut store = MessageStore::default();
        let mut late = make_message("b", "c1", "u1");
        late.created_at = chrono::DateTime::<Utc>::MIN_UTC;
        store.append(make_message("a", "c1", "u1"));
        store.append(late);
        store.append(make_message("c", "c1", "u1"));

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_all_replaces_log() {
        let mut store = MessageStore::default();
        store.append(make_message("old", "c1", "u1"));

        store.set_all(vec![
            make_message("1", "c1", "u1"),
            make_message("2", "c1", "u2"),
            make_message("1", "c1", "u1"),
        ]);

        assert_eq!(ids(&store), vec!["1", "2"]);
        assert!(!store.contains(&MessageId::from("old")));
    }

    #[test]
    fn test_reset_retargets_and_clears() {
        let mut store = MessageStore::default();
        store.reset(Some(ConversationId::from("c1")));
        store.append(make_message("1", "c1", "u1"));

        store.reset(Some(ConversationId::from("c2")));

        assert!(store.is_empty());
        assert_eq!(store.conversation_id(), Some(&ConversationId::from("c2")));
    }

    #[test]
    fn test_soft_delete_preserves_id_and_created_at() {
        let mut store = MessageStore::default();
        let original = make_message("7", "c1", "u1");
        let created_at = original.created_at;
        store.append(original);

        store.patch(&MessageId::from("7"), &MessagePatch::deleted());

        let deleted = store.get(&MessageId::from("7")).unwrap();
        assert_eq!(deleted.id, MessageId::from("7"));
        assert!(deleted.is_deleted);
        assert_eq!(deleted.created_at, created_at);
        assert_eq!(deleted.content.as_deref(), Some(DELETED_MESSAGE_MARKER));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_patch_edit_marks_edited() {
        let mut store = MessageStore::default();
        store.append(make_message("1", "c1", "u1"));

        let patched = store
            .patch(&MessageId::from("1"), &MessagePatch::edited("fixed typo"))
            .unwrap();

        assert_eq!(patched.content.as_deref(), Some("fixed typo"));
        assert!(patched.is_edited);
        assert!(!patched.is_deleted);
    }

    #[test]
    fn test_edit_after_delete_keeps_marker() {
        let mut store = MessageStore::default();
        store.append(make_message("7", "c1", "u1"));
        store.patch(&MessageId::from("7"), &MessagePatch::deleted());

        let patched = store
            .patch(&MessageId::from("7"), &MessagePatch::edited("secret"))
            .unwrap();

        assert!(patched.is_deleted);
        assert!(!patched.is_edited);
        assert_eq!(patched.content.as_deref(), Some(DELETED_MESSAGE_MARKER));
    }

    #[test]
    fn test_patch_unknown_id_is_noop() {
        let mut store = MessageStore::default();
        store.append(make_message("1", "c1", "u1"));

        assert!(
            store
                .patch(&MessageId::from("missing"), &MessagePatch::deleted())
                .is_none()
        );
        assert_eq!(store.len(), 1);
        assert!(!store.messages()[0].is_deleted);
    }

    #[test]
    fn test_prepend_history_skips_known_ids() {
        let mut store = MessageStore::default();
        store.append(make_message("3", "c1", "u1"));
        store.append(make_message("4", "c1", "u1"));

        let inserted = store.prepend_history(vec![
            make_message("1", "c1", "u1"),
            make_message("2", "c1", "u1"),
            make_message("3", "c1", "u1"),
        ]);

        assert_eq!(inserted.len(), 2);
        assert_eq!(ids(&store), vec!["1", "2", "3", "4"]);
        // Index still resolves after the shift
        assert_eq!(
            store.get(&MessageId::from("4")).unwrap().id,
            MessageId::from("4")
        );
        store.patch(&MessageId::from("4"), &MessagePatch::edited("x"));
        assert_eq!(store.messages()[3].content.as_deref(), Some("x"));
    }

    #[test]
    fn test_kind_from_mime_type() {
        assert_eq!(MessageKind::from_mime_type("image/png"), MessageKind::Image);
        assert_eq!(MessageKind::from_mime_type("Video/MP4"), MessageKind::Video);
        assert_eq!(
            MessageKind::from_mime_type("application/pdf"),
            MessageKind::Document
        );
        assert_eq!(MessageKind::from_mime_type(""), MessageKind::Document);
    }

    #[test]
    fn test_message_deserializes_wire_shape() {
        let json = r#"{
            "id": 42,
            "conversationId": "c1",
            "senderId": 5,
            "content": null,
            "type": "image",
            "fileUrl": "https://files.example/a.png",
            "replyToId": "41",
            "createdAt": "2024-05-01T10:00:00Z"
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();

        assert_eq!(message.id, MessageId::from("42"));
        assert_eq!(message.sender_id, UserId::from("5"));
        assert_eq!(message.kind, MessageKind::Image);
        assert_eq!(
            message.attachment_ref.as_deref(),
            Some("https://files.example/a.png")
        );
        assert_eq!(message.reply_to_id, Some(MessageId::from("41")));
        assert!(message.content.is_none());
        assert!(!message.is_edited);
        assert!(!message.is_deleted);
    }

    #[test]
    fn test_preview_text() {
        let mut message = make_message("1", "c1", "u1");
        assert_eq!(message.preview_text().as_deref(), Some("message 1"));

        message.content = None;
        message.kind = MessageKind::Image;
        assert_eq!(message.preview_text().as_deref(), Some("Photo"));

        message.is_deleted = true;
        assert_eq!(
            message.preview_text().as_deref(),
            Some(DELETED_MESSAGE_MARKER)
        );
    }
}
