use std::path::Path;

use crate::connection::protocol::{OutboundCommand, SendMessagePayload};
use crate::error::{Result, WorkchatError};
use crate::workchat::{Workchat, ids::MessageId, messages::MessageKind};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A file the user picked for sending.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// Declared MIME type. When absent it is sniffed from the content.
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: None,
            data,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Reads a file from disk, named after its last path component.
    ///
    /// Files larger than `max_bytes` are refused before any of their content is read.
    pub async fn from_path(path: &Path, max_bytes: u64) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        check_upload_size(metadata.len(), max_bytes)?;
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self::new(filename, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Declared type first, then content sniffing, then a generic binary type.
    pub fn resolved_mime_type(&self) -> String {
        self.mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .or_else(|| infer::get(&self.data).map(|kind| kind.mime_type().to_string()))
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

pub(crate) fn check_upload_size(size: u64, max: u64) -> Result<()> {
    if size > max {
        return Err(WorkchatError::AttachmentTooLarge { size, max });
    }
    Ok(())
}

impl Workchat {
    /// Uploads a file and sends it as a message to the open conversation.
    ///
    /// Oversized files are refused before anything is uploaded. If the upload
    /// fails no message is sent.
    pub async fn send_attachment(
        &self,
        attachment: Attachment,
        reply_to_id: Option<MessageId>,
    ) -> Result<()> {
        let result = self.send_attachment_inner(attachment, reply_to_id).await;
        self.surface("send_attachment", result)
    }

    async fn send_attachment_inner(
        &self,
        attachment: Attachment,
        reply_to_id: Option<MessageId>,
    ) -> Result<()> {
        let conversation_id = self.require_active_conversation().await?;
        check_upload_size(attachment.size(), self.config.max_upload_bytes)?;
        let _in_flight = self.begin_in_flight(format!(
            "send_attachment:{}:{}:{}",
            conversation_id,
            attachment.filename,
            attachment.size()
        ))?;

        let local_mime_type = attachment.resolved_mime_type();
        let Attachment { filename, data, .. } = attachment;
        let uploaded = self.api.upload(&filename, &local_mime_type, data).await?;

        let kind = MessageKind::from_mime_type(
            uploaded
                .mime_type
                .as_deref()
                .unwrap_or(local_mime_type.as_str()),
        );
        tracing::debug!(
            target: "workchat::dispatcher::send_attachment",
            "Uploaded {} as {:?} to {}",
            filename,
            kind,
            uploaded.file_url
        );

        self.emit(OutboundCommand::SendMessage(SendMessagePayload {
            conversation_id,
            sender_id: self.session.user_id.clone(),
            content: Some(filename),
            kind,
            file_url: Some(uploaded.file_url),
            reply_to_id,
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::workchat::config::DEFAULT_MAX_UPLOAD_BYTES;
    use crate::workchat::conversations::test_fixtures::make_personal;
    use crate::workchat::ids::ConversationId;
    use crate::workchat::test_utils::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_upload_size_limit() {
        const MIB: u64 = 1024 * 1024;
        assert!(matches!(
            check_upload_size(101 * MIB, DEFAULT_MAX_UPLOAD_BYTES),
            Err(WorkchatError::AttachmentTooLarge { .. })
        ));
        assert!(check_upload_size(99 * MIB, DEFAULT_MAX_UPLOAD_BYTES).is_ok());
        assert!(check_upload_size(DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MAX_UPLOAD_BYTES).is_ok());
    }

    #[test]
    fn test_resolved_mime_type() {
        let declared = Attachment::new("a.bin", PNG_MAGIC.to_vec()).with_mime_type("text/csv");
        assert_eq!(declared.resolved_mime_type(), "text/csv");

        let sniffed = Attachment::new("a.bin", PNG_MAGIC.to_vec());
        assert_eq!(sniffed.resolved_mime_type(), "image/png");

        let unknown = Attachment::new("notes", b"plain words".to_vec());
        assert_eq!(unknown.resolved_mime_type(), FALLBACK_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        tokio::fs::write(&path, PNG_MAGIC).await.unwrap();

        let attachment = Attachment::from_path(&path, DEFAULT_MAX_UPLOAD_BYTES)
            .await
            .unwrap();

        assert_eq!(attachment.filename, "photo.png");
        assert_eq!(attachment.size(), 8);
    }

    #[tokio::test]
    async fn test_from_path_refuses_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        let file = tokio::fs::File::create(&path).await.unwrap();
        // Sparse file: the length is set without writing any content
        file.set_len(64 * 1024).await.unwrap();

        let result = Attachment::from_path(&path, 1024).await;

        assert!(matches!(
            result,
            Err(WorkchatError::AttachmentTooLarge { size: 65536, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_send_attachment_uploads_then_emits() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/upload")
            .match_header(
                "content-type",
                Matcher::Regex("multipart/form-data".to_string()),
            )
            .with_status(200)
            .with_body(
                json!({"fileUrl": "https://files.example/photo.png", "type": "image/png"})
                    .to_string(),
            )
            .create_async()
            .await;
        let (workchat, mut outbound, _logs) = create_mock_workchat(&server.url()).await;
        open_locally(&workchat, vec![make_personal("c1", "me", "alice")], "c1").await;

        workchat
            .send_attachment(Attachment::new("photo.png", PNG_MAGIC.to_vec()), None)
            .await
            .unwrap();

        mock.assert_async().await;
        match outbound.try_recv().unwrap() {
            OutboundCommand::SendMessage(payload) => {
                assert_eq!(payload.conversation_id, ConversationId::from("c1"));
                assert_eq!(payload.kind, MessageKind::Image);
                assert_eq!(payload.content.as_deref(), Some("photo.png"));
                assert_eq!(
                    payload.file_url.as_deref(),
                    Some("https://files.example/photo.png")
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_attachment_never_uploads() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/upload")
            .expect(0)
            .create_async()
            .await;
        let (workchat, mut outbound, _logs) =
            create_mock_workchat_with(&server.url(), |config| config.max_upload_bytes = 4, None)
                .await;
        open_locally(&workchat, vec![make_personal("c1", "me", "alice")], "c1").await;

        let err = workchat
            .send_attachment(Attachment::new("photo.png", PNG_MAGIC.to_vec()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WorkchatError::AttachmentTooLarge { size: 8, max: 4 }
        ));
        assert_eq!(err.category(), ErrorCategory::Validation);
        mock.assert_async().await;
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_upload_sends_nothing() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/upload")
            .with_status(413)
            .with_body("too big")
            .create_async()
            .await;
        let (workchat, mut outbound, _logs) = create_mock_workchat(&server.url()).await;
        open_locally(&workchat, vec![make_personal("c1", "me", "alice")], "c1").await;

        let err = workchat
            .send_attachment(Attachment::new("report.pdf", b"%PDF-1.7".to_vec()), None)
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(outbound.try_recv().is_err());
    }
}
