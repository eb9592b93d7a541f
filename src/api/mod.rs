//! REST client for the chat endpoints of the operations backend.

use std::time::Duration;

use reqwest::{Response, multipart};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workchat::{
    conversations::Conversation,
    ids::{ConversationId, UserId},
    messages::Message,
    users::User,
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The backend refused the action for this user.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Status { status: 403, .. })
    }
}

/// Response of `POST /chat/upload`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_url: String,
    /// MIME type as detected by the file service
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Body of `PUT /chat/group/:id`. Absent fields are left unchanged by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_participants: Option<Vec<UserId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_participants: Option<Vec<UserId>>,
}

impl GroupUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.add_participants.is_none() && self.remove_participants.is_none()
    }
}

#[derive(Deserialize)]
struct GroupEnvelope {
    group: Conversation,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartChatRequest<'a> {
    receiver_id: &'a UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest<'a> {
    name: &'a str,
    participant_ids: &'a [UserId],
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /chat/conversations`
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/chat/conversations", &[]).await
    }

    /// `POST /chat/start`. The backend returns the existing conversation if there is one.
    pub async fn start_conversation(&self, receiver_id: &UserId) -> Result<Conversation, ApiError> {
        self.send_json(
            self.http.post(self.url("/chat/start")),
            &StartChatRequest { receiver_id },
        )
        .await
    }

    /// `POST /chat/group/create`
    pub async fn create_group(
        &self,
        name: &str,
        participant_ids: &[UserId],
    ) -> Result<Conversation, ApiError> {
        let envelope: GroupEnvelope = self
            .send_json(
                self.http.post(self.url("/chat/group/create")),
                &CreateGroupRequest {
                    name,
                    participant_ids,
                },
            )
            .await?;
        Ok(envelope.group)
    }

    /// `PUT /chat/group/:id`
    pub async fn update_group(
        &self,
        group_id: &ConversationId,
        update: &GroupUpdate,
    ) -> Result<Conversation, ApiError> {
        let envelope: GroupEnvelope = self
            .send_json(
                self.http
                    .put(self.url(&format!("/chat/group/{}", group_id))),
                update,
            )
            .await?;
        Ok(envelope.group)
    }

    /// `DELETE /chat/group/:id`
    pub async fn delete_group(&self, group_id: &ConversationId) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/chat/group/{}", group_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    /// `GET /chat/:conversationId/messages?page=`. Pages start at 1 with the newest messages.
    pub async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
    ) -> Result<Vec<Message>, ApiError> {
        self.get_json(
            &format!("/chat/{}/messages", conversation_id),
            &[("page", page.to_string())],
        )
        .await
    }

    /// `POST /chat/upload` as multipart with a single `file` part.
    pub async fn upload(
        &self,
        filename: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadedFile, ApiError> {
        tracing::info!(
            target: "workchat::api::upload",
            "Uploading {} ({} bytes, {})",
            filename,
            data.len(),
            mime_type
        );

        let part = multipart::Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(mime_type)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url("/chat/upload"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// `GET /users`
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get_json("/users", &[]).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = request.bearer_auth(&self.token).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::check_status(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            target: "workchat::api::check_status",
            "Request failed with status {}: {}",
            status,
            body
        );
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
