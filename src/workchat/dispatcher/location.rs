use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::protocol::{OutboundCommand, SendMessagePayload};
use crate::error::Result;
use crate::workchat::{Workchat, messages::MessageKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Geolocation is not supported on this device")]
    Unsupported,

    #[error("Timed out waiting for a position fix")]
    Timeout,

    #[error("Position unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid coordinates")]
    InvalidCoordinates,
}

/// A one-shot position fix in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64) -> core::result::Result<Self, LocationError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::InvalidCoordinates);
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Message content for a location message: `"lat,lng"`.
    pub fn to_content(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GeoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

impl FromStr for GeoPosition {
    type Err = LocationError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let (latitude, longitude) = s.split_once(',').ok_or(LocationError::InvalidCoordinates)?;
        let latitude = latitude
            .trim()
            .parse::<f64>()
            .map_err(|_| LocationError::InvalidCoordinates)?;
        let longitude = longitude
            .trim()
            .parse::<f64>()
            .map_err(|_| LocationError::InvalidCoordinates)?;
        Self::new(latitude, longitude)
    }
}

/// Source of the device position. The host platform supplies the implementation.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> core::result::Result<GeoPosition, LocationError>;
}

impl Workchat {
    /// Takes one position fix and sends it to the open conversation.
    pub async fn send_location(&self) -> Result<GeoPosition> {
        let result = self.send_location_inner().await;
        self.surface("send_location", result)
    }

    async fn send_location_inner(&self) -> Result<GeoPosition> {
        let conversation_id = self.require_active_conversation().await?;
        let provider = self
            .location
            .as_ref()
            .ok_or(LocationError::Unsupported)?;

        let position = tokio::time::timeout(
            self.config.geolocation_timeout,
            provider.current_position(),
        )
        .await
        .map_err(|_| LocationError::Timeout)??;

        tracing::debug!(
            target: "workchat::dispatcher::send_location",
            "Sending position to {}",
            conversation_id
        );

        self.emit(OutboundCommand::SendMessage(SendMessagePayload {
            conversation_id,
            sender_id: self.session.user_id.clone(),
            content: Some(position.to_content()),
            kind: MessageKind::Location,
            file_url: None,
            reply_to_id: None,
        }))
        .await?;
        Ok(position)
    }
}
