use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Employer,
    Jobseeker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employer => "EMPLOYER",
            Self::Jobseeker => "JOBSEEKER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMPLOYER" => Ok(Self::Employer),
            "JOBSEEKER" => Ok(Self::Jobseeker),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A verified caller, produced from a bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    #[serde(rename = "New_Message")]
    NewMessage,
    #[serde(rename = "Job_Application")]
    JobApplication,
    #[serde(rename = "Application_Status_Update")]
    ApplicationStatusUpdate,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "New_Message",
            Self::JobApplication => "Job_Application",
            Self::ApplicationStatusUpdate => "Application_Status_Update",
        }
    }
}

impl FromStr for NotificationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New_Message" => Ok(Self::NewMessage),
            "Job_Application" => Ok(Self::JobApplication),
            "Application_Status_Update" => Ok(Self::ApplicationStatusUpdate),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Mailbox lifecycle. Transitions only move forward: PENDING -> DELIVERED -> READ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
        }
    }

    /// Position in the lifecycle, used to reject backward transitions.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DELIVERED" => Ok(Self::Delivered),
            "READ" => Ok(Self::Read),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub user_id: Uuid,
    pub role: Option<Role>,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub receiver_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_rank_follows_lifecycle() {
        assert!(NotificationStatus::Pending.rank() < NotificationStatus::Delivered.rank());
        assert!(NotificationStatus::Delivered.rank() < NotificationStatus::Read.rank());
    }

    #[test]
    fn enums_use_storage_spelling_on_the_wire() {
        assert_eq!(serde_json::to_value(Role::Employer).unwrap(), "EMPLOYER");
        assert_eq!(
            serde_json::to_value(NotificationType::NewMessage).unwrap(),
            "New_Message"
        );
        assert_eq!(
            "DELIVERED".parse::<NotificationStatus>().unwrap(),
            NotificationStatus::Delivered
        );
        assert!("ADMIN".parse::<Role>().is_err());
    }
}
