use chat3d_auth::User;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Phase of a query submission as reported through notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Queued,
    Conversation,
    Codegen,
    Rendering,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Queued => "queued",
            PipelineStatus::Conversation => "conversation",
            PipelineStatus::Codegen => "codegen",
            PipelineStatus::Rendering => "rendering",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AttachmentRef {
    pub path: String,
    pub filename: String,
    pub mime_type: String,
    pub kind: AttachmentKind,
}

/// A rendered file persisted in user storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredArtifact {
    pub filename: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Ready,
    Downgraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ArtifactSummary {
    pub status: ArtifactStatus,
    pub preview_file: Option<String>,
    pub format: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ModelsUsed {
    pub conversation: String,
    pub codegen: String,
}

/// Per-context model overrides. Unset phases use the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ModelPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codegen: Option<String>,
}

impl ModelPreferences {
    pub fn is_empty(&self) -> bool {
        self.conversation.is_none() && self.codegen.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Message {
        text: String,
    },
    Attachment {
        files: Vec<AttachmentRef>,
    },
    Model {
        text: String,
        files: Vec<StoredArtifact>,
        artifact: ArtifactSummary,
        code: String,
    },
    Meta {
        text: String,
        usage: UsageSummary,
        cost: f64,
        models: ModelsUsed,
        duration_ms: u64,
    },
    Error {
        text: String,
        status: u16,
    },
    Pending {
        text: String,
        phase: PipelineStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
}

impl ItemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemRole::User => "user",
            ItemRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatContext {
    #[serde(skip)]
    pub row_id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub id: String,
    pub name: String,
    pub preferred_models: Option<ModelPreferences>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatItem {
    #[serde(skip)]
    pub row_id: i64,
    pub id: String,
    pub context_id: String,
    pub role: ItemRole,
    pub segments: Vec<Segment>,
    pub rating: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: i64,
    pub kind: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    Open,
    InviteOnly,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct AdminSettings {
    pub registration_mode: RegistrationMode,
    pub invitation_quota: u32,
    pub invitation_ttl_hours: u32,
    pub announcement: Option<String>,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            registration_mode: RegistrationMode::Open,
            invitation_quota: 5,
            invitation_ttl_hours: 24 * 7,
            announcement: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Revoked => "revoked",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "accepted" => InvitationStatus::Accepted,
            "revoked" => InvitationStatus::Revoked,
            _ => InvitationStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Invitation {
    #[serde(skip)]
    pub row_id: i64,
    #[serde(skip)]
    pub invited_by_id: Option<i64>,
    pub code: String,
    pub email: Option<String>,
    pub invited_by: Option<String>,
    pub status: InvitationStatus,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub created_at: String,
}

/// Public view of an invitation code.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvitationLookup {
    pub code: String,
    pub valid: bool,
    pub email: Option<String>,
    pub expires_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WaitlistStatus {
    Pending,
    Approved,
    Rejected,
}

impl WaitlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitlistStatus::Pending => "pending",
            WaitlistStatus::Approved => "approved",
            WaitlistStatus::Rejected => "rejected",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "approved" => WaitlistStatus::Approved,
            "rejected" => WaitlistStatus::Rejected,
            _ => WaitlistStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WaitlistEntry {
    pub id: String,
    pub email: String,
    pub note: Option<String>,
    pub status: WaitlistStatus,
    pub invitation_code: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.public_id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role.as_str().to_string(),
            is_active: user.is_active,
            created_at: user.created_at.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminStats {
    pub users: i64,
    pub active_users: i64,
    pub contexts: i64,
    pub items: i64,
    pub failed_items: i64,
    pub pending_waitlist: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn segments_serialize_with_kind_tag() {
        let segment = Segment::Pending {
            text: "Queued".into(),
            phase: PipelineStatus::Queued,
        };
        let value = serde_json::to_value(&segment).unwrap();
        assert_eq!(value, json!({ "kind": "pending", "text": "Queued", "phase": "queued" }));

        let parsed: Segment =
            serde_json::from_value(json!({ "kind": "error", "text": "boom", "status": 502 }))
                .unwrap();
        assert_eq!(
            parsed,
            Segment::Error {
                text: "boom".into(),
                status: 502
            }
        );
    }

    #[test]
    fn admin_settings_fill_missing_fields_with_defaults() {
        let parsed: AdminSettings =
            serde_json::from_value(json!({ "registration_mode": "invite_only" })).unwrap();
        assert_eq!(parsed.registration_mode, RegistrationMode::InviteOnly);
        assert_eq!(parsed.invitation_quota, AdminSettings::default().invitation_quota);
    }

    #[test]
    fn pipeline_status_labels() {
        assert_eq!(PipelineStatus::Codegen.as_str(), "codegen");
        assert_eq!(PipelineStatus::Failed.as_str(), "failed");
    }
}
