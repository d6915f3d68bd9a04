use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Identifier as it appears on disk: either a native ObjectId or a plain
/// string. Legacy writers produced both shapes for the same logical id, so
/// equality is defined on the canonical form, never on the representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Oid(ObjectId),
    Plain(String),
}

impl RecordId {
    /// Fresh native identifier for a new record.
    pub fn new() -> Self {
        RecordId::Oid(ObjectId::new())
    }

    /// String-form identifier, canonicalized. This is the shape we write
    /// into link sets and owner fields.
    pub fn plain(raw: &str) -> Self {
        RecordId::Plain(Self::canonicalize(raw))
    }

    /// Canonical form of a raw identifier: lowercase ObjectId hex when it
    /// parses as one, the input unchanged otherwise.
    pub fn canonicalize(raw: &str) -> String {
        match ObjectId::parse_str(raw) {
            Ok(oid) => oid.to_hex(),
            Err(_) => raw.to_string(),
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            RecordId::Oid(oid) => oid.to_hex(),
            RecordId::Plain(s) => Self::canonicalize(s),
        }
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

// Two ids are the same record when their canonical forms agree, regardless
// of which storage shape each side carries.
impl PartialEq for RecordId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for RecordId {}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<ObjectId> for RecordId {
    fn from(oid: ObjectId) -> Self {
        RecordId::Oid(oid)
    }
}

impl From<&str> for RecordId {
    fn from(raw: &str) -> Self {
        match ObjectId::parse_str(raw) {
            Ok(oid) => RecordId::Oid(oid),
            Err(_) => RecordId::Plain(raw.to_string()),
        }
    }
}

/// Lifecycle of an individual concierge service record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceStatus {
    #[default]
    #[serde(rename = "pending", alias = "PENDING")]
    Pending,
    #[serde(rename = "waiting to approve")]
    WaitingToApprove,
    #[serde(rename = "denied", alias = "DENIED")]
    Denied,
    #[serde(rename = "paid", alias = "PAID")]
    Paid,
    // Legacy records carry this; accepted on read, never written for new ones.
    #[serde(rename = "recorded", alias = "RECORDED")]
    Recorded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub partner_id: RecordId,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub service_date: DateTime<Utc>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub park: String,
    #[serde(default)]
    pub location: String,
    pub guests: Option<i64>,
    #[serde(default)]
    pub hopper: bool,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub service_type_id: String,
    pub service_time: Option<f64>,
    #[serde(default)]
    pub observations: String,
    #[serde(default)]
    pub final_value: f64,
    pub override_value: Option<f64>,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Settlement workflow state of a payment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Creating,
    Shared,
    Approved,
    #[default]
    Pending,
    Declined,
    OnHold,
    Paid,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Creating => "CREATING",
            BatchStatus::Shared => "SHARED",
            BatchStatus::Approved => "APPROVED",
            BatchStatus::Pending => "PENDING",
            BatchStatus::Declined => "DECLINED",
            BatchStatus::OnHold => "ON_HOLD",
            BatchStatus::Paid => "PAID",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduced status a lock presents to service views. Any batch state that is
/// not terminally paid or declined reads as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Paid,
    Pending,
    Declined,
}

impl DisplayStatus {
    /// Precedence when a service is linked by more than one batch:
    /// paid beats pending beats declined.
    pub fn rank(&self) -> u8 {
        match self {
            DisplayStatus::Paid => 3,
            DisplayStatus::Pending => 2,
            DisplayStatus::Declined => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::Paid => "paid",
            DisplayStatus::Pending => "pending",
            DisplayStatus::Declined => "declined",
        }
    }
}

impl From<BatchStatus> for DisplayStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Paid => DisplayStatus::Paid,
            BatchStatus::Declined => DisplayStatus::Declined,
            _ => DisplayStatus::Pending,
        }
    }
}

/// Append-only audit entry in a batch's note history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteLogEntry {
    pub id: String,
    pub text: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentBatch {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub partner_id: RecordId,
    #[serde(default)]
    pub partner_name: String,
    pub period_from: Option<mongodb::bson::DateTime>,
    pub period_to: Option<mongodb::bson::DateTime>,
    pub week_key: Option<String>,
    pub week_start: Option<mongodb::bson::DateTime>,
    pub week_end: Option<mongodb::bson::DateTime>,
    #[serde(default)]
    pub service_ids: Vec<RecordId>,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub status: BatchStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub notes_log: Vec<NoteLogEntry>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl PaymentBatch {
    /// True when the batch's link set contains the service, matching on
    /// canonical form.
    pub fn links_service(&self, canonical_id: &str) -> bool {
        self.service_ids
            .iter()
            .any(|sid| sid.canonical() == canonical_id)
    }
}

/// Lock a payment batch holds over a linked service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceLock {
    pub payment_id: String,
    pub status: DisplayStatus,
}

/// Lock annotation attached to a service row in listings.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    /// Annotation was not requested, or the lookup failed (degraded mode).
    Unknown,
    Free,
    Locked(ServiceLock),
}

/// Caller role as asserted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Partner,
    Finance,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "partner" => Some(Role::Partner),
            "finance" => Some(Role::Finance),
            _ => None,
        }
    }

    /// Admin and finance see every partner's records.
    pub fn sees_all(&self) -> bool {
        matches!(self, Role::Admin | Role::Finance)
    }
}

/// Visibility scope, decided before any store query is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    All,
    Partner(String),
}

impl Scope {
    /// Whether a record owned by `owner` is visible under this scope.
    pub fn allows(&self, owner: &RecordId) -> bool {
        match self {
            Scope::All => true,
            Scope::Partner(id) => RecordId::canonicalize(id) == owner.canonical(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "64b7a1f0c2d3e4f5a6b7c8d9";

    #[test]
    fn canonical_form_ignores_storage_shape() {
        let oid = ObjectId::parse_str(HEX).unwrap();
        assert_eq!(RecordId::Oid(oid).canonical(), HEX);
        assert_eq!(RecordId::Plain(HEX.to_string()).canonical(), HEX);
        assert_eq!(RecordId::Oid(oid), RecordId::Plain(HEX.to_string()));
    }

    #[test]
    fn canonicalize_lowercases_hex_and_keeps_legacy_strings() {
        assert_eq!(RecordId::canonicalize(&HEX.to_uppercase()), HEX);
        assert_eq!(RecordId::canonicalize("partner-42"), "partner-42");
    }

    #[test]
    fn display_status_reduces_batch_states() {
        assert_eq!(DisplayStatus::from(BatchStatus::Paid), DisplayStatus::Paid);
        assert_eq!(
            DisplayStatus::from(BatchStatus::Declined),
            DisplayStatus::Declined
        );
        for status in [
            BatchStatus::Creating,
            BatchStatus::Shared,
            BatchStatus::Approved,
            BatchStatus::Pending,
            BatchStatus::OnHold,
        ] {
            assert_eq!(DisplayStatus::from(status), DisplayStatus::Pending);
        }
    }

    #[test]
    fn paid_outranks_pending_outranks_declined() {
        assert!(DisplayStatus::Paid.rank() > DisplayStatus::Pending.rank());
        assert!(DisplayStatus::Pending.rank() > DisplayStatus::Declined.rank());
    }

    #[test]
    fn scope_matches_owner_across_forms() {
        let owner = RecordId::Oid(ObjectId::parse_str(HEX).unwrap());
        assert!(Scope::Partner(HEX.to_string()).allows(&owner));
        assert!(Scope::All.allows(&owner));
        assert!(!Scope::Partner("partner-1".to_string()).allows(&owner));
    }
}
