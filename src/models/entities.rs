use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::requests::*;
use super::schema::{
    entity_fields, percent_bounds, ratio_bounds, require_non_empty, require_non_negative,
    require_range, Entity, FieldDef, IndexKey, KeyLookup, UniqueKey,
};
use super::values::{NullableJson, Value};
use crate::error::StoreError;

// ── Workspace (aggregate root) ──────────────────────────────────

entity_fields! {
    WorkspaceField {
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        TenantId => "tenantId", "tenant_id", Str, false;
        CreatedBy => "createdBy", "created_by", Str, false;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
        UpdatedAt => "updatedAt", "updated_at", Timestamp, false;
        Lifecycle => "lifecycle", "lifecycle", Str, false;
        ContractVersion => "contractVersion", "contract_version", Str, false;
        Goals => "goals", "goals", Json, true;
        PrimaryChannels => "primaryChannels", "primary_channels", Json, true;
        Budget => "budget", "budget", Json, true;
        ApprovalPolicy => "approvalPolicy", "approval_policy", Json, true;
        DataRetention => "dataRetention", "data_retention", Json, true;
        ContractData => "contractData", "contract_data", Json, true;
        RiskProfile => "riskProfile", "risk_profile", Str, false;
        TtlHours => "ttlHours", "ttl_hours", Int, false;
        PolicyBundleRef => "policyBundleRef", "policy_bundle_ref", Str, false;
        PolicyBundleChecksum => "policyBundleChecksum", "policy_bundle_checksum", Str, false;
    }
}

/// Tenant-scoped configuration root. Owns every child collection below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub workspace_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lifecycle: String,
    pub contract_version: String,
    #[serde(default)]
    pub goals: NullableJson,
    #[serde(default)]
    pub primary_channels: NullableJson,
    #[serde(default)]
    pub budget: NullableJson,
    #[serde(default)]
    pub approval_policy: NullableJson,
    #[serde(default)]
    pub data_retention: NullableJson,
    #[serde(default)]
    pub contract_data: NullableJson,
    pub risk_profile: String,
    pub ttl_hours: i32,
    pub policy_bundle_ref: String,
    pub policy_bundle_checksum: String,
}

impl Entity for Workspace {
    type Field = WorkspaceField;
    type Key = String;
    type Create = WorkspaceCreate;
    type Update = WorkspaceUpdate;

    const MODEL: &'static str = "Workspace";
    const TABLE: &'static str = "workspaces";
    const PRIMARY: WorkspaceField = WorkspaceField::WorkspaceId;

    fn primary_key(&self) -> &str {
        &self.workspace_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        None
    }

    fn set_workspace_ref(&mut self, _workspace_id: &str) {}

    fn get(&self, field: WorkspaceField) -> Value {
        match field {
            WorkspaceField::WorkspaceId => Value::from(&self.workspace_id),
            WorkspaceField::TenantId => Value::from(&self.tenant_id),
            WorkspaceField::CreatedBy => Value::from(&self.created_by),
            WorkspaceField::CreatedAt => Value::from(self.created_at),
            WorkspaceField::UpdatedAt => Value::from(self.updated_at),
            WorkspaceField::Lifecycle => Value::from(&self.lifecycle),
            WorkspaceField::ContractVersion => Value::from(&self.contract_version),
            WorkspaceField::Goals => Value::from(&self.goals),
            WorkspaceField::PrimaryChannels => Value::from(&self.primary_channels),
            WorkspaceField::Budget => Value::from(&self.budget),
            WorkspaceField::ApprovalPolicy => Value::from(&self.approval_policy),
            WorkspaceField::DataRetention => Value::from(&self.data_retention),
            WorkspaceField::ContractData => Value::from(&self.contract_data),
            WorkspaceField::RiskProfile => Value::from(&self.risk_profile),
            WorkspaceField::TtlHours => Value::from(self.ttl_hours),
            WorkspaceField::PolicyBundleRef => Value::from(&self.policy_bundle_ref),
            WorkspaceField::PolicyBundleChecksum => Value::from(&self.policy_bundle_checksum),
        }
    }

    fn validate(&self, _enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "workspaceId", &self.workspace_id)?;
        require_non_empty(Self::MODEL, "tenantId", &self.tenant_id)?;
        require_non_empty(Self::MODEL, "lifecycle", &self.lifecycle)?;
        if self.ttl_hours < 0 {
            return Err(StoreError::validation(
                Self::MODEL,
                format!("ttlHours must not be negative, got {}", self.ttl_hours),
            ));
        }
        Ok(())
    }
}

// ── WorkspaceRun ────────────────────────────────────────────────

entity_fields! {
    WorkspaceRunField {
        RunId => "runId", "run_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        Status => "status", "status", Str, false;
        StartedAt => "startedAt", "started_at", Timestamp, false;
        FinishedAt => "finishedAt", "finished_at", Timestamp, true;
        CostUsd => "costUsd", "cost_usd", Decimal, true;
        ReadinessScore => "readinessScore", "readiness_score", Decimal, true;
        Results => "results", "results", Json, true;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

/// One execution of a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRun {
    pub run_id: String,
    pub workspace_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cost_usd: Option<Decimal>,
    pub readiness_score: Option<Decimal>,
    #[serde(default)]
    pub results: NullableJson,
    pub created_at: DateTime<Utc>,
}

impl Entity for WorkspaceRun {
    type Field = WorkspaceRunField;
    type Key = String;
    type Create = WorkspaceRunCreate;
    type Update = WorkspaceRunUpdate;

    const MODEL: &'static str = "WorkspaceRun";
    const TABLE: &'static str = "workspace_runs";
    const PRIMARY: WorkspaceRunField = WorkspaceRunField::RunId;

    fn primary_key(&self) -> &str {
        &self.run_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: WorkspaceRunField) -> Value {
        match field {
            WorkspaceRunField::RunId => Value::from(&self.run_id),
            WorkspaceRunField::WorkspaceId => Value::from(&self.workspace_id),
            WorkspaceRunField::Status => Value::from(&self.status),
            WorkspaceRunField::StartedAt => Value::from(self.started_at),
            WorkspaceRunField::FinishedAt => Value::from(self.finished_at),
            WorkspaceRunField::CostUsd => Value::from(self.cost_usd),
            WorkspaceRunField::ReadinessScore => Value::from(self.readiness_score),
            WorkspaceRunField::Results => Value::from(&self.results),
            WorkspaceRunField::CreatedAt => Value::from(self.created_at),
        }
    }

    fn validate(&self, enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "runId", &self.run_id)?;
        require_non_empty(Self::MODEL, "status", &self.status)?;
        if !enforce_domain_invariants {
            return Ok(());
        }
        if let Some(finished_at) = self.finished_at {
            if finished_at < self.started_at {
                return Err(StoreError::validation(
                    Self::MODEL,
                    "finishedAt must not precede startedAt",
                ));
            }
        }
        if let Some(cost) = self.cost_usd {
            require_non_negative(Self::MODEL, "costUsd", cost)?;
        }
        if let Some(score) = self.readiness_score {
            let (min, max) = percent_bounds();
            require_range(Self::MODEL, "readinessScore", score, min, max)?;
        }
        Ok(())
    }
}

// ── AuditBundle ─────────────────────────────────────────────────

entity_fields! {
    AuditBundleField {
        BundleId => "bundleId", "bundle_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        BundleData => "bundleData", "bundle_data", Json, false;
        SignatureKeyId => "signatureKeyId", "signature_key_id", Str, false;
        Signature => "signature", "signature", Str, false;
        SignedAt => "signedAt", "signed_at", Timestamp, false;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

/// Signed snapshot of workspace state for compliance review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditBundle {
    pub bundle_id: String,
    pub workspace_id: String,
    pub bundle_data: serde_json::Value,
    pub signature_key_id: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for AuditBundle {
    type Field = AuditBundleField;
    type Key = String;
    type Create = AuditBundleCreate;
    type Update = AuditBundleUpdate;

    const MODEL: &'static str = "AuditBundle";
    const TABLE: &'static str = "audit_bundles";
    const PRIMARY: AuditBundleField = AuditBundleField::BundleId;

    fn primary_key(&self) -> &str {
        &self.bundle_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: AuditBundleField) -> Value {
        match field {
            AuditBundleField::BundleId => Value::from(&self.bundle_id),
            AuditBundleField::WorkspaceId => Value::from(&self.workspace_id),
            AuditBundleField::BundleData => Value::from(self.bundle_data.clone()),
            AuditBundleField::SignatureKeyId => Value::from(&self.signature_key_id),
            AuditBundleField::Signature => Value::from(&self.signature),
            AuditBundleField::SignedAt => Value::from(self.signed_at),
            AuditBundleField::CreatedAt => Value::from(self.created_at),
        }
    }

    // Signed at creation, always: not subject to the invariants toggle.
    fn validate(&self, _enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "bundleId", &self.bundle_id)?;
        require_non_empty(Self::MODEL, "signatureKeyId", &self.signature_key_id)?;
        require_non_empty(Self::MODEL, "signature", &self.signature)?;
        Ok(())
    }
}

// ── Connector ───────────────────────────────────────────────────

entity_fields! {
    ConnectorField {
        ConnectorId => "connectorId", "connector_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        Platform => "platform", "platform", Str, false;
        AccountId => "accountId", "account_id", Str, false;
        DisplayName => "displayName", "display_name", Str, false;
        Status => "status", "status", Str, false;
        Scopes => "scopes", "scopes", Json, true;
        LastConnectedAt => "lastConnectedAt", "last_connected_at", Timestamp, true;
        OwnerContact => "ownerContact", "owner_contact", Str, true;
        CredentialsRef => "credentialsRef", "credentials_ref", Str, true;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
        UpdatedAt => "updatedAt", "updated_at", Timestamp, false;
    }
}

pub const CONNECTOR_PLATFORM_ACCOUNT: &str = "workspaceId_platform_accountId";

/// External platform integration registered on a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub connector_id: String,
    pub workspace_id: String,
    pub platform: String,
    pub account_id: String,
    pub display_name: String,
    pub status: String,
    #[serde(default)]
    pub scopes: NullableJson,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub owner_contact: Option<String>,
    pub credentials_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Unique keys of a connector: its id, or the platform account it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorKey {
    ConnectorId(String),
    PlatformAccount {
        workspace_id: String,
        platform: String,
        account_id: String,
    },
}

impl ConnectorKey {
    pub fn platform_account(
        workspace_id: impl Into<String>,
        platform: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        ConnectorKey::PlatformAccount {
            workspace_id: workspace_id.into(),
            platform: platform.into(),
            account_id: account_id.into(),
        }
    }
}

impl From<&str> for ConnectorKey {
    fn from(id: &str) -> Self {
        ConnectorKey::ConnectorId(id.to_string())
    }
}

impl From<String> for ConnectorKey {
    fn from(id: String) -> Self {
        ConnectorKey::ConnectorId(id)
    }
}

impl UniqueKey for ConnectorKey {
    fn lookup(&self) -> KeyLookup {
        match self {
            ConnectorKey::ConnectorId(id) => KeyLookup::Primary(id.clone()),
            ConnectorKey::PlatformAccount {
                workspace_id,
                platform,
                account_id,
            } => KeyLookup::Index(IndexKey::new(
                CONNECTOR_PLATFORM_ACCOUNT,
                &[
                    Value::from(workspace_id),
                    Value::from(platform),
                    Value::from(account_id),
                ],
            )),
        }
    }

    fn index_columns(&self) -> Vec<(&'static str, Value)> {
        match self {
            ConnectorKey::ConnectorId(_) => Vec::new(),
            ConnectorKey::PlatformAccount {
                workspace_id,
                platform,
                account_id,
            } => vec![
                (ConnectorField::WorkspaceId.column(), Value::from(workspace_id)),
                (ConnectorField::Platform.column(), Value::from(platform)),
                (ConnectorField::AccountId.column(), Value::from(account_id)),
            ],
        }
    }
}

impl Entity for Connector {
    type Field = ConnectorField;
    type Key = ConnectorKey;
    type Create = ConnectorCreate;
    type Update = ConnectorUpdate;

    const MODEL: &'static str = "Connector";
    const TABLE: &'static str = "connectors";
    const PRIMARY: ConnectorField = ConnectorField::ConnectorId;

    fn primary_key(&self) -> &str {
        &self.connector_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: ConnectorField) -> Value {
        match field {
            ConnectorField::ConnectorId => Value::from(&self.connector_id),
            ConnectorField::WorkspaceId => Value::from(&self.workspace_id),
            ConnectorField::Platform => Value::from(&self.platform),
            ConnectorField::AccountId => Value::from(&self.account_id),
            ConnectorField::DisplayName => Value::from(&self.display_name),
            ConnectorField::Status => Value::from(&self.status),
            ConnectorField::Scopes => Value::from(&self.scopes),
            ConnectorField::LastConnectedAt => Value::from(self.last_connected_at),
            ConnectorField::OwnerContact => Value::from(self.owner_contact.clone()),
            ConnectorField::CredentialsRef => Value::from(self.credentials_ref.clone()),
            ConnectorField::CreatedAt => Value::from(self.created_at),
            ConnectorField::UpdatedAt => Value::from(self.updated_at),
        }
    }

    fn unique_indexes(&self) -> Vec<IndexKey> {
        vec![IndexKey::new(
            CONNECTOR_PLATFORM_ACCOUNT,
            &[
                Value::from(&self.workspace_id),
                Value::from(&self.platform),
                Value::from(&self.account_id),
            ],
        )]
    }

    fn validate(&self, _enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "connectorId", &self.connector_id)?;
        require_non_empty(Self::MODEL, "platform", &self.platform)?;
        require_non_empty(Self::MODEL, "accountId", &self.account_id)?;
        Ok(())
    }
}

// ── ConsentRecord ───────────────────────────────────────────────

entity_fields! {
    ConsentRecordField {
        ConsentId => "consentId", "consent_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        ConsentType => "consentType", "consent_type", Str, false;
        GrantedBy => "grantedBy", "granted_by", Str, false;
        GrantedAt => "grantedAt", "granted_at", Timestamp, false;
        ExpiresAt => "expiresAt", "expires_at", Timestamp, false;
        DocumentRef => "documentRef", "document_ref", Str, true;
        VerifierSignature => "verifierSignature", "verifier_signature", Str, true;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

/// Time-bounded permission grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub consent_id: String,
    pub workspace_id: String,
    pub consent_type: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub document_ref: Option<String>,
    pub verifier_signature: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
impl ConsentRecord {
    pub(crate) fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.granted_at <= at && at < self.expires_at
    }
}

impl Entity for ConsentRecord {
    type Field = ConsentRecordField;
    type Key = String;
    type Create = ConsentRecordCreate;
    type Update = ConsentRecordUpdate;

    const MODEL: &'static str = "ConsentRecord";
    const TABLE: &'static str = "consent_records";
    const PRIMARY: ConsentRecordField = ConsentRecordField::ConsentId;

    fn primary_key(&self) -> &str {
        &self.consent_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: ConsentRecordField) -> Value {
        match field {
            ConsentRecordField::ConsentId => Value::from(&self.consent_id),
            ConsentRecordField::WorkspaceId => Value::from(&self.workspace_id),
            ConsentRecordField::ConsentType => Value::from(&self.consent_type),
            ConsentRecordField::GrantedBy => Value::from(&self.granted_by),
            ConsentRecordField::GrantedAt => Value::from(self.granted_at),
            ConsentRecordField::ExpiresAt => Value::from(self.expires_at),
            ConsentRecordField::DocumentRef => Value::from(self.document_ref.clone()),
            ConsentRecordField::VerifierSignature => Value::from(self.verifier_signature.clone()),
            ConsentRecordField::CreatedAt => Value::from(self.created_at),
        }
    }

    fn validate(&self, enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "consentId", &self.consent_id)?;
        require_non_empty(Self::MODEL, "grantedBy", &self.granted_by)?;
        if enforce_domain_invariants && self.expires_at < self.granted_at {
            return Err(StoreError::validation(
                Self::MODEL,
                "expiresAt must not precede grantedAt",
            ));
        }
        Ok(())
    }
}

// ── BrandTwin ───────────────────────────────────────────────────

entity_fields! {
    BrandTwinField {
        TwinId => "twinId", "twin_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        BrandId => "brandId", "brand_id", Str, false;
        SnapshotAt => "snapshotAt", "snapshot_at", Timestamp, false;
        BrandData => "brandData", "brand_data", Json, false;
        QualityScore => "qualityScore", "quality_score", Decimal, true;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

pub const BRAND_TWIN_SNAPSHOT: &str = "brandId_snapshotAt";

/// Point-in-time snapshot of modeled brand state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandTwin {
    pub twin_id: String,
    pub workspace_id: String,
    pub brand_id: String,
    pub snapshot_at: DateTime<Utc>,
    pub brand_data: serde_json::Value,
    pub quality_score: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrandTwinKey {
    TwinId(String),
    BrandSnapshot {
        brand_id: String,
        snapshot_at: DateTime<Utc>,
    },
}

impl BrandTwinKey {
    pub fn brand_snapshot(brand_id: impl Into<String>, snapshot_at: DateTime<Utc>) -> Self {
        BrandTwinKey::BrandSnapshot {
            brand_id: brand_id.into(),
            snapshot_at,
        }
    }
}

impl From<&str> for BrandTwinKey {
    fn from(id: &str) -> Self {
        BrandTwinKey::TwinId(id.to_string())
    }
}

impl From<String> for BrandTwinKey {
    fn from(id: String) -> Self {
        BrandTwinKey::TwinId(id)
    }
}

impl UniqueKey for BrandTwinKey {
    fn lookup(&self) -> KeyLookup {
        match self {
            BrandTwinKey::TwinId(id) => KeyLookup::Primary(id.clone()),
            BrandTwinKey::BrandSnapshot {
                brand_id,
                snapshot_at,
            } => KeyLookup::Index(IndexKey::new(
                BRAND_TWIN_SNAPSHOT,
                &[Value::from(brand_id), Value::from(*snapshot_at)],
            )),
        }
    }

    fn index_columns(&self) -> Vec<(&'static str, Value)> {
        match self {
            BrandTwinKey::TwinId(_) => Vec::new(),
            BrandTwinKey::BrandSnapshot {
                brand_id,
                snapshot_at,
            } => vec![
                (BrandTwinField::BrandId.column(), Value::from(brand_id)),
                (BrandTwinField::SnapshotAt.column(), Value::from(*snapshot_at)),
            ],
        }
    }
}

impl Entity for BrandTwin {
    type Field = BrandTwinField;
    type Key = BrandTwinKey;
    type Create = BrandTwinCreate;
    type Update = BrandTwinUpdate;

    const MODEL: &'static str = "BrandTwin";
    const TABLE: &'static str = "brand_twins";
    const PRIMARY: BrandTwinField = BrandTwinField::TwinId;

    fn primary_key(&self) -> &str {
        &self.twin_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: BrandTwinField) -> Value {
        match field {
            BrandTwinField::TwinId => Value::from(&self.twin_id),
            BrandTwinField::WorkspaceId => Value::from(&self.workspace_id),
            BrandTwinField::BrandId => Value::from(&self.brand_id),
            BrandTwinField::SnapshotAt => Value::from(self.snapshot_at),
            BrandTwinField::BrandData => Value::from(self.brand_data.clone()),
            BrandTwinField::QualityScore => Value::from(self.quality_score),
            BrandTwinField::CreatedAt => Value::from(self.created_at),
        }
    }

    fn unique_indexes(&self) -> Vec<IndexKey> {
        vec![IndexKey::new(
            BRAND_TWIN_SNAPSHOT,
            &[Value::from(&self.brand_id), Value::from(self.snapshot_at)],
        )]
    }

    fn validate(&self, enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "twinId", &self.twin_id)?;
        require_non_empty(Self::MODEL, "brandId", &self.brand_id)?;
        if enforce_domain_invariants {
            if let Some(score) = self.quality_score {
                let (min, max) = percent_bounds();
                require_range(Self::MODEL, "qualityScore", score, min, max)?;
            }
        }
        Ok(())
    }
}

// ── DecisionCard ────────────────────────────────────────────────

entity_fields! {
    DecisionCardField {
        ActionId => "actionId", "action_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        Title => "title", "title", Str, false;
        OneLine => "oneLine", "one_line", Str, false;
        ReadinessScore => "readinessScore", "readiness_score", Decimal, false;
        ExpiresAt => "expiresAt", "expires_at", Timestamp, false;
        Status => "status", "status", Str, false;
        ApprovedBy => "approvedBy", "approved_by", Str, true;
        ApprovedAt => "approvedAt", "approved_at", Timestamp, true;
        CardData => "cardData", "card_data", Json, false;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

/// Actionable recommendation awaiting human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCard {
    pub action_id: String,
    pub workspace_id: String,
    pub title: String,
    pub one_line: String,
    pub readiness_score: Decimal,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub card_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
impl DecisionCard {
    pub(crate) fn is_approved(&self) -> bool {
        self.approved_by.is_some() && self.approved_at.is_some()
    }
}

impl Entity for DecisionCard {
    type Field = DecisionCardField;
    type Key = String;
    type Create = DecisionCardCreate;
    type Update = DecisionCardUpdate;

    const MODEL: &'static str = "DecisionCard";
    const TABLE: &'static str = "decision_cards";
    const PRIMARY: DecisionCardField = DecisionCardField::ActionId;

    fn primary_key(&self) -> &str {
        &self.action_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: DecisionCardField) -> Value {
        match field {
            DecisionCardField::ActionId => Value::from(&self.action_id),
            DecisionCardField::WorkspaceId => Value::from(&self.workspace_id),
            DecisionCardField::Title => Value::from(&self.title),
            DecisionCardField::OneLine => Value::from(&self.one_line),
            DecisionCardField::ReadinessScore => Value::from(self.readiness_score),
            DecisionCardField::ExpiresAt => Value::from(self.expires_at),
            DecisionCardField::Status => Value::from(&self.status),
            DecisionCardField::ApprovedBy => Value::from(self.approved_by.clone()),
            DecisionCardField::ApprovedAt => Value::from(self.approved_at),
            DecisionCardField::CardData => Value::from(self.card_data.clone()),
            DecisionCardField::CreatedAt => Value::from(self.created_at),
        }
    }

    fn validate(&self, enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "actionId", &self.action_id)?;
        require_non_empty(Self::MODEL, "status", &self.status)?;
        if !enforce_domain_invariants {
            return Ok(());
        }
        if self.approved_by.is_some() != self.approved_at.is_some() {
            return Err(StoreError::validation(
                Self::MODEL,
                "approvedBy and approvedAt must be set together",
            ));
        }
        let (min, max) = percent_bounds();
        require_range(Self::MODEL, "readinessScore", self.readiness_score, min, max)
    }
}

// ── SimulationResult ────────────────────────────────────────────

entity_fields! {
    SimulationResultField {
        SimulationId => "simulationId", "simulation_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        ReadinessScore => "readinessScore", "readiness_score", Decimal, false;
        PolicyPassPct => "policyPassPct", "policy_pass_pct", Decimal, false;
        CitationCoverage => "citationCoverage", "citation_coverage", Decimal, false;
        DuplicationRisk => "duplicationRisk", "duplication_risk", Decimal, false;
        CostEstimateUsd => "costEstimateUsd", "cost_estimate_usd", Decimal, false;
        Traces => "traces", "traces", Json, true;
        SimulationData => "simulationData", "simulation_data", Json, false;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

/// Scored dry-run output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub simulation_id: String,
    pub workspace_id: String,
    pub readiness_score: Decimal,
    pub policy_pass_pct: Decimal,
    pub citation_coverage: Decimal,
    pub duplication_risk: Decimal,
    pub cost_estimate_usd: Decimal,
    #[serde(default)]
    pub traces: NullableJson,
    pub simulation_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Entity for SimulationResult {
    type Field = SimulationResultField;
    type Key = String;
    type Create = SimulationResultCreate;
    type Update = SimulationResultUpdate;

    const MODEL: &'static str = "SimulationResult";
    const TABLE: &'static str = "simulation_results";
    const PRIMARY: SimulationResultField = SimulationResultField::SimulationId;

    fn primary_key(&self) -> &str {
        &self.simulation_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: SimulationResultField) -> Value {
        match field {
            SimulationResultField::SimulationId => Value::from(&self.simulation_id),
            SimulationResultField::WorkspaceId => Value::from(&self.workspace_id),
            SimulationResultField::ReadinessScore => Value::from(self.readiness_score),
            SimulationResultField::PolicyPassPct => Value::from(self.policy_pass_pct),
            SimulationResultField::CitationCoverage => Value::from(self.citation_coverage),
            SimulationResultField::DuplicationRisk => Value::from(self.duplication_risk),
            SimulationResultField::CostEstimateUsd => Value::from(self.cost_estimate_usd),
            SimulationResultField::Traces => Value::from(&self.traces),
            SimulationResultField::SimulationData => Value::from(self.simulation_data.clone()),
            SimulationResultField::CreatedAt => Value::from(self.created_at),
        }
    }

    fn validate(&self, enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "simulationId", &self.simulation_id)?;
        if !enforce_domain_invariants {
            return Ok(());
        }
        let (pct_min, pct_max) = percent_bounds();
        let (ratio_min, ratio_max) = ratio_bounds();
        require_range(Self::MODEL, "readinessScore", self.readiness_score, pct_min, pct_max)?;
        require_range(Self::MODEL, "policyPassPct", self.policy_pass_pct, pct_min, pct_max)?;
        require_range(
            Self::MODEL,
            "citationCoverage",
            self.citation_coverage,
            ratio_min,
            ratio_max,
        )?;
        require_range(
            Self::MODEL,
            "duplicationRisk",
            self.duplication_risk,
            ratio_min,
            ratio_max,
        )?;
        require_non_negative(Self::MODEL, "costEstimateUsd", self.cost_estimate_usd)
    }
}

// ── AssetFingerprint ────────────────────────────────────────────

entity_fields! {
    AssetFingerprintField {
        AssetId => "assetId", "asset_id", Str, false;
        WorkspaceId => "workspaceId", "workspace_id", Str, false;
        AssetType => "assetType", "asset_type", Str, false;
        Fingerprint => "fingerprint", "fingerprint", Str, false;
        License => "license", "license", Str, false;
        Url => "url", "url", Str, true;
        Metadata => "metadata", "metadata", Json, true;
        CreatedAt => "createdAt", "created_at", Timestamp, false;
    }
}

/// Content-addressed record of a creative asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFingerprint {
    pub asset_id: String,
    pub workspace_id: String,
    pub asset_type: String,
    pub fingerprint: String,
    pub license: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: NullableJson,
    pub created_at: DateTime<Utc>,
}

impl Entity for AssetFingerprint {
    type Field = AssetFingerprintField;
    type Key = String;
    type Create = AssetFingerprintCreate;
    type Update = AssetFingerprintUpdate;

    const MODEL: &'static str = "AssetFingerprint";
    const TABLE: &'static str = "asset_fingerprints";
    const PRIMARY: AssetFingerprintField = AssetFingerprintField::AssetId;

    fn primary_key(&self) -> &str {
        &self.asset_id
    }

    fn workspace_ref(&self) -> Option<&str> {
        Some(&self.workspace_id)
    }

    fn set_workspace_ref(&mut self, workspace_id: &str) {
        self.workspace_id = workspace_id.to_string();
    }

    fn get(&self, field: AssetFingerprintField) -> Value {
        match field {
            AssetFingerprintField::AssetId => Value::from(&self.asset_id),
            AssetFingerprintField::WorkspaceId => Value::from(&self.workspace_id),
            AssetFingerprintField::AssetType => Value::from(&self.asset_type),
            AssetFingerprintField::Fingerprint => Value::from(&self.fingerprint),
            AssetFingerprintField::License => Value::from(&self.license),
            AssetFingerprintField::Url => Value::from(self.url.clone()),
            AssetFingerprintField::Metadata => Value::from(&self.metadata),
            AssetFingerprintField::CreatedAt => Value::from(self.created_at),
        }
    }

    fn validate(&self, _enforce_domain_invariants: bool) -> Result<(), StoreError> {
        require_non_empty(Self::MODEL, "assetId", &self.asset_id)?;
        require_non_empty(Self::MODEL, "fingerprint", &self.fingerprint)?;
        require_non_empty(Self::MODEL, "license", &self.license)?;
        Ok(())
    }
}
