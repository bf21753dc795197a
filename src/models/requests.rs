use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entities::*;
use super::schema::{CreateInput, Entity, UpdateInput};
use super::values::{generate_id, FieldUpdate, JsonUpdate, NullableJson, NumberUpdate};
use crate::error::StoreError;

pub const DEFAULT_LIFECYCLE: &str = "draft";

fn id_or_generate(id: Option<String>) -> Result<String, StoreError> {
    match id {
        Some(id) => Ok(id),
        None => generate_id(),
    }
}

// ── Workspace ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCreate {
    pub workspace_id: Option<String>,
    pub tenant_id: String,
    pub created_by: String,
    pub lifecycle: Option<String>,
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

impl CreateInput<Workspace> for WorkspaceCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<Workspace, StoreError> {
        Ok(Workspace {
            workspace_id: id_or_generate(self.workspace_id)?,
            tenant_id: self.tenant_id,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
            lifecycle: self
                .lifecycle
                .unwrap_or_else(|| DEFAULT_LIFECYCLE.to_string()),
            contract_version: self.contract_version,
            goals: self.goals,
            primary_channels: self.primary_channels,
            budget: self.budget,
            approval_policy: self.approval_policy,
            data_retention: self.data_retention,
            contract_data: self.contract_data,
            risk_profile: self.risk_profile,
            ttl_hours: self.ttl_hours,
            policy_bundle_ref: self.policy_bundle_ref,
            policy_bundle_checksum: self.policy_bundle_checksum,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub tenant_id: FieldUpdate<String>,
    pub created_by: FieldUpdate<String>,
    pub lifecycle: FieldUpdate<String>,
    pub contract_version: FieldUpdate<String>,
    pub goals: JsonUpdate,
    pub primary_channels: JsonUpdate,
    pub budget: JsonUpdate,
    pub approval_policy: JsonUpdate,
    pub data_retention: JsonUpdate,
    pub contract_data: JsonUpdate,
    pub risk_profile: FieldUpdate<String>,
    pub ttl_hours: NumberUpdate<i32>,
    pub policy_bundle_ref: FieldUpdate<String>,
    pub policy_bundle_checksum: FieldUpdate<String>,
}

impl UpdateInput<Workspace> for WorkspaceUpdate {
    fn apply_to(&self, record: &mut Workspace, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.workspace_id.apply(&mut record.workspace_id);
        self.tenant_id.apply(&mut record.tenant_id);
        self.created_by.apply(&mut record.created_by);
        self.lifecycle.apply(&mut record.lifecycle);
        self.contract_version.apply(&mut record.contract_version);
        self.goals.apply_nullable(&mut record.goals);
        self.primary_channels.apply_nullable(&mut record.primary_channels);
        self.budget.apply_nullable(&mut record.budget);
        self.approval_policy.apply_nullable(&mut record.approval_policy);
        self.data_retention.apply_nullable(&mut record.data_retention);
        self.contract_data.apply_nullable(&mut record.contract_data);
        self.risk_profile.apply(&mut record.risk_profile);
        self.ttl_hours
            .apply(Workspace::MODEL, "ttlHours", &mut record.ttl_hours)?;
        self.policy_bundle_ref.apply(&mut record.policy_bundle_ref);
        self.policy_bundle_checksum
            .apply(&mut record.policy_bundle_checksum);
        record.updated_at = now;
        Ok(())
    }
}

/// A workspace together with child records written in the same transaction.
/// The children's `workspace_id` is overwritten with the new workspace's id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceCreateNested {
    pub workspace: WorkspaceCreate,
    pub runs: Vec<WorkspaceRunCreate>,
    pub audit_bundles: Vec<AuditBundleCreate>,
    pub connectors: Vec<ConnectorCreate>,
    pub consent_records: Vec<ConsentRecordCreate>,
    pub brand_twins: Vec<BrandTwinCreate>,
    pub decision_cards: Vec<DecisionCardCreate>,
    pub simulation_results: Vec<SimulationResultCreate>,
    pub asset_fingerprints: Vec<AssetFingerprintCreate>,
}

// ── WorkspaceRun ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRunCreate {
    pub run_id: Option<String>,
    pub workspace_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cost_usd: Option<Decimal>,
    pub readiness_score: Option<Decimal>,
    #[serde(default)]
    pub results: NullableJson,
}

impl CreateInput<WorkspaceRun> for WorkspaceRunCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<WorkspaceRun, StoreError> {
        Ok(WorkspaceRun {
            run_id: id_or_generate(self.run_id)?,
            workspace_id: self.workspace_id,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            cost_usd: self.cost_usd,
            readiness_score: self.readiness_score,
            results: self.results,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceRunUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub status: FieldUpdate<String>,
    pub started_at: FieldUpdate<DateTime<Utc>>,
    pub finished_at: FieldUpdate<Option<DateTime<Utc>>>,
    pub cost_usd: NumberUpdate<Decimal>,
    pub readiness_score: NumberUpdate<Decimal>,
    pub results: JsonUpdate,
}

impl UpdateInput<WorkspaceRun> for WorkspaceRunUpdate {
    fn apply_to(&self, record: &mut WorkspaceRun, _now: DateTime<Utc>) -> Result<(), StoreError> {
        let model = WorkspaceRun::MODEL;
        self.workspace_id.apply(&mut record.workspace_id);
        self.status.apply(&mut record.status);
        self.started_at.apply(&mut record.started_at);
        self.finished_at.apply(&mut record.finished_at);
        self.cost_usd
            .apply_nullable(model, "costUsd", &mut record.cost_usd)?;
        self.readiness_score
            .apply_nullable(model, "readinessScore", &mut record.readiness_score)?;
        self.results.apply_nullable(&mut record.results);
        Ok(())
    }
}

// ── AuditBundle ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditBundleCreate {
    pub bundle_id: Option<String>,
    pub workspace_id: String,
    pub bundle_data: serde_json::Value,
    pub signature_key_id: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

impl CreateInput<AuditBundle> for AuditBundleCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<AuditBundle, StoreError> {
        Ok(AuditBundle {
            bundle_id: id_or_generate(self.bundle_id)?,
            workspace_id: self.workspace_id,
            bundle_data: self.bundle_data,
            signature_key_id: self.signature_key_id,
            signature: self.signature,
            signed_at: self.signed_at,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditBundleUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub bundle_data: JsonUpdate,
    pub signature_key_id: FieldUpdate<String>,
    pub signature: FieldUpdate<String>,
    pub signed_at: FieldUpdate<DateTime<Utc>>,
}

impl UpdateInput<AuditBundle> for AuditBundleUpdate {
    fn apply_to(&self, record: &mut AuditBundle, _now: DateTime<Utc>) -> Result<(), StoreError> {
        self.workspace_id.apply(&mut record.workspace_id);
        self.bundle_data
            .apply_required(AuditBundle::MODEL, "bundleData", &mut record.bundle_data)?;
        self.signature_key_id.apply(&mut record.signature_key_id);
        self.signature.apply(&mut record.signature);
        self.signed_at.apply(&mut record.signed_at);
        Ok(())
    }
}

// ── Connector ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorCreate {
    pub connector_id: Option<String>,
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
}

impl CreateInput<Connector> for ConnectorCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<Connector, StoreError> {
        Ok(Connector {
            connector_id: id_or_generate(self.connector_id)?,
            workspace_id: self.workspace_id,
            platform: self.platform,
            account_id: self.account_id,
            display_name: self.display_name,
            status: self.status,
            scopes: self.scopes,
            last_connected_at: self.last_connected_at,
            owner_contact: self.owner_contact,
            credentials_ref: self.credentials_ref,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub platform: FieldUpdate<String>,
    pub account_id: FieldUpdate<String>,
    pub display_name: FieldUpdate<String>,
    pub status: FieldUpdate<String>,
    pub scopes: JsonUpdate,
    pub last_connected_at: FieldUpdate<Option<DateTime<Utc>>>,
    pub owner_contact: FieldUpdate<Option<String>>,
    pub credentials_ref: FieldUpdate<Option<String>>,
}

impl UpdateInput<Connector> for ConnectorUpdate {
    fn apply_to(&self, record: &mut Connector, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.workspace_id.apply(&mut record.workspace_id);
        self.platform.apply(&mut record.platform);
        self.account_id.apply(&mut record.account_id);
        self.display_name.apply(&mut record.display_name);
        self.status.apply(&mut record.status);
        self.scopes.apply_nullable(&mut record.scopes);
        self.last_connected_at.apply(&mut record.last_connected_at);
        self.owner_contact.apply(&mut record.owner_contact);
        self.credentials_ref.apply(&mut record.credentials_ref);
        record.updated_at = now;
        Ok(())
    }
}

// ── ConsentRecord ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecordCreate {
    pub consent_id: Option<String>,
    pub workspace_id: String,
    pub consent_type: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub document_ref: Option<String>,
    pub verifier_signature: Option<String>,
}

impl CreateInput<ConsentRecord> for ConsentRecordCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<ConsentRecord, StoreError> {
        Ok(ConsentRecord {
            consent_id: id_or_generate(self.consent_id)?,
            workspace_id: self.workspace_id,
            consent_type: self.consent_type,
            granted_by: self.granted_by,
            granted_at: self.granted_at,
            expires_at: self.expires_at,
            document_ref: self.document_ref,
            verifier_signature: self.verifier_signature,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsentRecordUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub consent_type: FieldUpdate<String>,
    pub granted_by: FieldUpdate<String>,
    pub granted_at: FieldUpdate<DateTime<Utc>>,
    pub expires_at: FieldUpdate<DateTime<Utc>>,
    pub document_ref: FieldUpdate<Option<String>>,
    pub verifier_signature: FieldUpdate<Option<String>>,
}

impl UpdateInput<ConsentRecord> for ConsentRecordUpdate {
    fn apply_to(&self, record: &mut ConsentRecord, _now: DateTime<Utc>) -> Result<(), StoreError> {
        self.workspace_id.apply(&mut record.workspace_id);
        self.consent_type.apply(&mut record.consent_type);
        self.granted_by.apply(&mut record.granted_by);
        self.granted_at.apply(&mut record.granted_at);
        self.expires_at.apply(&mut record.expires_at);
        self.document_ref.apply(&mut record.document_ref);
        self.verifier_signature.apply(&mut record.verifier_signature);
        Ok(())
    }
}

// ── BrandTwin ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandTwinCreate {
    pub twin_id: Option<String>,
    pub workspace_id: String,
    pub brand_id: String,
    pub snapshot_at: DateTime<Utc>,
    pub brand_data: serde_json::Value,
    pub quality_score: Option<Decimal>,
}

impl CreateInput<BrandTwin> for BrandTwinCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<BrandTwin, StoreError> {
        Ok(BrandTwin {
            twin_id: id_or_generate(self.twin_id)?,
            workspace_id: self.workspace_id,
            brand_id: self.brand_id,
            snapshot_at: self.snapshot_at,
            brand_data: self.brand_data,
            quality_score: self.quality_score,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrandTwinUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub brand_id: FieldUpdate<String>,
    pub snapshot_at: FieldUpdate<DateTime<Utc>>,
    pub brand_data: JsonUpdate,
    pub quality_score: NumberUpdate<Decimal>,
}

impl UpdateInput<BrandTwin> for BrandTwinUpdate {
    fn apply_to(&self, record: &mut BrandTwin, _now: DateTime<Utc>) -> Result<(), StoreError> {
        let model = BrandTwin::MODEL;
        self.workspace_id.apply(&mut record.workspace_id);
        self.brand_id.apply(&mut record.brand_id);
        self.snapshot_at.apply(&mut record.snapshot_at);
        self.brand_data
            .apply_required(model, "brandData", &mut record.brand_data)?;
        self.quality_score
            .apply_nullable(model, "qualityScore", &mut record.quality_score)
    }
}

// ── DecisionCard ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCardCreate {
    pub action_id: Option<String>,
    pub workspace_id: String,
    pub title: String,
    pub one_line: String,
    pub readiness_score: Decimal,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub card_data: serde_json::Value,
}

impl CreateInput<DecisionCard> for DecisionCardCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<DecisionCard, StoreError> {
        Ok(DecisionCard {
            action_id: id_or_generate(self.action_id)?,
            workspace_id: self.workspace_id,
            title: self.title,
            one_line: self.one_line,
            readiness_score: self.readiness_score,
            expires_at: self.expires_at,
            status: self.status,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            card_data: self.card_data,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionCardUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub title: FieldUpdate<String>,
    pub one_line: FieldUpdate<String>,
    pub readiness_score: NumberUpdate<Decimal>,
    pub expires_at: FieldUpdate<DateTime<Utc>>,
    pub status: FieldUpdate<String>,
    pub approved_by: FieldUpdate<Option<String>>,
    pub approved_at: FieldUpdate<Option<DateTime<Utc>>>,
    pub card_data: JsonUpdate,
}

impl DecisionCardUpdate {
    /// Approval sets the approver, the approval instant and the status in one write.
    pub fn approve(approved_by: impl Into<String>, approved_at: DateTime<Utc>) -> Self {
        Self {
            status: FieldUpdate::Set("approved".to_string()),
            approved_by: FieldUpdate::Set(Some(approved_by.into())),
            approved_at: FieldUpdate::Set(Some(approved_at)),
            ..Default::default()
        }
    }
}

impl UpdateInput<DecisionCard> for DecisionCardUpdate {
    fn apply_to(&self, record: &mut DecisionCard, _now: DateTime<Utc>) -> Result<(), StoreError> {
        let model = DecisionCard::MODEL;
        self.workspace_id.apply(&mut record.workspace_id);
        self.title.apply(&mut record.title);
        self.one_line.apply(&mut record.one_line);
        self.readiness_score
            .apply(model, "readinessScore", &mut record.readiness_score)?;
        self.expires_at.apply(&mut record.expires_at);
        self.status.apply(&mut record.status);
        self.approved_by.apply(&mut record.approved_by);
        self.approved_at.apply(&mut record.approved_at);
        self.card_data
            .apply_required(model, "cardData", &mut record.card_data)
    }
}

// ── SimulationResult ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResultCreate {
    pub simulation_id: Option<String>,
    pub workspace_id: String,
    pub readiness_score: Decimal,
    pub policy_pass_pct: Decimal,
    pub citation_coverage: Decimal,
    pub duplication_risk: Decimal,
    pub cost_estimate_usd: Decimal,
    #[serde(default)]
    pub traces: NullableJson,
    pub simulation_data: serde_json::Value,
}

impl CreateInput<SimulationResult> for SimulationResultCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<SimulationResult, StoreError> {
        Ok(SimulationResult {
            simulation_id: id_or_generate(self.simulation_id)?,
            workspace_id: self.workspace_id,
            readiness_score: self.readiness_score,
            policy_pass_pct: self.policy_pass_pct,
            citation_coverage: self.citation_coverage,
            duplication_risk: self.duplication_risk,
            cost_estimate_usd: self.cost_estimate_usd,
            traces: self.traces,
            simulation_data: self.simulation_data,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationResultUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub readiness_score: NumberUpdate<Decimal>,
    pub policy_pass_pct: NumberUpdate<Decimal>,
    pub citation_coverage: NumberUpdate<Decimal>,
    pub duplication_risk: NumberUpdate<Decimal>,
    pub cost_estimate_usd: NumberUpdate<Decimal>,
    pub traces: JsonUpdate,
    pub simulation_data: JsonUpdate,
}

impl UpdateInput<SimulationResult> for SimulationResultUpdate {
    fn apply_to(
        &self,
        record: &mut SimulationResult,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let model = SimulationResult::MODEL;
        self.workspace_id.apply(&mut record.workspace_id);
        self.readiness_score
            .apply(model, "readinessScore", &mut record.readiness_score)?;
        self.policy_pass_pct
            .apply(model, "policyPassPct", &mut record.policy_pass_pct)?;
        self.citation_coverage
            .apply(model, "citationCoverage", &mut record.citation_coverage)?;
        self.duplication_risk
            .apply(model, "duplicationRisk", &mut record.duplication_risk)?;
        self.cost_estimate_usd
            .apply(model, "costEstimateUsd", &mut record.cost_estimate_usd)?;
        self.traces.apply_nullable(&mut record.traces);
        self.simulation_data
            .apply_required(model, "simulationData", &mut record.simulation_data)
    }
}

// ── AssetFingerprint ────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFingerprintCreate {
    pub asset_id: Option<String>,
    pub workspace_id: String,
    pub asset_type: String,
    pub fingerprint: String,
    pub license: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: NullableJson,
}

impl CreateInput<AssetFingerprint> for AssetFingerprintCreate {
    fn into_record(self, now: DateTime<Utc>) -> Result<AssetFingerprint, StoreError> {
        Ok(AssetFingerprint {
            asset_id: id_or_generate(self.asset_id)?,
            workspace_id: self.workspace_id,
            asset_type: self.asset_type,
            fingerprint: self.fingerprint,
            license: self.license,
            url: self.url,
            metadata: self.metadata,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetFingerprintUpdate {
    pub workspace_id: FieldUpdate<String>,
    pub asset_type: FieldUpdate<String>,
    pub fingerprint: FieldUpdate<String>,
    pub license: FieldUpdate<String>,
    pub url: FieldUpdate<Option<String>>,
    pub metadata: JsonUpdate,
}

impl UpdateInput<AssetFingerprint> for AssetFingerprintUpdate {
    fn apply_to(
        &self,
        record: &mut AssetFingerprint,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.workspace_id.apply(&mut record.workspace_id);
        self.asset_type.apply(&mut record.asset_type);
        self.fingerprint.apply(&mut record.fingerprint);
        self.license.apply(&mut record.license);
        self.url.apply(&mut record.url);
        self.metadata.apply_nullable(&mut record.metadata);
        Ok(())
    }
}
