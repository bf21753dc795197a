//! D1 result rows and their conversion into entities.
//!
//! Decimals and timestamps are stored as TEXT. JSON columns hold serialized
//! text, so the text `null` is a stored JSON null while a NULL column is a
//! database NULL.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::StoreError;
use crate::models::values::parse_timestamp;
use crate::models::*;

/// An entity decoded from its D1 row struct.
pub trait FromRow: Sized {
    type Row: DeserializeOwned;

    fn from_row(row: Self::Row) -> Result<Self, StoreError>;
}

fn unreadable(model: &str, column: &str, expected: &str) -> StoreError {
    StoreError::Backend(format!(
        "{model}.{column} holds an unreadable value (expected {expected})"
    ))
}

fn timestamp(model: &str, column: &str, text: &str) -> Result<DateTime<Utc>, StoreError> {
    parse_timestamp(text).ok_or_else(|| unreadable(model, column, "RFC 3339 timestamp"))
}

fn opt_timestamp(
    model: &str,
    column: &str,
    text: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    text.map(|t| timestamp(model, column, &t)).transpose()
}

fn decimal(model: &str, column: &str, text: &str) -> Result<Decimal, StoreError> {
    text.parse()
        .map_err(|_| unreadable(model, column, "decimal text"))
}

fn opt_decimal(model: &str, column: &str, text: Option<String>) -> Result<Option<Decimal>, StoreError> {
    text.map(|t| decimal(model, column, &t)).transpose()
}

fn nullable_json(model: &str, column: &str, text: Option<String>) -> Result<NullableJson, StoreError> {
    match text {
        None => Ok(NullableJson::DbNull),
        Some(t) => serde_json::from_str(&t)
            .map(NullableJson::Json)
            .map_err(|_| unreadable(model, column, "JSON text")),
    }
}

fn json(model: &str, column: &str, text: &str) -> Result<Json, StoreError> {
    serde_json::from_str(text).map_err(|_| unreadable(model, column, "JSON text"))
}

// ── Workspace ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WorkspaceRow {
    pub workspace_id: String,
    pub tenant_id: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub lifecycle: String,
    pub contract_version: String,
    pub goals: Option<String>,
    pub primary_channels: Option<String>,
    pub budget: Option<String>,
    pub approval_policy: Option<String>,
    pub data_retention: Option<String>,
    pub contract_data: Option<String>,
    pub risk_profile: String,
    pub ttl_hours: i32,
    pub policy_bundle_ref: String,
    pub policy_bundle_checksum: String,
}

impl WorkspaceRow {
    pub fn into_workspace(self) -> Result<Workspace, StoreError> {
        const M: &str = Workspace::MODEL;
        Ok(Workspace {
            created_at: timestamp(M, "created_at", &self.created_at)?,
            updated_at: timestamp(M, "updated_at", &self.updated_at)?,
            goals: nullable_json(M, "goals", self.goals)?,
            primary_channels: nullable_json(M, "primary_channels", self.primary_channels)?,
            budget: nullable_json(M, "budget", self.budget)?,
            approval_policy: nullable_json(M, "approval_policy", self.approval_policy)?,
            data_retention: nullable_json(M, "data_retention", self.data_retention)?,
            contract_data: nullable_json(M, "contract_data", self.contract_data)?,
            workspace_id: self.workspace_id,
            tenant_id: self.tenant_id,
            created_by: self.created_by,
            lifecycle: self.lifecycle,
            contract_version: self.contract_version,
            risk_profile: self.risk_profile,
            ttl_hours: self.ttl_hours,
            policy_bundle_ref: self.policy_bundle_ref,
            policy_bundle_checksum: self.policy_bundle_checksum,
        })
    }
}

impl FromRow for Workspace {
    type Row = WorkspaceRow;

    fn from_row(row: WorkspaceRow) -> Result<Self, StoreError> {
        row.into_workspace()
    }
}

// ── Children ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WorkspaceRunRow {
    pub run_id: String,
    pub workspace_id: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub cost_usd: Option<String>,
    pub readiness_score: Option<String>,
    pub results: Option<String>,
    pub created_at: String,
}

impl WorkspaceRunRow {
    pub fn into_run(self) -> Result<WorkspaceRun, StoreError> {
        const M: &str = WorkspaceRun::MODEL;
        Ok(WorkspaceRun {
            started_at: timestamp(M, "started_at", &self.started_at)?,
            finished_at: opt_timestamp(M, "finished_at", self.finished_at)?,
            cost_usd: opt_decimal(M, "cost_usd", self.cost_usd)?,
            readiness_score: opt_decimal(M, "readiness_score", self.readiness_score)?,
            results: nullable_json(M, "results", self.results)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            run_id: self.run_id,
            workspace_id: self.workspace_id,
            status: self.status,
        })
    }
}

impl FromRow for WorkspaceRun {
    type Row = WorkspaceRunRow;

    fn from_row(row: WorkspaceRunRow) -> Result<Self, StoreError> {
        row.into_run()
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditBundleRow {
    pub bundle_id: String,
    pub workspace_id: String,
    pub bundle_data: String,
    pub signature_key_id: String,
    pub signature: String,
    pub signed_at: String,
    pub created_at: String,
}

impl AuditBundleRow {
    pub fn into_bundle(self) -> Result<AuditBundle, StoreError> {
        const M: &str = AuditBundle::MODEL;
        Ok(AuditBundle {
            bundle_data: json(M, "bundle_data", &self.bundle_data)?,
            signed_at: timestamp(M, "signed_at", &self.signed_at)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            bundle_id: self.bundle_id,
            workspace_id: self.workspace_id,
            signature_key_id: self.signature_key_id,
            signature: self.signature,
        })
    }
}

impl FromRow for AuditBundle {
    type Row = AuditBundleRow;

    fn from_row(row: AuditBundleRow) -> Result<Self, StoreError> {
        row.into_bundle()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectorRow {
    pub connector_id: String,
    pub workspace_id: String,
    pub platform: String,
    pub account_id: String,
    pub display_name: String,
    pub status: String,
    pub scopes: Option<String>,
    pub last_connected_at: Option<String>,
    pub owner_contact: Option<String>,
    pub credentials_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConnectorRow {
    pub fn into_connector(self) -> Result<Connector, StoreError> {
        const M: &str = Connector::MODEL;
        Ok(Connector {
            scopes: nullable_json(M, "scopes", self.scopes)?,
            last_connected_at: opt_timestamp(M, "last_connected_at", self.last_connected_at)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            updated_at: timestamp(M, "updated_at", &self.updated_at)?,
            connector_id: self.connector_id,
            workspace_id: self.workspace_id,
            platform: self.platform,
            account_id: self.account_id,
            display_name: self.display_name,
            status: self.status,
            owner_contact: self.owner_contact,
            credentials_ref: self.credentials_ref,
        })
    }
}

impl FromRow for Connector {
    type Row = ConnectorRow;

    fn from_row(row: ConnectorRow) -> Result<Self, StoreError> {
        row.into_connector()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsentRecordRow {
    pub consent_id: String,
    pub workspace_id: String,
    pub consent_type: String,
    pub granted_by: String,
    pub granted_at: String,
    pub expires_at: String,
    pub document_ref: Option<String>,
    pub verifier_signature: Option<String>,
    pub created_at: String,
}

impl ConsentRecordRow {
    pub fn into_consent(self) -> Result<ConsentRecord, StoreError> {
        const M: &str = ConsentRecord::MODEL;
        Ok(ConsentRecord {
            granted_at: timestamp(M, "granted_at", &self.granted_at)?,
            expires_at: timestamp(M, "expires_at", &self.expires_at)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            consent_id: self.consent_id,
            workspace_id: self.workspace_id,
            consent_type: self.consent_type,
            granted_by: self.granted_by,
            document_ref: self.document_ref,
            verifier_signature: self.verifier_signature,
        })
    }
}

impl FromRow for ConsentRecord {
    type Row = ConsentRecordRow;

    fn from_row(row: ConsentRecordRow) -> Result<Self, StoreError> {
        row.into_consent()
    }
}

#[derive(Debug, Deserialize)]
pub struct BrandTwinRow {
    pub twin_id: String,
    pub workspace_id: String,
    pub brand_id: String,
    pub snapshot_at: String,
    pub brand_data: String,
    pub quality_score: Option<String>,
    pub created_at: String,
}

impl BrandTwinRow {
    pub fn into_twin(self) -> Result<BrandTwin, StoreError> {
        const M: &str = BrandTwin::MODEL;
        Ok(BrandTwin {
            snapshot_at: timestamp(M, "snapshot_at", &self.snapshot_at)?,
            brand_data: json(M, "brand_data", &self.brand_data)?,
            quality_score: opt_decimal(M, "quality_score", self.quality_score)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            twin_id: self.twin_id,
            workspace_id: self.workspace_id,
            brand_id: self.brand_id,
        })
    }
}

impl FromRow for BrandTwin {
    type Row = BrandTwinRow;

    fn from_row(row: BrandTwinRow) -> Result<Self, StoreError> {
        row.into_twin()
    }
}

#[derive(Debug, Deserialize)]
pub struct DecisionCardRow {
    pub action_id: String,
    pub workspace_id: String,
    pub title: String,
    pub one_line: String,
    pub readiness_score: String,
    pub expires_at: String,
    pub status: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub card_data: String,
    pub created_at: String,
}

impl DecisionCardRow {
    pub fn into_card(self) -> Result<DecisionCard, StoreError> {
        const M: &str = DecisionCard::MODEL;
        Ok(DecisionCard {
            readiness_score: decimal(M, "readiness_score", &self.readiness_score)?,
            expires_at: timestamp(M, "expires_at", &self.expires_at)?,
            approved_at: opt_timestamp(M, "approved_at", self.approved_at)?,
            card_data: json(M, "card_data", &self.card_data)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            action_id: self.action_id,
            workspace_id: self.workspace_id,
            title: self.title,
            one_line: self.one_line,
            status: self.status,
            approved_by: self.approved_by,
        })
    }
}

impl FromRow for DecisionCard {
    type Row = DecisionCardRow;

    fn from_row(row: DecisionCardRow) -> Result<Self, StoreError> {
        row.into_card()
    }
}

#[derive(Debug, Deserialize)]
pub struct SimulationResultRow {
    pub simulation_id: String,
    pub workspace_id: String,
    pub readiness_score: String,
    pub policy_pass_pct: String,
    pub citation_coverage: String,
    pub duplication_risk: String,
    pub cost_estimate_usd: String,
    pub traces: Option<String>,
    pub simulation_data: String,
    pub created_at: String,
}

impl SimulationResultRow {
    pub fn into_simulation(self) -> Result<SimulationResult, StoreError> {
        const M: &str = SimulationResult::MODEL;
        Ok(SimulationResult {
            readiness_score: decimal(M, "readiness_score", &self.readiness_score)?,
            policy_pass_pct: decimal(M, "policy_pass_pct", &self.policy_pass_pct)?,
            citation_coverage: decimal(M, "citation_coverage", &self.citation_coverage)?,
            duplication_risk: decimal(M, "duplication_risk", &self.duplication_risk)?,
            cost_estimate_usd: decimal(M, "cost_estimate_usd", &self.cost_estimate_usd)?,
            traces: nullable_json(M, "traces", self.traces)?,
            simulation_data: json(M, "simulation_data", &self.simulation_data)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            simulation_id: self.simulation_id,
            workspace_id: self.workspace_id,
        })
    }
}

impl FromRow for SimulationResult {
    type Row = SimulationResultRow;

    fn from_row(row: SimulationResultRow) -> Result<Self, StoreError> {
        row.into_simulation()
    }
}

#[derive(Debug, Deserialize)]
pub struct AssetFingerprintRow {
    pub asset_id: String,
    pub workspace_id: String,
    pub asset_type: String,
    pub fingerprint: String,
    pub license: String,
    pub url: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
}

impl AssetFingerprintRow {
    pub fn into_asset(self) -> Result<AssetFingerprint, StoreError> {
        const M: &str = AssetFingerprint::MODEL;
        Ok(AssetFingerprint {
            metadata: nullable_json(M, "metadata", self.metadata)?,
            created_at: timestamp(M, "created_at", &self.created_at)?,
            asset_id: self.asset_id,
            workspace_id: self.workspace_id,
            asset_type: self.asset_type,
            fingerprint: self.fingerprint,
            license: self.license,
            url: self.url,
        })
    }
}

impl FromRow for AssetFingerprint {
    type Row = AssetFingerprintRow;

    fn from_row(row: AssetFingerprintRow) -> Result<Self, StoreError> {
        row.into_asset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_connector_with_db_null_and_json_null() {
        let row: ConnectorRow = serde_json::from_value(json!({
            "connector_id": "c1",
            "workspace_id": "w1",
            "platform": "meta",
            "account_id": "a1",
            "display_name": "Meta Ads",
            "status": "active",
            "scopes": "null",
            "last_connected_at": null,
            "owner_contact": "ops@example.com",
            "created_at": "2026-03-01T10:00:00.000000000Z",
            "updated_at": "2026-03-02T10:00:00.000000000Z"
        }))
        .unwrap();
        let c = row.into_connector().unwrap();
        assert_eq!(c.scopes, NullableJson::Json(Json::Null));
        assert_eq!(c.last_connected_at, None);
        assert_eq!(c.credentials_ref, None);
        assert_eq!(c.owner_contact.as_deref(), Some("ops@example.com"));
        assert!(c.updated_at > c.created_at);
    }

    #[test]
    fn decimals_keep_their_scale() {
        let row: SimulationResultRow = serde_json::from_value(json!({
            "simulation_id": "s1",
            "workspace_id": "w1",
            "readiness_score": "0.875",
            "policy_pass_pct": "99.10",
            "citation_coverage": "1",
            "duplication_risk": "0.05",
            "cost_estimate_usd": "1234.5678",
            "traces": null,
            "simulation_data": "{\"steps\":[1,2]}",
            "created_at": "2026-03-01T10:00:00.000000000Z"
        }))
        .unwrap();
        let s = SimulationResult::from_row(row).unwrap();
        assert_eq!(s.policy_pass_pct.to_string(), "99.10");
        assert_eq!(s.cost_estimate_usd.to_string(), "1234.5678");
        assert_eq!(s.citation_coverage, Decimal::ONE);
        assert!(s.traces.is_db_null());
        assert_eq!(s.simulation_data, json!({"steps": [1, 2]}));
    }

    #[test]
    fn workspace_row_with_absent_json_columns() {
        let row: WorkspaceRow = serde_json::from_value(json!({
            "workspace_id": "w1",
            "tenant_id": "t1",
            "created_by": "u1",
            "created_at": "2026-03-01T10:00:00.000000000Z",
            "updated_at": "2026-03-01T10:00:00.000000000Z",
            "lifecycle": "draft",
            "contract_version": "v1",
            "goals": "[\"reach\"]",
            "risk_profile": "low",
            "ttl_hours": 72,
            "policy_bundle_ref": "pb",
            "policy_bundle_checksum": "abc"
        }))
        .unwrap();
        let w = row.into_workspace().unwrap();
        assert_eq!(w.ttl_hours, 72);
        assert_eq!(w.goals, NullableJson::Json(json!(["reach"])));
        assert!(w.budget.is_db_null());
    }

    #[test]
    fn unreadable_columns_are_backend_errors() {
        let row = AuditBundleRow {
            bundle_id: "b1".into(),
            workspace_id: "w1".into(),
            bundle_data: "{not json".into(),
            signature_key_id: "k1".into(),
            signature: "sig".into(),
            signed_at: "2026-03-01T10:00:00.000000000Z".into(),
            created_at: "2026-03-01T10:00:00.000000000Z".into(),
        };
        let err = row.into_bundle().unwrap_err();
        assert!(err.to_string().contains("bundle_data"));

        let card: Result<DecisionCardRow, _> =
            serde_json::from_value(json!({"action_id": 7}));
        assert!(card.is_err());
    }
}
