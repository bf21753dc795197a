//! Domain model for the workspace aggregate store.
//!
//! Aggregate root: Workspace. Child collections: WorkspaceRun, AuditBundle,
//! Connector, ConsentRecord, BrandTwin, DecisionCard, SimulationResult,
//! AssetFingerprint. Every child carries a `workspace_id` foreign key; deleting
//! a workspace deletes all of its children.

mod entities;
mod requests;
pub mod schema;
pub mod values;

pub use entities::*;
pub use requests::*;
pub use schema::{CreateInput, Entity, FieldDef, IndexKey, KeyLookup, UniqueKey, UpdateInput};
pub use values::{
    FieldKind, FieldUpdate, JsonUpdate, NullableJson, NumberUpdate, Value,
};

use serde::Serialize;

/// Child-collection sizes of one workspace (the `_count` selection).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCounts {
    pub runs: u64,
    pub audit_bundles: u64,
    pub connectors: u64,
    pub consent_records: u64,
    pub brand_twins: u64,
    pub decision_cards: u64,
    pub simulation_results: u64,
    pub asset_fingerprints: u64,
}

impl WorkspaceCounts {
    pub fn total(&self) -> u64 {
        self.runs
            + self.audit_bundles
            + self.connectors
            + self.consent_records
            + self.brand_twins
            + self.decision_cards
            + self.simulation_results
            + self.asset_fingerprints
    }
}

/// A workspace loaded together with all eight child collections.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceWithChildren {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub runs: Vec<WorkspaceRun>,
    pub audit_bundles: Vec<AuditBundle>,
    pub connectors: Vec<Connector>,
    pub consent_records: Vec<ConsentRecord>,
    pub brand_twins: Vec<BrandTwin>,
    pub decision_cards: Vec<DecisionCard>,
    pub simulation_results: Vec<SimulationResult>,
    pub asset_fingerprints: Vec<AssetFingerprint>,
}

impl WorkspaceWithChildren {
    pub fn counts(&self) -> WorkspaceCounts {
        WorkspaceCounts {
            runs: self.runs.len() as u64,
            audit_bundles: self.audit_bundles.len() as u64,
            connectors: self.connectors.len() as u64,
            consent_records: self.consent_records.len() as u64,
            brand_twins: self.brand_twins.len() as u64,
            decision_cards: self.decision_cards.len() as u64,
            simulation_results: self.simulation_results.len() as u64,
            asset_fingerprints: self.asset_fingerprints.len() as u64,
        }
    }
}
