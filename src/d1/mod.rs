//! D1 persistence backend.
//!
//! Same operation set as the in-process [`WorkspaceStore`](crate::store::WorkspaceStore),
//! async over a [`D1Database`]. Filters are partly pushed into SQL (see
//! [`sql`]) and always re-evaluated in Rust; ordering, pagination and
//! aggregation run on the shared evaluator so both backends answer alike.
//! Every logical write is one statement or one atomic `batch`.

pub mod conflict;
pub mod rows;
pub mod sql;

use std::marker::PhantomData;

use chrono::Utc;
use serde::Deserialize;
use wasm_bindgen::JsValue;
use worker::{D1Database, D1PreparedStatement, D1Result, Env};

use crate::config::StoreConfig;
use crate::error::{failed_table, StoreError};
use crate::models::{
    AssetFingerprint, AuditBundle, BrandTwin, Connector, ConsentRecord, CreateInput, DecisionCard,
    Entity, FieldDef, SimulationResult, UniqueKey, UpdateInput, Workspace, WorkspaceCounts,
    WorkspaceCreateNested, WorkspaceRun, WorkspaceWithChildren,
};
use crate::query::{
    aggregate, eval, AggregateArgs, AggregateResult, Filter, FindArgs, GroupByArgs, GroupRow,
};

use conflict::{constraint_fields, with_batch_context, with_row_context};
use rows::FromRow;
use sql::{SqlParam, Statement};

/// An entity the D1 backend can read and write.
pub trait D1Entity: Entity + FromRow {}

impl<E: Entity + FromRow> D1Entity for E {}

fn to_js(param: &SqlParam) -> JsValue {
    match param {
        SqlParam::Null => JsValue::NULL,
        SqlParam::Int(i) => JsValue::from(*i as f64),
        SqlParam::Text(s) => JsValue::from_str(s),
    }
}

fn backend(model: &'static str) -> impl Fn(worker::Error) -> StoreError {
    move |err| StoreError::from_backend_message(model, &err.to_string())
}

// D1 binds at most 100 parameters per statement.
const COLLISION_CHUNK: usize = 30;

fn changes(result: &D1Result) -> u64 {
    result
        .meta()
        .ok()
        .flatten()
        .and_then(|m| m.changes)
        .unwrap_or(0) as u64
}

#[derive(Deserialize)]
struct CountsRow {
    present: f64,
    runs: f64,
    audit_bundles: f64,
    connectors: f64,
    consent_records: f64,
    brand_twins: f64,
    decision_cards: f64,
    simulation_results: f64,
    asset_fingerprints: f64,
}

impl CountsRow {
    fn into_counts(self) -> WorkspaceCounts {
        WorkspaceCounts {
            runs: self.runs as u64,
            audit_bundles: self.audit_bundles as u64,
            connectors: self.connectors as u64,
            consent_records: self.consent_records as u64,
            brand_twins: self.brand_twins as u64,
            decision_cards: self.decision_cards as u64,
            simulation_results: self.simulation_results as u64,
            asset_fingerprints: self.asset_fingerprints as u64,
        }
    }
}

// ── Store ───────────────────────────────────────────────────────

pub struct D1Store {
    db: D1Database,
    config: StoreConfig,
}

impl D1Store {
    pub fn new(db: D1Database, config: StoreConfig) -> Self {
        Self { db, config }
    }

    /// Reads [`StoreConfig`] from the Worker vars and opens its D1 binding.
    pub fn from_env(env: &Env) -> Result<Self, StoreError> {
        let config = StoreConfig::from_env(env)?;
        let db = env
            .d1(&config.d1_binding)
            .map_err(|e| StoreError::Backend(format!("D1 binding {}: {e}", config.d1_binding)))?;
        Ok(Self::new(db, config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn delegate<E: D1Entity>(&self) -> D1Delegate<'_, E> {
        D1Delegate {
            store: self,
            _entity: PhantomData,
        }
    }

    pub fn workspace(&self) -> D1Delegate<'_, Workspace> {
        self.delegate()
    }

    pub fn workspace_run(&self) -> D1Delegate<'_, WorkspaceRun> {
        self.delegate()
    }

    pub fn audit_bundle(&self) -> D1Delegate<'_, AuditBundle> {
        self.delegate()
    }

    pub fn connector(&self) -> D1Delegate<'_, Connector> {
        self.delegate()
    }

    pub fn consent_record(&self) -> D1Delegate<'_, ConsentRecord> {
        self.delegate()
    }

    pub fn brand_twin(&self) -> D1Delegate<'_, BrandTwin> {
        self.delegate()
    }

    pub fn decision_card(&self) -> D1Delegate<'_, DecisionCard> {
        self.delegate()
    }

    pub fn simulation_result(&self) -> D1Delegate<'_, SimulationResult> {
        self.delegate()
    }

    pub fn asset_fingerprint(&self) -> D1Delegate<'_, AssetFingerprint> {
        self.delegate()
    }

    // ── Statement plumbing ──

    fn prepare(&self, model: &'static str, stmt: &Statement) -> Result<D1PreparedStatement, StoreError> {
        let params: Vec<JsValue> = stmt.params.iter().map(to_js).collect();
        self.db
            .prepare(&stmt.sql)
            .bind(&params)
            .map_err(backend(model))
    }

    async fn run(&self, model: &'static str, stmt: &Statement) -> Result<u64, StoreError> {
        let result = self
            .prepare(model, stmt)?
            .run()
            .await
            .map_err(backend(model))?;
        Ok(changes(&result))
    }

    async fn batch(
        &self,
        model: &'static str,
        stmts: Vec<D1PreparedStatement>,
    ) -> Result<Vec<D1Result>, StoreError> {
        self.batch_raw(stmts).await.map_err(backend(model))
    }

    async fn batch_raw(
        &self,
        stmts: Vec<D1PreparedStatement>,
    ) -> Result<Vec<D1Result>, worker::Error> {
        if stmts.is_empty() {
            return Ok(Vec::new());
        }
        self.db.batch(stmts).await
    }

    async fn fetch<E: D1Entity>(&self, stmt: &Statement) -> Result<Vec<E>, StoreError> {
        let result = self
            .prepare(E::MODEL, stmt)?
            .all()
            .await
            .map_err(backend(E::MODEL))?;
        decode(&result)
    }

    // ── Failed batches ──

    /// Attributes a failed batch of `rows` to the row that broke it, reading
    /// the stored rows it collided with. `replaced` lists primary keys the
    /// batch was rewriting.
    async fn attribute<E: D1Entity>(
        &self,
        err: StoreError,
        rows: &[E],
        replaced: &[String],
    ) -> StoreError {
        let stored = match &err {
            StoreError::UniqueViolation {
                constraint, key, ..
            } if key.is_empty() => {
                let fields = constraint_fields::<E>(constraint);
                self.colliding(&fields, rows).await
            }
            _ => Vec::new(),
        };
        with_batch_context(err, rows, &stored, replaced)
    }

    async fn colliding<E: D1Entity>(&self, fields: &[E::Field], rows: &[E]) -> Vec<E> {
        if fields.is_empty() {
            return Vec::new();
        }
        let mut stored = Vec::new();
        for chunk in rows.chunks(COLLISION_CHUNK) {
            match self.fetch::<E>(&sql::colliding(fields, chunk)).await {
                Ok(found) => stored.extend(found),
                Err(err) => {
                    log::warn!("{} collision lookup failed: {err}", E::MODEL);
                    break;
                }
            }
        }
        stored
    }

    /// Nested creates span several tables; SQLite names the failing one.
    async fn attribute_nested(&self, message: &str, nested: &WorkspaceWithChildren) -> StoreError {
        let table = failed_table(message);
        if table == Some(WorkspaceRun::TABLE) {
            self.attribute_message(message, &nested.runs).await
        } else if table == Some(AuditBundle::TABLE) {
            self.attribute_message(message, &nested.audit_bundles).await
        } else if table == Some(Connector::TABLE) {
            self.attribute_message(message, &nested.connectors).await
        } else if table == Some(ConsentRecord::TABLE) {
            self.attribute_message(message, &nested.consent_records).await
        } else if table == Some(BrandTwin::TABLE) {
            self.attribute_message(message, &nested.brand_twins).await
        } else if table == Some(DecisionCard::TABLE) {
            self.attribute_message(message, &nested.decision_cards).await
        } else if table == Some(SimulationResult::TABLE) {
            self.attribute_message(message, &nested.simulation_results).await
        } else if table == Some(AssetFingerprint::TABLE) {
            self.attribute_message(message, &nested.asset_fingerprints).await
        } else {
            self.attribute_message(message, std::slice::from_ref(&nested.workspace))
                .await
        }
    }

    async fn attribute_message<E: D1Entity>(&self, message: &str, rows: &[E]) -> StoreError {
        let err = StoreError::from_backend_message(E::MODEL, message);
        self.attribute(err, rows, &[]).await
    }

    // ── Aggregate root ──

    /// Writes a workspace and its child records in one batch. Each child is
    /// attached to the new workspace whatever `workspaceId` it carried.
    pub async fn create_workspace_nested(
        &self,
        input: WorkspaceCreateNested,
    ) -> Result<WorkspaceWithChildren, StoreError> {
        let now = Utc::now();
        let enforce = self.config.enforce_domain_invariants;
        let workspace: Workspace = input.workspace.into_record(now)?;
        workspace.validate(enforce)?;
        let id = workspace.workspace_id.clone();

        let mut stmts = vec![self.prepare(Workspace::MODEL, &sql::insert(&workspace, false))?];
        let nested = WorkspaceWithChildren {
            runs: self.nested(&id, input.runs, &mut stmts)?,
            audit_bundles: self.nested(&id, input.audit_bundles, &mut stmts)?,
            connectors: self.nested(&id, input.connectors, &mut stmts)?,
            consent_records: self.nested(&id, input.consent_records, &mut stmts)?,
            brand_twins: self.nested(&id, input.brand_twins, &mut stmts)?,
            decision_cards: self.nested(&id, input.decision_cards, &mut stmts)?,
            simulation_results: self.nested(&id, input.simulation_results, &mut stmts)?,
            asset_fingerprints: self.nested(&id, input.asset_fingerprints, &mut stmts)?,
            workspace,
        };
        if let Err(err) = self.batch_raw(stmts).await {
            let err = self.attribute_nested(&err.to_string(), &nested).await;
            log::warn!("nested workspace create {id} rejected: {err}");
            return Err(err);
        }
        log::debug!(
            "workspace {id} created with {} child rows",
            nested.counts().total()
        );
        Ok(nested)
    }

    fn nested<E: D1Entity>(
        &self,
        workspace_id: &str,
        inputs: Vec<E::Create>,
        stmts: &mut Vec<D1PreparedStatement>,
    ) -> Result<Vec<E>, StoreError> {
        let now = Utc::now();
        let mut rows = Vec::with_capacity(inputs.len());
        for input in inputs {
            let mut row = input.into_record(now)?;
            row.set_workspace_ref(workspace_id);
            row.validate(self.config.enforce_domain_invariants)?;
            stmts.push(self.prepare(E::MODEL, &sql::insert(&row, false))?);
            rows.push(row);
        }
        Ok(rows)
    }

    /// Sizes of the eight child collections of a workspace.
    pub async fn workspace_counts(&self, workspace_id: &str) -> Result<WorkspaceCounts, StoreError> {
        let row: Option<CountsRow> = self
            .prepare(Workspace::MODEL, &sql::child_counts(workspace_id))?
            .first(None)
            .await
            .map_err(backend(Workspace::MODEL))?;
        match row {
            Some(row) if row.present > 0.0 => Ok(row.into_counts()),
            _ => Err(StoreError::not_found(Workspace::MODEL, workspace_id)),
        }
    }

    /// A workspace with all of its children, read in one batch.
    pub async fn find_workspace_with_children(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceWithChildren>, StoreError> {
        let key = workspace_id.to_string();
        let stmts = vec![
            self.prepare(Workspace::MODEL, &sql::select_unique::<Workspace>(&key))?,
            self.prepare(WorkspaceRun::MODEL, &sql::children::<WorkspaceRun>(workspace_id))?,
            self.prepare(AuditBundle::MODEL, &sql::children::<AuditBundle>(workspace_id))?,
            self.prepare(Connector::MODEL, &sql::children::<Connector>(workspace_id))?,
            self.prepare(ConsentRecord::MODEL, &sql::children::<ConsentRecord>(workspace_id))?,
            self.prepare(BrandTwin::MODEL, &sql::children::<BrandTwin>(workspace_id))?,
            self.prepare(DecisionCard::MODEL, &sql::children::<DecisionCard>(workspace_id))?,
            self.prepare(SimulationResult::MODEL, &sql::children::<SimulationResult>(workspace_id))?,
            self.prepare(AssetFingerprint::MODEL, &sql::children::<AssetFingerprint>(workspace_id))?,
        ];
        let results = self.batch(Workspace::MODEL, stmts).await?;
        let [ws, runs, audit, conn, consent, twins, cards, sims, assets] =
            <[D1Result; 9]>::try_from(results).map_err(|r| {
                StoreError::Backend(format!("expected 9 batch results, got {}", r.len()))
            })?;
        let Some(workspace) = decode::<Workspace>(&ws)?.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(WorkspaceWithChildren {
            workspace,
            runs: decode(&runs)?,
            audit_bundles: decode(&audit)?,
            connectors: decode(&conn)?,
            consent_records: decode(&consent)?,
            brand_twins: decode(&twins)?,
            decision_cards: decode(&cards)?,
            simulation_results: decode(&sims)?,
            asset_fingerprints: decode(&assets)?,
        }))
    }
}

fn decode<E: D1Entity>(result: &D1Result) -> Result<Vec<E>, StoreError> {
    let rows: Vec<E::Row> = result.results().map_err(backend(E::MODEL))?;
    rows.into_iter().map(E::from_row).collect()
}

// ── Delegates ───────────────────────────────────────────────────

/// Per-entity handle over D1, mirroring [`crate::store::Delegate`].
pub struct D1Delegate<'s, E: D1Entity> {
    store: &'s D1Store,
    _entity: PhantomData<E>,
}

impl<'s, E: D1Entity> D1Delegate<'s, E> {
    fn enforce(&self) -> bool {
        self.store.config.enforce_domain_invariants
    }

    async fn candidates(&self, filter: &Filter<E::Field>) -> Result<Vec<E>, StoreError> {
        eval::validate_filter(E::MODEL, filter)?;
        self.store.fetch(&sql::select::<E>(filter)).await
    }

    /// Rows matching `args`, with no `take` cap applied.
    async fn select(&self, args: &FindArgs<E>) -> Result<Vec<E>, StoreError> {
        let rows = self.candidates(&args.filter).await?;
        Ok(eval::select(rows.iter(), args)?.into_iter().cloned().collect())
    }

    async fn locate(&self, key: &E::Key) -> Result<E, StoreError> {
        self.lookup(key)
            .await?
            .ok_or_else(|| StoreError::not_found(E::MODEL, key.lookup()))
    }

    async fn lookup(&self, key: &E::Key) -> Result<Option<E>, StoreError> {
        let lookup = key.lookup();
        let rows: Vec<E> = self.store.fetch(&sql::select_unique::<E>(key)).await?;
        Ok(rows.into_iter().find(|row| row.matches_key(&lookup)))
    }

    // ── reads ──

    pub async fn find_unique(&self, key: impl Into<E::Key>) -> Result<Option<E>, StoreError> {
        self.lookup(&key.into()).await
    }

    pub async fn find_unique_or_throw(&self, key: impl Into<E::Key>) -> Result<E, StoreError> {
        self.locate(&key.into()).await
    }

    pub async fn find_first(&self, args: FindArgs<E>) -> Result<Option<E>, StoreError> {
        let mut args = args;
        args.take = Some(if args.take.is_some_and(|t| t < 0) { -1 } else { 1 });
        Ok(self.select(&args).await?.into_iter().next())
    }

    pub async fn find_first_or_throw(&self, args: FindArgs<E>) -> Result<E, StoreError> {
        self.find_first(args)
            .await?
            .ok_or_else(|| StoreError::not_found(E::MODEL, "first matching record"))
    }

    /// `take` is clamped to `max_take`, and defaults to `default_take`.
    pub async fn find_many(&self, args: FindArgs<E>) -> Result<Vec<E>, StoreError> {
        let mut args = args;
        args.take = self.store.config.effective_take(args.take);
        self.select(&args).await
    }

    pub async fn count(&self, args: FindArgs<E>) -> Result<u64, StoreError> {
        Ok(self.select(&args).await?.len() as u64)
    }

    pub async fn aggregate(
        &self,
        args: &AggregateArgs<E>,
    ) -> Result<AggregateResult<E::Field>, StoreError> {
        let rows = self.candidates(&args.rows.filter).await?;
        aggregate::aggregate(rows.iter(), args)
    }

    pub async fn group_by(
        &self,
        args: &GroupByArgs<E>,
    ) -> Result<Vec<GroupRow<E::Field>>, StoreError> {
        aggregate::validate_group_by(args)?;
        let rows = self.candidates(&args.filter).await?;
        aggregate::group_by(rows.iter(), args)
    }

    // ── writes ──

    pub async fn create(&self, data: E::Create) -> Result<E, StoreError> {
        let row = data.into_record(Utc::now())?;
        row.validate(self.enforce())?;
        self.store
            .run(E::MODEL, &sql::insert(&row, false))
            .await
            .map_err(|err| with_row_context(err, &row))
            .inspect_err(|err| log::warn!("{} create rejected: {err}", E::MODEL))?;
        log::debug!("{} {} created", E::MODEL, row.primary_key());
        Ok(row)
    }

    pub async fn create_many(
        &self,
        data: Vec<E::Create>,
        skip_duplicates: bool,
    ) -> Result<u64, StoreError> {
        Ok(self.create_many_and_return(data, skip_duplicates).await?.len() as u64)
    }

    /// One batch: all rows or none. With `skip_duplicates`, rows colliding
    /// on a unique key are left out instead of failing the batch.
    pub async fn create_many_and_return(
        &self,
        data: Vec<E::Create>,
        skip_duplicates: bool,
    ) -> Result<Vec<E>, StoreError> {
        let now = Utc::now();
        let mut rows = Vec::with_capacity(data.len());
        let mut stmts = Vec::with_capacity(data.len());
        for input in data {
            let row = input.into_record(now)?;
            row.validate(self.enforce())?;
            stmts.push(self.store.prepare(E::MODEL, &sql::insert(&row, skip_duplicates))?);
            rows.push(row);
        }
        let results = match self.store.batch(E::MODEL, stmts).await {
            Ok(results) => results,
            Err(err) => {
                let err = self.store.attribute(err, &rows, &[]).await;
                log::warn!("{} createMany rejected: {err}", E::MODEL);
                return Err(err);
            }
        };
        let created: Vec<E> = rows
            .into_iter()
            .zip(results.iter())
            .filter(|(_, result)| !skip_duplicates || changes(result) > 0)
            .map(|(row, _)| row)
            .collect();
        log::debug!("{} created {} rows", E::MODEL, created.len());
        Ok(created)
    }

    /// Read, apply in Rust, write back by primary key. A primary-key change
    /// cascades to children through the schema's `ON UPDATE CASCADE`.
    pub async fn update(&self, key: impl Into<E::Key>, data: E::Update) -> Result<E, StoreError> {
        let current = self.locate(&key.into()).await?;
        let mut next = current.clone();
        data.apply_to(&mut next, Utc::now())?;
        next.validate(self.enforce())?;
        self.store
            .run(E::MODEL, &sql::update(current.primary_key(), &next))
            .await
            .map_err(|err| with_row_context(err, &next))
            .inspect_err(|err| log::warn!("{} update rejected: {err}", E::MODEL))?;
        log::debug!("{} {} updated", E::MODEL, next.primary_key());
        Ok(next)
    }

    pub async fn update_many(
        &self,
        filter: Filter<E::Field>,
        data: E::Update,
    ) -> Result<u64, StoreError> {
        Ok(self.update_many_and_return(filter, data).await?.len() as u64)
    }

    pub async fn update_many_and_return(
        &self,
        filter: Filter<E::Field>,
        data: E::Update,
    ) -> Result<Vec<E>, StoreError> {
        let targets = self.select(&FindArgs::from(filter)).await?;
        let replaced: Vec<String> = targets.iter().map(|t| t.primary_key().to_string()).collect();
        let now = Utc::now();
        let mut updated = Vec::with_capacity(targets.len());
        let mut stmts = Vec::with_capacity(targets.len());
        for current in targets {
            let mut next = current.clone();
            data.apply_to(&mut next, now)?;
            next.validate(self.enforce())?;
            stmts.push(
                self.store
                    .prepare(E::MODEL, &sql::update(current.primary_key(), &next))?,
            );
            updated.push(next);
        }
        if let Err(err) = self.store.batch(E::MODEL, stmts).await {
            let err = self.store.attribute(err, &updated, &replaced).await;
            log::warn!("{} updateMany rejected: {err}", E::MODEL);
            return Err(err);
        }
        log::debug!("{} updated {} rows", E::MODEL, updated.len());
        Ok(updated)
    }

    pub async fn upsert(
        &self,
        key: impl Into<E::Key>,
        create: E::Create,
        update: E::Update,
    ) -> Result<E, StoreError> {
        let key = key.into();
        if self.lookup(&key).await?.is_some() {
            self.update(key, update).await
        } else {
            self.create(create).await
        }
    }

    /// Deleting a workspace removes its children through `ON DELETE CASCADE`.
    pub async fn delete(&self, key: impl Into<E::Key>) -> Result<E, StoreError> {
        let current = self.locate(&key.into()).await?;
        let removed = self
            .store
            .run(E::MODEL, &sql::delete::<E>(current.primary_key()))
            .await?;
        if removed == 0 {
            return Err(StoreError::not_found(E::MODEL, current.primary_key()));
        }
        log::debug!("{} {} deleted", E::MODEL, current.primary_key());
        Ok(current)
    }

    pub async fn delete_many(&self, filter: Filter<E::Field>) -> Result<u64, StoreError> {
        let doomed = self.select(&FindArgs::from(filter)).await?;
        let stmts = doomed
            .iter()
            .map(|row| self.store.prepare(E::MODEL, &sql::delete::<E>(row.primary_key())))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let results = self.store.batch(E::MODEL, stmts).await?;
        let removed: u64 = results.iter().map(changes).sum();
        log::debug!("{} deleted {removed} rows", E::MODEL);
        Ok(removed)
    }
}
