//! In-process storage engine.
//!
//! Every entity lives in its own [`Table`]. Writes validate record
//! invariants, check the `workspaceId` foreign key, and maintain the
//! compound-unique indexes. Multi-row writes, cascades and explicit
//! transactions run against a snapshot that is restored on error, so a failed
//! call never leaves partial writes behind.

mod table;


pub use table::Table;

use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::{
    AssetFingerprint, AuditBundle, BrandTwin, Connector, ConsentRecord, CreateInput, DecisionCard,
    Entity, SimulationResult, UniqueKey, UpdateInput, Workspace, WorkspaceCounts,
    WorkspaceCreateNested, WorkspaceRun, WorkspaceWithChildren,
};
use crate::query::{
    aggregate, eval, AggregateArgs, AggregateResult, Filter, FindArgs, GroupByArgs, GroupRow,
};

// ── Tables ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Tables {
    workspaces: Table<Workspace>,
    runs: Table<WorkspaceRun>,
    audit_bundles: Table<AuditBundle>,
    connectors: Table<Connector>,
    consent_records: Table<ConsentRecord>,
    brand_twins: Table<BrandTwin>,
    decision_cards: Table<DecisionCard>,
    simulation_results: Table<SimulationResult>,
    asset_fingerprints: Table<AssetFingerprint>,
}

impl Tables {
    fn counts(&self, workspace_id: &str) -> WorkspaceCounts {
        fn owned<E: Entity>(table: &Table<E>, id: &str) -> u64 {
            table.iter().filter(|row| row.workspace_ref() == Some(id)).count() as u64
        }
        WorkspaceCounts {
            runs: owned(&self.runs, workspace_id),
            audit_bundles: owned(&self.audit_bundles, workspace_id),
            connectors: owned(&self.connectors, workspace_id),
            consent_records: owned(&self.consent_records, workspace_id),
            brand_twins: owned(&self.brand_twins, workspace_id),
            decision_cards: owned(&self.decision_cards, workspace_id),
            simulation_results: owned(&self.simulation_results, workspace_id),
            asset_fingerprints: owned(&self.asset_fingerprints, workspace_id),
        }
    }

    fn purge_workspace(&mut self, workspace_id: &str) -> WorkspaceCounts {
        fn purge<E: Entity>(table: &mut Table<E>, id: &str) -> u64 {
            table.remove_where(|row| row.workspace_ref() == Some(id)).len() as u64
        }
        WorkspaceCounts {
            runs: purge(&mut self.runs, workspace_id),
            audit_bundles: purge(&mut self.audit_bundles, workspace_id),
            connectors: purge(&mut self.connectors, workspace_id),
            consent_records: purge(&mut self.consent_records, workspace_id),
            brand_twins: purge(&mut self.brand_twins, workspace_id),
            decision_cards: purge(&mut self.decision_cards, workspace_id),
            simulation_results: purge(&mut self.simulation_results, workspace_id),
            asset_fingerprints: purge(&mut self.asset_fingerprints, workspace_id),
        }
    }

    fn repoint_children(&mut self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        fn repoint<E: Stored>(table: &mut Table<E>, old_id: &str, new_id: &str) -> Result<usize, StoreError> {
            table.rewrite_where(
                |row| row.workspace_ref() == Some(old_id),
                |row| row.set_workspace_ref(new_id),
            )
        }
        repoint(&mut self.runs, old_id, new_id)?;
        repoint(&mut self.audit_bundles, old_id, new_id)?;
        repoint(&mut self.connectors, old_id, new_id)?;
        repoint(&mut self.consent_records, old_id, new_id)?;
        repoint(&mut self.brand_twins, old_id, new_id)?;
        repoint(&mut self.decision_cards, old_id, new_id)?;
        repoint(&mut self.simulation_results, old_id, new_id)?;
        repoint(&mut self.asset_fingerprints, old_id, new_id)?;
        Ok(())
    }
}

/// Binds an entity to its table and its relational side effects.
pub trait Stored: Entity {
    fn table(tables: &Tables) -> &Table<Self>;
    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;

    /// Cascade run after a row has been removed.
    fn after_delete(_tables: &mut Tables, _row: &Self) {}

    /// Cascade run after a row's primary key changed.
    fn after_rekey(_tables: &mut Tables, _old_pk: &str, _new_pk: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Stored for Workspace {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.workspaces
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.workspaces
    }

    fn after_delete(tables: &mut Tables, row: &Self) {
        let removed = tables.purge_workspace(&row.workspace_id);
        log::debug!(
            "workspace {} deleted with {} child rows",
            row.workspace_id,
            removed.total()
        );
    }

    fn after_rekey(tables: &mut Tables, old_pk: &str, new_pk: &str) -> Result<(), StoreError> {
        tables.repoint_children(old_pk, new_pk)
    }
}

macro_rules! child_table {
    ($entity:ty, $table:ident) => {
        impl Stored for $entity {
            fn table(tables: &Tables) -> &Table<Self> {
                &tables.$table
            }

            fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
                &mut tables.$table
            }
        }
    };
}

child_table!(WorkspaceRun, runs);
child_table!(AuditBundle, audit_bundles);
child_table!(Connector, connectors);
child_table!(ConsentRecord, consent_records);
child_table!(BrandTwin, brand_twins);
child_table!(DecisionCard, decision_cards);
child_table!(SimulationResult, simulation_results);
child_table!(AssetFingerprint, asset_fingerprints);

// ── Transactions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Requested level. The in-process engine always runs serializably.
    pub isolation_level: Option<IsolationLevel>,
    /// Roll back if the closure runs longer than this.
    pub timeout_ms: Option<u64>,
}

// ── Store ───────────────────────────────────────────────────────

/// In-process workspace store. Operations take `&mut self`; share a store
/// across tasks behind a lock.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    tables: Tables,
    enforce_domain_invariants: bool,
}

impl Default for WorkspaceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self {
            tables: Tables::default(),
            enforce_domain_invariants: true,
        }
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            tables: Tables::default(),
            enforce_domain_invariants: config.enforce_domain_invariants,
        }
    }

    pub fn delegate<E: Stored>(&mut self) -> Delegate<'_, E> {
        Delegate {
            store: self,
            _entity: PhantomData,
        }
    }

    pub fn workspace(&mut self) -> Delegate<'_, Workspace> {
        self.delegate()
    }

    pub fn workspace_run(&mut self) -> Delegate<'_, WorkspaceRun> {
        self.delegate()
    }

    pub fn audit_bundle(&mut self) -> Delegate<'_, AuditBundle> {
        self.delegate()
    }

    pub fn connector(&mut self) -> Delegate<'_, Connector> {
        self.delegate()
    }

    pub fn consent_record(&mut self) -> Delegate<'_, ConsentRecord> {
        self.delegate()
    }

    pub fn brand_twin(&mut self) -> Delegate<'_, BrandTwin> {
        self.delegate()
    }

    pub fn decision_card(&mut self) -> Delegate<'_, DecisionCard> {
        self.delegate()
    }

    pub fn simulation_result(&mut self) -> Delegate<'_, SimulationResult> {
        self.delegate()
    }

    pub fn asset_fingerprint(&mut self) -> Delegate<'_, AssetFingerprint> {
        self.delegate()
    }

    /// Runs `op` against the store; restores the prior state if it fails.
    pub fn transaction<T>(
        &mut self,
        options: TransactionOptions,
        op: impl FnOnce(&mut WorkspaceStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        log::debug!(
            "transaction started (isolation {:?})",
            options.isolation_level.unwrap_or(IsolationLevel::Serializable)
        );
        let started = Utc::now();
        let snapshot = self.tables.clone();
        let mut result = op(self);
        if let (Ok(_), Some(limit)) = (&result, options.timeout_ms) {
            let elapsed = (Utc::now() - started).num_milliseconds();
            if elapsed > i64::try_from(limit).unwrap_or(i64::MAX) {
                result = Err(StoreError::Backend(format!(
                    "transaction exceeded its {limit} ms timeout"
                )));
            }
        }
        match &result {
            Ok(_) => log::debug!("transaction committed"),
            Err(err) => {
                log::warn!("transaction rolled back: {err}");
                self.tables = snapshot;
            }
        }
        result
    }

    fn atomic<T>(
        &mut self,
        op: impl FnOnce(&mut WorkspaceStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let snapshot = self.tables.clone();
        let result = op(self);
        if result.is_err() {
            self.tables = snapshot;
        }
        result
    }

    // ── Aggregate root ──

    /// Creates a workspace and its child records in one transaction. Each
    /// child is attached to the new workspace whatever `workspaceId` it
    /// carried.
    pub fn create_workspace_nested(
        &mut self,
        input: WorkspaceCreateNested,
    ) -> Result<WorkspaceWithChildren, StoreError> {
        self.atomic(|store| {
            let workspace = store.insert_row::<Workspace>(input.workspace, None)?;
            let id = workspace.workspace_id.clone();
            let runs = store.insert_children(&id, input.runs)?;
            let audit_bundles = store.insert_children(&id, input.audit_bundles)?;
            let connectors = store.insert_children(&id, input.connectors)?;
            let consent_records = store.insert_children(&id, input.consent_records)?;
            let brand_twins = store.insert_children(&id, input.brand_twins)?;
            let decision_cards = store.insert_children(&id, input.decision_cards)?;
            let simulation_results = store.insert_children(&id, input.simulation_results)?;
            let asset_fingerprints = store.insert_children(&id, input.asset_fingerprints)?;
            Ok(WorkspaceWithChildren {
                workspace,
                runs,
                audit_bundles,
                connectors,
                consent_records,
                brand_twins,
                decision_cards,
                simulation_results,
                asset_fingerprints,
            })
        })
    }

    /// Sizes of the eight child collections of a workspace.
    pub fn workspace_counts(&self, workspace_id: &str) -> Result<WorkspaceCounts, StoreError> {
        if self.tables.workspaces.get(workspace_id).is_none() {
            return Err(StoreError::not_found(Workspace::MODEL, workspace_id));
        }
        Ok(self.tables.counts(workspace_id))
    }

    /// A workspace with all of its children, each collection in primary-key order.
    pub fn find_workspace_with_children(
        &self,
        workspace_id: &str,
    ) -> Option<WorkspaceWithChildren> {
        let workspace = self.tables.workspaces.get(workspace_id)?.clone();
        Some(WorkspaceWithChildren {
            workspace,
            runs: self.children_of(workspace_id),
            audit_bundles: self.children_of(workspace_id),
            connectors: self.children_of(workspace_id),
            consent_records: self.children_of(workspace_id),
            brand_twins: self.children_of(workspace_id),
            decision_cards: self.children_of(workspace_id),
            simulation_results: self.children_of(workspace_id),
            asset_fingerprints: self.children_of(workspace_id),
        })
    }

    fn children_of<E: Stored>(&self, workspace_id: &str) -> Vec<E> {
        E::table(&self.tables)
            .iter()
            .filter(|row| row.workspace_ref() == Some(workspace_id))
            .cloned()
            .collect()
    }

    // ── Row primitives ──

    fn admit<E: Stored>(&self, row: &E) -> Result<(), StoreError> {
        row.validate(self.enforce_domain_invariants)?;
        if let Some(workspace_id) = row.workspace_ref() {
            if self.tables.workspaces.get(workspace_id).is_none() {
                return Err(StoreError::ForeignKeyViolation {
                    model: E::MODEL,
                    field: "workspaceId",
                    key: workspace_id.to_string(),
                });
            }
        }
        Ok(())
    }

    fn insert_row<E: Stored>(
        &mut self,
        input: E::Create,
        workspace_id: Option<&str>,
    ) -> Result<E, StoreError> {
        let mut row = input.into_record(Utc::now())?;
        if let Some(id) = workspace_id {
            row.set_workspace_ref(id);
        }
        self.admit(&row)?;
        E::table_mut(&mut self.tables).insert(row.clone())?;
        Ok(row)
    }

    fn insert_children<E: Stored>(
        &mut self,
        workspace_id: &str,
        inputs: Vec<E::Create>,
    ) -> Result<Vec<E>, StoreError> {
        inputs
            .into_iter()
            .map(|input| self.insert_row(input, Some(workspace_id)))
            .collect()
    }

    fn update_row<E: Stored>(
        &mut self,
        current: E,
        data: &E::Update,
        now: DateTime<Utc>,
    ) -> Result<E, StoreError> {
        let mut next = current.clone();
        data.apply_to(&mut next, now)?;
        self.admit(&next)?;
        let old_pk = current.primary_key().to_string();
        if next.primary_key() == old_pk {
            E::table_mut(&mut self.tables).replace(&old_pk, next.clone())?;
        } else {
            let new_pk = next.primary_key().to_string();
            let row = next.clone();
            self.atomic(|store| {
                E::table_mut(&mut store.tables).replace(&old_pk, row)?;
                E::after_rekey(&mut store.tables, &old_pk, &new_pk)
            })?;
        }
        Ok(next)
    }

    fn delete_row<E: Stored>(&mut self, pk: &str) -> Option<E> {
        let row = E::table_mut(&mut self.tables).remove(pk)?;
        E::after_delete(&mut self.tables, &row);
        Some(row)
    }
}

// ── Delegates ───────────────────────────────────────────────────

/// Per-entity handle exposing the CRUD, aggregate and group-by operations.
pub struct Delegate<'s, E: Stored> {
    store: &'s mut WorkspaceStore,
    _entity: PhantomData<E>,
}

impl<'s, E: Stored> Delegate<'s, E> {
    fn table(&self) -> &Table<E> {
        E::table(&self.store.tables)
    }

    fn select(&self, args: &FindArgs<E>) -> Result<Vec<&E>, StoreError> {
        eval::select(self.table().iter(), args)
    }

    fn locate(&self, key: &E::Key) -> Result<E, StoreError> {
        let lookup = key.lookup();
        self.table()
            .find(&lookup)
            .cloned()
            .ok_or_else(|| StoreError::not_found(E::MODEL, lookup))
    }

    // ── reads ──

    pub fn find_unique(&self, key: impl Into<E::Key>) -> Result<Option<E>, StoreError> {
        Ok(self.table().find(&key.into().lookup()).cloned())
    }

    pub fn find_unique_or_throw(&self, key: impl Into<E::Key>) -> Result<E, StoreError> {
        self.locate(&key.into())
    }

    pub fn find_first(&self, args: FindArgs<E>) -> Result<Option<E>, StoreError> {
        let mut args = args;
        args.take = Some(if args.take.is_some_and(|t| t < 0) { -1 } else { 1 });
        Ok(self.select(&args)?.first().map(|row| (*row).clone()))
    }

    pub fn find_first_or_throw(&self, args: FindArgs<E>) -> Result<E, StoreError> {
        self.find_first(args)?
            .ok_or_else(|| StoreError::not_found(E::MODEL, "first matching record"))
    }

    pub fn find_many(&self, args: FindArgs<E>) -> Result<Vec<E>, StoreError> {
        Ok(self.select(&args)?.into_iter().cloned().collect())
    }

    /// Number of rows `find_many` would return for the same arguments.
    pub fn count(&self, args: FindArgs<E>) -> Result<u64, StoreError> {
        Ok(self.select(&args)?.len() as u64)
    }

    pub fn aggregate(
        &self,
        args: &AggregateArgs<E>,
    ) -> Result<AggregateResult<E::Field>, StoreError> {
        aggregate::aggregate(self.table().iter(), args)
    }

    pub fn group_by(&self, args: &GroupByArgs<E>) -> Result<Vec<GroupRow<E::Field>>, StoreError> {
        aggregate::group_by(self.table().iter(), args)
    }

    // ── writes ──

    pub fn create(&mut self, data: E::Create) -> Result<E, StoreError> {
        let row = self.store.insert_row::<E>(data, None).inspect_err(|err| {
            log::warn!("{} create rejected: {err}", E::MODEL);
        })?;
        log::debug!("{} {} created", E::MODEL, row.primary_key());
        Ok(row)
    }

    pub fn create_many(
        &mut self,
        data: Vec<E::Create>,
        skip_duplicates: bool,
    ) -> Result<u64, StoreError> {
        Ok(self.create_many_and_return(data, skip_duplicates)?.len() as u64)
    }

    /// Inserts all rows or none. With `skip_duplicates`, rows colliding on a
    /// unique key are left out instead of failing the call.
    pub fn create_many_and_return(
        &mut self,
        data: Vec<E::Create>,
        skip_duplicates: bool,
    ) -> Result<Vec<E>, StoreError> {
        let created = self.store.atomic(|store| {
            let mut created = Vec::with_capacity(data.len());
            for input in data {
                let row = input.into_record(Utc::now())?;
                store.admit(&row)?;
                let table = E::table_mut(&mut store.tables);
                if let Some(conflict) = table.conflict(&row, None) {
                    if skip_duplicates {
                        continue;
                    }
                    return Err(conflict);
                }
                table.insert(row.clone())?;
                created.push(row);
            }
            Ok(created)
        });
        match &created {
            Ok(rows) => log::debug!("{} created {} rows", E::MODEL, rows.len()),
            Err(err) => log::warn!("{} createMany rejected: {err}", E::MODEL),
        }
        created
    }

    pub fn update(&mut self, key: impl Into<E::Key>, data: E::Update) -> Result<E, StoreError> {
        let current = self.locate(&key.into())?;
        let updated = self
            .store
            .update_row(current, &data, Utc::now())
            .inspect_err(|err| log::warn!("{} update rejected: {err}", E::MODEL))?;
        log::debug!("{} {} updated", E::MODEL, updated.primary_key());
        Ok(updated)
    }

    pub fn update_many(
        &mut self,
        filter: Filter<E::Field>,
        data: E::Update,
    ) -> Result<u64, StoreError> {
        Ok(self.update_many_and_return(filter, data)?.len() as u64)
    }

    /// Applies `data` to every matching row, all or nothing.
    pub fn update_many_and_return(
        &mut self,
        filter: Filter<E::Field>,
        data: E::Update,
    ) -> Result<Vec<E>, StoreError> {
        let targets = self.find_many(FindArgs::from(filter))?;
        let now = Utc::now();
        let updated = self.store.atomic(|store| {
            targets
                .into_iter()
                .map(|row| store.update_row(row, &data, now))
                .collect::<Result<Vec<E>, StoreError>>()
        });
        match &updated {
            Ok(rows) => log::debug!("{} updated {} rows", E::MODEL, rows.len()),
            Err(err) => log::warn!("{} updateMany rejected: {err}", E::MODEL),
        }
        updated
    }

    /// Updates the row under `key` if it exists, otherwise creates one from
    /// `create`. Exactly one of the two happens.
    pub fn upsert(
        &mut self,
        key: impl Into<E::Key>,
        create: E::Create,
        update: E::Update,
    ) -> Result<E, StoreError> {
        let key = key.into();
        if self.table().find(&key.lookup()).is_some() {
            self.update(key, update)
        } else {
            self.create(create)
        }
    }

    pub fn delete(&mut self, key: impl Into<E::Key>) -> Result<E, StoreError> {
        let current = self.locate(&key.into())?;
        let removed = self
            .store
            .delete_row::<E>(current.primary_key())
            .ok_or_else(|| StoreError::not_found(E::MODEL, current.primary_key()))?;
        log::debug!("{} {} deleted", E::MODEL, removed.primary_key());
        Ok(removed)
    }

    pub fn delete_many(&mut self, filter: Filter<E::Field>) -> Result<u64, StoreError> {
        eval::validate_filter(E::MODEL, &filter)?;
        let doomed: Vec<String> = self
            .table()
            .iter()
            .filter(|row| eval::matches(*row, &filter))
            .map(|row| row.primary_key().to_string())
            .collect();
        let mut removed = 0u64;
        for pk in &doomed {
            if self.store.delete_row::<E>(pk).is_some() {
                removed += 1;
            }
        }
        log::debug!("{} deleted {removed} rows", E::MODEL);
        Ok(removed)
    }
}
