use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::models::{Entity, FieldDef, IndexKey, KeyLookup};

/// One entity table: rows keyed by primary key, plus a unique index over every
/// compound-unique key the entity declares.
#[derive(Debug, Clone)]
pub struct Table<E: Entity> {
    rows: BTreeMap<String, E>,
    index: HashMap<IndexKey, String>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            index: HashMap::new(),
        }
    }
}

impl<E: Entity> Table<E> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in primary-key order.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.rows.values()
    }

    pub fn get(&self, pk: &str) -> Option<&E> {
        self.rows.get(pk)
    }

    pub fn find(&self, key: &KeyLookup) -> Option<&E> {
        match key {
            KeyLookup::Primary(pk) => self.rows.get(pk),
            KeyLookup::Index(index) => self.index.get(index).and_then(|pk| self.rows.get(pk)),
        }
    }

    /// First unique key of `row` already held by a different row.
    pub fn conflict(&self, row: &E, ignore_pk: Option<&str>) -> Option<StoreError> {
        let pk = row.primary_key();
        if ignore_pk != Some(pk) && self.rows.contains_key(pk) {
            return Some(StoreError::UniqueViolation {
                model: E::MODEL,
                constraint: E::PRIMARY.name().to_string(),
                key: pk.to_string(),
            });
        }
        for key in row.unique_indexes() {
            if let Some(owner) = self.index.get(&key) {
                if ignore_pk != Some(owner.as_str()) {
                    return Some(StoreError::UniqueViolation {
                        model: E::MODEL,
                        constraint: key.constraint.to_string(),
                        key: key.to_string(),
                    });
                }
            }
        }
        None
    }

    pub fn insert(&mut self, row: E) -> Result<(), StoreError> {
        if let Some(err) = self.conflict(&row, None) {
            return Err(err);
        }
        for key in row.unique_indexes() {
            self.index.insert(key, row.primary_key().to_string());
        }
        self.rows.insert(row.primary_key().to_string(), row);
        Ok(())
    }

    /// Replaces the row stored under `old_pk`, which may change its primary
    /// key. Leaves the table untouched on conflict.
    pub fn replace(&mut self, old_pk: &str, row: E) -> Result<(), StoreError> {
        if let Some(err) = self.conflict(&row, Some(old_pk)) {
            return Err(err);
        }
        self.remove(old_pk);
        self.insert(row)
    }

    pub fn remove(&mut self, pk: &str) -> Option<E> {
        let row = self.rows.remove(pk)?;
        for key in row.unique_indexes() {
            self.index.remove(&key);
        }
        Some(row)
    }

    /// Removes every row matching `pred`, returning them in key order.
    pub fn remove_where(&mut self, pred: impl Fn(&E) -> bool) -> Vec<E> {
        let doomed: Vec<String> = self
            .rows
            .values()
            .filter(|row| pred(row))
            .map(|row| row.primary_key().to_string())
            .collect();
        doomed.iter().filter_map(|pk| self.remove(pk)).collect()
    }

    /// Rewrites every row matching `pred` with `edit`, re-indexing them.
    pub fn rewrite_where(
        &mut self,
        pred: impl Fn(&E) -> bool,
        edit: impl Fn(&mut E),
    ) -> Result<usize, StoreError> {
        let targets: Vec<E> = self.rows.values().filter(|row| pred(row)).cloned().collect();
        for mut row in targets.iter().cloned() {
            let old_pk = row.primary_key().to_string();
            edit(&mut row);
            self.replace(&old_pk, row)?;
        }
        Ok(targets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Connector, ConnectorKey, UniqueKey};
    use chrono::Utc;

    fn connector(id: &str, account: &str) -> Connector {
        let now = Utc::now();
        Connector {
            connector_id: id.to_string(),
            workspace_id: "w1".to_string(),
            platform: "meta".to_string(),
            account_id: account.to_string(),
            display_name: "Meta Ads".to_string(),
            status: "active".to_string(),
            scopes: Default::default(),
            last_connected_at: None,
            owner_contact: None,
            credentials_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn compound_index_resolves_and_rejects_duplicates() {
        let mut table = Table::default();
        table.insert(connector("c1", "acct1")).unwrap();

        let found = table
            .find(&ConnectorKey::platform_account("w1", "meta", "acct1").lookup())
            .unwrap();
        assert_eq!(found.connector_id, "c1");

        let err = table.insert(connector("c2", "acct1")).unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn replace_moves_index_entries() {
        let mut table = Table::default();
        table.insert(connector("c1", "acct1")).unwrap();
        table.insert(connector("c2", "acct2")).unwrap();

        let mut moved = table.get("c1").unwrap().clone();
        moved.account_id = "acct2".to_string();
        assert!(table.replace("c1", moved.clone()).is_err());
        assert_eq!(table.get("c1").unwrap().account_id, "acct1");

        moved.account_id = "acct3".to_string();
        table.replace("c1", moved).unwrap();
        let old = ConnectorKey::platform_account("w1", "meta", "acct1").lookup();
        assert!(table.find(&old).is_none());
        table.insert(connector("c3", "acct1")).unwrap();
    }
}
