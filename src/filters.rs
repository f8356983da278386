// ABOUTME: Table selection, exclusion and row filter rules for a run
// ABOUTME: Decides per table whether schema and data are processed and with which WHERE

use crate::table_name::TableName;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Which tables take part in a run and how
///
/// A fully excluded table is skipped entirely. A schema-excluded table keeps
/// its data but its DDL is neither exported nor applied. A data-excluded
/// table keeps its DDL but its data artifact is never written or opened.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include_tables: Option<BTreeSet<TableName>>,
    exclude_tables: BTreeSet<TableName>,
    exclude_schema: BTreeSet<TableName>,
    exclude_data: BTreeSet<TableName>,
    conditions: BTreeMap<TableName, String>,
}

impl TableFilter {
    /// Creates a filter from the configured lists
    ///
    /// An empty `include_tables` means every table is selected.
    pub fn new(
        include_tables: Vec<TableName>,
        exclude_tables: Vec<TableName>,
        exclude_schema: Vec<TableName>,
        exclude_data: Vec<TableName>,
    ) -> Result<Self> {
        let include: BTreeSet<TableName> = include_tables.into_iter().collect();
        let exclude: BTreeSet<TableName> = exclude_tables.into_iter().collect();

        if !include.is_empty() && include.iter().all(|t| exclude.contains(t)) {
            bail!("Every selected table is also excluded; nothing would be processed");
        }

        Ok(Self {
            include_tables: if include.is_empty() {
                None
            } else {
                Some(include)
            },
            exclude_tables: exclude,
            exclude_schema: exclude_schema.into_iter().collect(),
            exclude_data: exclude_data.into_iter().collect(),
            conditions: BTreeMap::new(),
        })
    }

    /// Creates an empty filter (process everything)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach a WHERE condition applied when streaming `table` on export
    pub fn add_condition(&mut self, table: TableName, predicate: String) -> Result<()> {
        if predicate.trim().is_empty() {
            bail!("Table filter predicate cannot be empty for '{}'", table);
        }
        if self.exclude_data.contains(&table) {
            bail!(
                "Table '{}' has its data excluded; a where filter would never apply",
                table
            );
        }
        if self.conditions.insert(table.clone(), predicate).is_some() {
            bail!("Duplicate where filter for table '{}'", table);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.include_tables.is_none()
            && self.exclude_tables.is_empty()
            && self.exclude_schema.is_empty()
            && self.exclude_data.is_empty()
            && self.conditions.is_empty()
    }

    /// Explicitly selected tables, in name order
    pub fn include_tables(&self) -> Option<Vec<TableName>> {
        self.include_tables
            .as_ref()
            .map(|set| set.iter().cloned().collect())
    }

    /// Determines if a table takes part in the run at all
    pub fn should_process(&self, table: &TableName) -> bool {
        if let Some(ref include) = self.include_tables {
            if !include.contains(table) {
                return false;
            }
        }
        !self.exclude_tables.contains(table)
    }

    pub fn should_apply_schema(&self, table: &TableName) -> bool {
        self.should_process(table) && !self.exclude_schema.contains(table)
    }

    pub fn should_copy_data(&self, table: &TableName) -> bool {
        self.should_process(table) && !self.exclude_data.contains(table)
    }

    pub fn condition(&self, table: &TableName) -> Option<&str> {
        self.conditions.get(table).map(String::as_str)
    }

    /// Keep the processed tables of `tables`, preserving order
    pub fn select(&self, tables: &[TableName]) -> Vec<TableName> {
        tables
            .iter()
            .filter(|t| self.should_process(t))
            .cloned()
            .collect()
    }

    /// Tables named in rules but absent from `known`, for operator warnings
    pub fn unknown_tables(&self, known: &[TableName]) -> Vec<TableName> {
        let known: BTreeSet<&TableName> = known.iter().collect();
        let mut named: BTreeSet<&TableName> = BTreeSet::new();
        if let Some(ref include) = self.include_tables {
            named.extend(include.iter());
        }
        named.extend(self.exclude_tables.iter());
        named.extend(self.exclude_schema.iter());
        named.extend(self.exclude_data.iter());
        named.extend(self.conditions.keys());
        named
            .into_iter()
            .filter(|t| !known.contains(t))
            .cloned()
            .collect()
    }
}
