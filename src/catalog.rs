use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{DbFile, Error, Result, TableId};

/// Registry of the tables a buffer pool can page in, keyed by
/// table id. A total function over live tables: every page id
/// handed to the pool must name a registered table.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, Arc<dyn DbFile>>>,
}

impl Catalog {
    /// Registers a table, replacing any prior registration
    /// under the same id.
    pub fn add_table(&self, file: Arc<dyn DbFile>) {
        let mut tables = self.tables.write().unwrap();
        tables.insert(file.table_id(), file);
    }

    pub fn file(&self, table_id: TableId) -> Result<Arc<dyn DbFile>> {
        let tables = self.tables.read().unwrap();
        tables
            .get(&table_id)
            .cloned()
            .ok_or(Error::NoSuchTable(table_id))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let tables = self.tables.read().unwrap();
        tables.keys().copied().collect()
    }
}
