//! Server context: region table, readable regions and the read lock

use std::collections::HashMap;
use std::sync::Arc;

use crate::serializer::ReadSerializer;
use crate::table::{RegionDescriptor, RegionTable};
use crate::traits::BramWindow;

/// Everything a request handler needs, built once at startup
pub struct BramContext {
    table: RegionTable,
    regions: HashMap<String, Arc<dyn BramWindow>>,
    serializer: ReadSerializer,
}

impl BramContext {
    /// Context with no readable regions yet
    pub fn new(table: RegionTable) -> Self {
        Self {
            table,
            regions: HashMap::new(),
            serializer: ReadSerializer::new(),
        }
    }

    /// Attach a readable region under `name`
    pub fn with_region(mut self, name: impl Into<String>, region: Arc<dyn BramWindow>) -> Self {
        self.insert_region(name, region);
        self
    }

    pub fn insert_region(&mut self, name: impl Into<String>, region: Arc<dyn BramWindow>) {
        self.regions.insert(name.into(), region);
    }

    /// Context backed by every region of a mapper
    #[cfg(feature = "devmem")]
    pub fn from_mapper(table: RegionTable, mapper: &crate::mmap::RegionMapper) -> Self {
        let mut ctx = Self::new(table);
        for (name, region) in mapper.regions() {
            ctx.insert_region(name, Arc::clone(region) as Arc<dyn BramWindow>);
        }
        ctx
    }

    /// Context with a zero-filled simulated region for every table entry
    pub fn simulated(table: RegionTable) -> Self {
        let regions = crate::sim::simulate_table(&table);
        let mut ctx = Self::new(table);
        for (name, region) in regions {
            ctx.insert_region(name, region as Arc<dyn BramWindow>);
        }
        ctx
    }

    /// Descriptor and readable window for a servable region
    ///
    /// Returns `None` when the name is not in the table or has no region.
    pub fn resolve(&self, name: &str) -> Option<(&RegionDescriptor, &dyn BramWindow)> {
        let descriptor = self.table.lookup(name)?;
        let region = self.regions.get(name)?;
        Some((descriptor, region.as_ref()))
    }

    pub fn table(&self) -> &RegionTable {
        &self.table
    }

    pub fn serializer(&self) -> &ReadSerializer {
        &self.serializer
    }

    /// Number of servable regions
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}
