//! In-memory regions for development without hardware
//!
//! A `SimulatedRegion` stands in for a mapped BRAM. An external
//! "hardware" writer can replace its contents with [`SimulatedRegion::store`];
//! each store is atomic with respect to reads.

use std::sync::{Arc, Mutex};

use crate::error::BramResult;
use crate::table::RegionTable;
use crate::traits::{check_bounds, BramWindow};

/// Region backed by a heap buffer
#[derive(Debug)]
pub struct SimulatedRegion {
    name: String,
    data: Mutex<Vec<u8>>,
}

impl SimulatedRegion {
    /// Zero-filled region of `size` bytes
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self::from_bytes(name, vec![0u8; size])
    }

    /// Region holding `data`; its size is fixed to `data.len()`
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(data),
        }
    }

    /// Overwrite the region starting at `offset`, as the fabric would
    pub fn store(&self, offset: usize, bytes: &[u8]) -> BramResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        check_bounds(offset, bytes.len(), data.len())?;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Fill every byte with `value`
    pub fn fill(&self, value: u8) {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.iter_mut().for_each(|b| *b = value);
    }

    /// Snapshot of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl BramWindow for SimulatedRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> BramResult<()> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        check_bounds(offset, dst.len(), data.len())?;
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
        Ok(())
    }
}

/// Create a zero-filled simulated region for every table entry
pub fn simulate_table(table: &RegionTable) -> Vec<(String, Arc<SimulatedRegion>)> {
    table
        .descriptors()
        .into_iter()
        .map(|d| (d.name.clone(), Arc::new(SimulatedRegion::new(d.name.clone(), d.size))))
        .collect()
}
