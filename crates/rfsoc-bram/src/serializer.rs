//! Serialized reads out of BRAM windows
//!
//! Every copy out of a region happens inside one process-wide critical
//! section. The lock covers the copy into the outbound buffer only; the
//! network send happens after it is released.

use std::sync::Mutex;

use crate::error::BramResult;
use crate::traits::BramWindow;

/// Mutual exclusion around region reads
#[derive(Debug, Default)]
pub struct ReadSerializer {
    lock: Mutex<()>,
}

impl ReadSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `len` bytes at `offset` out of `window`
    pub fn read(&self, window: &dyn BramWindow, offset: usize, len: usize) -> BramResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        if len == 0 {
            return Ok(buffer);
        }

        // The guarded state is (), so a poisoned lock is still usable
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        window.copy_to(offset, &mut buffer)?;

        Ok(buffer)
    }
}
