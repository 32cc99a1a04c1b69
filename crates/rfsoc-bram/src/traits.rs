//! Readable region trait shared by the mapped and simulated backends

use crate::error::{BramError, BramResult};

/// A bounded, readable window of BRAM contents
///
/// Implementations must reject any access that leaves `[0, len())`
/// before touching memory.
///
/// # Example
///
/// ```rust
/// use rfsoc_bram::{BramWindow, SimulatedRegion};
///
/// let region = SimulatedRegion::from_bytes("acc_cnt", vec![1, 0, 0, 0]);
/// let mut buf = [0u8; 4];
/// region.copy_to(0, &mut buf).unwrap();
/// assert_eq!(u32::from_le_bytes(buf), 1);
/// ```
pub trait BramWindow: Send + Sync {
    /// Region name for diagnostics
    fn name(&self) -> &str;

    /// Logical size of the region in bytes
    fn len(&self) -> usize;

    /// Check if the region has no readable bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`
    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> BramResult<()>;
}

/// Validate `offset..offset + len` against a window of `size` bytes
pub fn check_bounds(offset: usize, len: usize, size: usize) -> BramResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BramError::OutOfBounds { offset, len, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(0, 4096, 4096).is_ok());
        assert!(check_bounds(4095, 1, 4096).is_ok());
        assert!(check_bounds(4096, 0, 4096).is_ok());
        assert!(check_bounds(4095, 2, 4096).is_err());
        assert!(check_bounds(usize::MAX, 1, 4096).is_err());
    }
}
