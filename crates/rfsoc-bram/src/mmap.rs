//! Memory-mapped BRAM access through `/dev/mem`
//!
//! Each region is mapped read-only and shared. Physical addresses need not
//! be page aligned: the mapping starts at the enclosing page boundary and
//! covers `page_offset + size` bytes so that the whole region stays inside
//! the mapped window.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{BramError, BramResult};
use crate::table::{RegionDescriptor, RegionTable};
use crate::traits::{check_bounds, BramWindow};

/// Default physical memory device
pub const DEV_MEM: &str = "/dev/mem";

/// Page-aligned mapping window for one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapWindow {
    /// Page-aligned physical address passed to mmap
    pub aligned_base: u64,
    /// Distance from the aligned base to the region start
    pub page_offset: usize,
    /// Bytes to map: `page_offset + size`
    pub map_len: usize,
}

impl MapWindow {
    /// Compute the window for `size` bytes at `address`
    ///
    /// `page_size` must be a power of two.
    pub fn compute(address: u64, size: usize, page_size: usize) -> Self {
        let mask = page_size as u64 - 1;
        let aligned_base = address & !mask;
        let page_offset = (address - aligned_base) as usize;

        Self {
            aligned_base,
            page_offset,
            map_len: page_offset + size,
        }
    }
}

/// System page size
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// A read-only mapping of one BRAM region
pub struct MappedRegion {
    name: String,
    phys_base: u64,
    size: usize,
    window: MapWindow,
    /// Start of the page-aligned mapping
    mapping: NonNull<c_void>,
}

impl MappedRegion {
    fn map(device: &File, descriptor: &RegionDescriptor, page_size: usize) -> BramResult<Self> {
        let window = MapWindow::compute(descriptor.address, descriptor.size, page_size);
        let mmap_failed = |reason: String| BramError::MmapFailed {
            name: descriptor.name.clone(),
            address: descriptor.address,
            reason,
        };

        let length = NonZeroUsize::new(window.map_len)
            .ok_or_else(|| mmap_failed("zero-length region".to_string()))?;
        let offset = libc::off_t::try_from(window.aligned_base)
            .map_err(|_| mmap_failed("address does not fit in off_t".to_string()))?;

        let mapping = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                device,
                offset,
            )
        }
        .map_err(|e| mmap_failed(e.to_string()))?;

        Ok(Self {
            name: descriptor.name.clone(),
            phys_base: descriptor.address,
            size: descriptor.size,
            window,
            mapping,
        })
    }

    /// Base physical address of the region
    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Mapping window backing this region
    pub fn window(&self) -> MapWindow {
        self.window
    }

    /// Region start inside the mapping
    fn base(&self) -> *const u8 {
        unsafe { (self.mapping.as_ptr() as *const u8).add(self.window.page_offset) }
    }
}

impl BramWindow for MappedRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.size
    }

    fn copy_to(&self, offset: usize, dst: &mut [u8]) -> BramResult<()> {
        check_bounds(offset, dst.len(), self.size)?;

        // page_offset + offset + len <= map_len by the check above
        unsafe {
            ptr::copy_nonoverlapping(self.base().add(offset), dst.as_mut_ptr(), dst.len());
        }

        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.mapping, self.window.map_len) } {
            tracing::warn!("munmap failed for region {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("name", &self.name)
            .field("phys_base", &format_args!("0x{:08x}", self.phys_base))
            .field("size", &self.size)
            .field("window", &self.window)
            .finish()
    }
}

// Safety: the mapping is read-only and owned for the lifetime of the value
unsafe impl Send for MappedRegion {}

// Safety: reads go through `copy_to`, which never mutates the mapping
unsafe impl Sync for MappedRegion {}

/// Opens the memory device and maps every region of a table
pub struct RegionMapper {
    device_path: PathBuf,
    page_size: usize,
    device: Option<File>,
    regions: HashMap<String, Arc<MappedRegion>>,
}

impl RegionMapper {
    /// Mapper for the given device node
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            page_size: page_size(),
            device: None,
            regions: HashMap::new(),
        }
    }

    /// Map every region in `table`
    ///
    /// Any failure is fatal: mappings made so far are released and the
    /// error is returned.
    pub fn map_all(&mut self, table: &RegionTable) -> BramResult<()> {
        self.unmap_all();

        let device = open_device(&self.device_path)?;

        for descriptor in table.descriptors() {
            match MappedRegion::map(&device, descriptor, self.page_size) {
                Ok(region) => {
                    tracing::info!(
                        "Mapped region {} at 0x{:08x} ({} bytes, page offset 0x{:x})",
                        descriptor.name,
                        descriptor.address,
                        descriptor.size,
                        region.window.page_offset
                    );
                    self.regions.insert(descriptor.name.clone(), Arc::new(region));
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    self.unmap_all();
                    return Err(e);
                }
            }
        }

        self.device = Some(device);
        Ok(())
    }

    /// Release every mapping and close the device
    ///
    /// Safe to call repeatedly or after a failed `map_all`. Regions still
    /// shared with a live context are unmapped when the last holder drops.
    pub fn unmap_all(&mut self) {
        if !self.regions.is_empty() {
            tracing::debug!("Releasing {} mapped regions", self.regions.len());
        }
        self.regions.clear();
        self.device = None;
    }

    pub fn get(&self, name: &str) -> Option<Arc<MappedRegion>> {
        self.regions.get(name).cloned()
    }

    /// All mapped regions keyed by name
    pub fn regions(&self) -> impl Iterator<Item = (&str, &Arc<MappedRegion>)> {
        self.regions.iter().map(|(name, region)| (name.as_str(), region))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }
}

impl Drop for RegionMapper {
    fn drop(&mut self) {
        self.unmap_all();
    }
}

fn open_device(path: &Path) -> BramResult<File> {
    // The device refuses mappings on read-only descriptors
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(path)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                BramError::PermissionDenied(format!("cannot open {}", path.display()))
            } else {
                BramError::DeviceOpen {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{RegionEntry, SizeRules};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_map_window_aligned() {
        let w = MapWindow::compute(0xA016_0000, 4096, 4096);
        assert_eq!(w.aligned_base, 0xA016_0000);
        assert_eq!(w.page_offset, 0);
        assert_eq!(w.map_len, 4096);
    }

    #[test]
    fn test_map_window_unaligned() {
        let w = MapWindow::compute(0xA017_0010, 4096, 4096);
        assert_eq!(w.aligned_base, 0xA017_0000);
        assert_eq!(w.page_offset, 0x10);
        // Must cover the tail that spills into the next page
        assert_eq!(w.map_len, 0x10 + 4096);
    }

    #[test]
    fn test_map_window_large_pages() {
        let w = MapWindow::compute(0xA016_1000, 4, 65536);
        assert_eq!(w.aligned_base, 0xA016_0000);
        assert_eq!(w.page_offset, 0x1000);
        assert_eq!(w.map_len, 0x1004);
    }

    #[test]
    fn test_page_size_power_of_two() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn test_missing_device() {
        let mut mapper = RegionMapper::new("/nonexistent/rfsoc-bram-mem");
        let result = mapper.map_all(&RegionTable::rfsoc4x2_spectrometer());
        assert!(matches!(result, Err(BramError::DeviceOpen { .. })));
        assert!(mapper.is_empty());
    }

    #[test]
    fn test_unmap_all_idempotent() {
        let mut mapper = RegionMapper::new(DEV_MEM);
        mapper.unmap_all();
        mapper.unmap_all();
        assert!(mapper.is_empty());
    }

    #[test]
    fn test_map_file_backed_regions() {
        // A regular file stands in for the device; its offsets act as
        // physical addresses.
        let ps = page_size();
        let contents = pattern(4 * ps);
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &contents).unwrap();

        let synth_addr = (ps - 16) as u64;
        let cnt_addr = (2 * ps + 8) as u64;
        let table = RegionTable::from_entries(
            SizeRules::default(),
            &[
                RegionEntry::new("synth0_0", synth_addr),
                RegionEntry::new("acc_cnt", cnt_addr),
            ],
        )
        .unwrap();

        let mut mapper = RegionMapper::new(file.path());
        mapper.map_all(&table).unwrap();
        assert_eq!(mapper.len(), 2);

        let synth = mapper.get("synth0_0").unwrap();
        assert_eq!(synth.window().page_offset, ps - 16);
        assert_eq!(synth.window().map_len, ps - 16 + 4096);

        // Tail of a region that crosses a page boundary
        let mut tail = [0u8; 6];
        synth.copy_to(4090, &mut tail).unwrap();
        let start = synth_addr as usize + 4090;
        assert_eq!(&tail[..], &contents[start..start + 6]);

        let cnt = mapper.get("acc_cnt").unwrap();
        let mut word = [0u8; 4];
        cnt.copy_to(0, &mut word).unwrap();
        assert_eq!(&word[..], &contents[cnt_addr as usize..cnt_addr as usize + 4]);
        assert!(cnt.copy_to(1, &mut word).is_err());

        mapper.unmap_all();
        assert!(mapper.is_empty());
        // Shared handles outlive the mapper's bookkeeping
        synth.copy_to(0, &mut tail).unwrap();
        assert_eq!(&tail[..], &contents[synth_addr as usize..synth_addr as usize + 6]);
    }

    #[test]
    fn test_map_all_releases_on_failure() {
        let ps = page_size();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), pattern(2 * ps)).unwrap();

        // The first region maps; the second address is beyond any file offset
        let table = RegionTable::from_entries(
            SizeRules::default(),
            &[
                RegionEntry::new("synth0_0", 0),
                RegionEntry::new("synth0_1", u64::MAX & !0xFFF),
            ],
        )
        .unwrap();

        let mut mapper = RegionMapper::new(file.path());
        let result = mapper.map_all(&table);
        match result {
            Err(BramError::MmapFailed { name, .. }) => assert_eq!(name, "synth0_1"),
            other => panic!("expected mmap failure, got {:?}", other),
        }
        assert!(mapper.is_empty());
        assert!(mapper.get("synth0_0").is_none());

        // A later attempt with a valid table starts from scratch
        let good = RegionTable::from_entries(
            SizeRules::default(),
            &[RegionEntry::new("synth0_0", 0)],
        )
        .unwrap();
        mapper.map_all(&good).unwrap();
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    #[ignore]
    fn test_map_dev_mem() {
        // Requires root and a loaded RFSoC bitstream
        let mut mapper = RegionMapper::new(DEV_MEM);
        mapper.map_all(&RegionTable::rfsoc4x2_spectrometer()).unwrap();
        assert_eq!(mapper.len(), 17);
    }
}
