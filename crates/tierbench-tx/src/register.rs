//! Rate-control register
//!
//! A window of a PCI BAR (sysfs `resourceN` file) mapped read/write. The
//! consumption-rate estimate carried by telemetry is written to a fixed
//! offset as a 32-bit volatile store.

use crate::error::{TxError, TxResult};
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Register receiving the consumption rate
pub const RATE_REGISTER_OFFSET: u64 = 0x10;

const PAGE_SIZE: u64 = 4096;

/// Where the register lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// sysfs resource file of the device BAR
    pub path: PathBuf,
    /// Offset of the rate register inside the BAR
    pub offset: u64,
    /// Bytes to map
    pub map_len: usize,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/sys/bus/pci/devices/0000:01:00.0/resource0"),
            offset: RATE_REGISTER_OFFSET,
            map_len: PAGE_SIZE as usize,
        }
    }
}

/// Mapped register window
pub struct RateRegister {
    map: MmapMut,
    /// BAR offset of the first mapped byte
    base: u64,
    offset: u64,
}

impl RateRegister {
    /// Map `map_len` bytes of the BAR covering `offset`
    pub fn open(cfg: &RegisterConfig) -> TxResult<Self> {
        Self::open_at(&cfg.path, cfg.offset, cfg.map_len)
    }

    fn open_at(path: &Path, offset: u64, map_len: usize) -> TxResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TxError::Register(format!("{}: {e}", path.display())))?;
        let base = offset & !(PAGE_SIZE - 1);
        let len = (offset - base) as usize + map_len;
        // SAFETY: the device window is only accessed through volatile
        // stores in `write_u32`, never through references
        let map = unsafe { MmapOptions::new().offset(base).len(len).map_mut(&file) }
            .map_err(|e| TxError::Register(format!("mmap {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), offset = format_args!("{offset:#x}"), len, "rate register mapped");
        Ok(Self { map, base, offset })
    }

    /// Use an existing mapping whose first byte is BAR offset `base`
    pub fn from_map(map: MmapMut, base: u64, offset: u64) -> Self {
        Self { map, base, offset }
    }

    /// Register offset the rate is written to
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn slot(&self, offset: u64) -> TxResult<usize> {
        let end = self.base + self.map.len() as u64;
        if offset < self.base || offset + 4 > end || offset % 4 != 0 {
            return Err(TxError::RegisterOffset {
                offset,
                base: self.base,
                end,
            });
        }
        Ok((offset - self.base) as usize)
    }

    /// 32-bit volatile store at BAR offset `offset`
    pub fn write_u32(&mut self, offset: u64, value: u32) -> TxResult<()> {
        let at = self.slot(offset)?;
        // SAFETY: `slot` checked bounds and 4-byte alignment relative to a
        // page-aligned mapping
        unsafe { std::ptr::write_volatile(self.map.as_mut_ptr().add(at) as *mut u32, value) };
        Ok(())
    }

    /// 32-bit volatile load at BAR offset `offset`
    pub fn read_u32(&self, offset: u64) -> TxResult<u32> {
        let at = self.slot(offset)?;
        // SAFETY: as in `write_u32`
        Ok(unsafe { std::ptr::read_volatile(self.map.as_ptr().add(at) as *const u32) })
    }

    /// Publish a consumption-rate estimate
    #[inline]
    pub fn write_rate(&mut self, bytes_per_us: u64) -> TxResult<()> {
        let value = bytes_per_us.min(u32::MAX as u64) as u32;
        self.write_u32(self.offset, value)
    }
}
