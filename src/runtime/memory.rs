//! Simulated address space made of named, non-overlapping regions

use crate::errors::ExecError;
use crate::snippet::Width;

#[derive(Debug, Clone)]
struct Region {
    name: String,
    base: u64,
    bytes: Vec<u8>,
}

impl Region {
    #[inline]
    fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    #[inline]
    fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.base && addr.checked_add(len as u64).map_or(false, |end| end <= self.end())
    }
}

/// Byte-addressed little-endian memory
#[derive(Debug, Clone, Default)]
pub struct Memory {
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `len` zeroed bytes at `base`
    pub fn map(&mut self, name: &str, base: u64, len: u64) -> Result<(), ExecError> {
        let end = base
            .checked_add(len)
            .ok_or_else(|| ExecError::Overlap { name: name.to_string() })?;
        if self.regions.iter().any(|r| base < r.end() && r.base < end) {
            return Err(ExecError::Overlap { name: name.to_string() });
        }
        tracing::trace!(region = name, base = format_args!("{:#x}", base), len, "mapped region");
        self.regions.push(Region {
            name: name.to_string(),
            base,
            bytes: vec![0; len as usize],
        });
        Ok(())
    }

    pub fn is_mapped(&self, addr: u64, len: usize) -> bool {
        self.regions.iter().any(|r| r.contains(addr, len))
    }

    /// Name of the region holding `addr`
    pub fn region_of(&self, addr: u64) -> Option<&str> {
        self.regions.iter().find(|r| r.contains(addr, 1)).map(|r| r.name.as_str())
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Result<&[u8], ExecError> {
        let region = self
            .regions
            .iter()
            .find(|r| r.contains(addr, len))
            .ok_or(ExecError::Unmapped { addr, len })?;
        let start = (addr - region.base) as usize;
        Ok(&region.bytes[start..start + len])
    }

    pub fn bytes_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], ExecError> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.contains(addr, len))
            .ok_or(ExecError::Unmapped { addr, len })?;
        let start = (addr - region.base) as usize;
        Ok(&mut region.bytes[start..start + len])
    }

    /// 8-bit reads zero-extend, 32-bit reads sign-extend
    pub fn read(&self, addr: u64, width: Width) -> Result<i64, ExecError> {
        let bytes = self.bytes(addr, width.bytes())?;
        Ok(match width {
            Width::W8 => i64::from(bytes[0]),
            Width::W32 => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Width::W64 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(bytes);
                i64::from_le_bytes(word)
            }
        })
    }

    /// Writes the low `width` bytes of `value`
    pub fn write(&mut self, addr: u64, width: Width, value: i64) -> Result<(), ExecError> {
        let len = width.bytes();
        let bytes = self.bytes_mut(addr, len)?;
        bytes.copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    pub fn read_word(&self, addr: u64) -> Result<u64, ExecError> {
        self.read(addr, Width::W64).map(|v| v as u64)
    }

    pub fn write_word(&mut self, addr: u64, value: u64) -> Result<(), ExecError> {
        self.write(addr, Width::W64, value as i64)
    }

    pub fn fill(&mut self, addr: u64, len: usize, byte: u8) -> Result<(), ExecError> {
        self.bytes_mut(addr, len)?.fill(byte);
        Ok(())
    }
}
