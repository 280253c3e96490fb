//! Flash programming sequence tracking. Per address range the order is
//! strictly erase, then write, then complete; the core records erased ranges
//! and coalesces contiguous writes so the backend only ever sees ordered,
//! merged operations.

use crate::ops::TargetOps;
use crate::target::TargetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// A write touched bytes outside every erased range.
    NotErased,
    /// Mass erase attempted while a partial erase/write sequence is pending.
    SequencePending,
    /// Complete called with no erase/write sequence in progress.
    NothingPending,
}

struct StagedWrite {
    base: u64,
    data: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct FlashSequence {
    /// Erased (start, len) ranges, kept sorted and merged.
    erased: Vec<(u64, u64)>,
    staged: Option<StagedWrite>,
    active: bool,
}

impl FlashSequence {
    pub fn erase(
        &mut self,
        ops: &mut dyn TargetOps,
        addr: u64,
        len: u64,
    ) -> Result<(), TargetError> {
        if len == 0 || addr.checked_add(len).is_none() {
            return Err(TargetError::InvalidParams);
        }
        if let Err(err) = ops.flash_erase(addr, len) {
            log::warn!("flash erase {:#x}+{:#x} failed: {:?}", addr, len, err);
            self.abort();
            return Err(err);
        }
        self.active = true;
        self.insert_erased(addr, len);
        Ok(())
    }

    pub fn write(
        &mut self,
        ops: &mut dyn TargetOps,
        dest: u64,
        src: &[u8],
    ) -> Result<(), TargetError> {
        if src.is_empty() || dest.checked_add(src.len() as u64).is_none() {
            return Err(TargetError::InvalidParams);
        }
        if !self.covered(dest, src.len() as u64) {
            log::warn!("flash write {:#x}+{:#x} without prior erase", dest, src.len());
            return Err(TargetError::Flash(FlashError::NotErased));
        }

        let contiguous = matches!(&self.staged, Some(staged) if staged.base + staged.data.len() as u64 == dest);
        if contiguous {
            if let Some(staged) = &mut self.staged {
                staged.data.extend_from_slice(src);
            }
        } else {
            self.flush(ops)?;
            self.staged = Some(StagedWrite {
                base: dest,
                data: src.to_vec(),
            });
        }
        Ok(())
    }

    pub fn complete(&mut self, ops: &mut dyn TargetOps) -> Result<(), TargetError> {
        if !self.active {
            return Err(TargetError::Flash(FlashError::NothingPending));
        }
        self.flush(ops)?;
        let result = ops.flash_complete();
        if let Err(err) = &result {
            log::warn!("flash complete failed: {:?}", err);
        }
        // the sequence is over either way; a failed commit leaves the region
        // indeterminate and the caller must re-erase before retrying
        self.abort();
        result
    }

    pub fn mass_erase(&mut self, ops: &mut dyn TargetOps) -> Result<(), TargetError> {
        if self.active {
            return Err(TargetError::Flash(FlashError::SequencePending));
        }
        ops.flash_mass_erase()
    }

    pub fn active(&self) -> bool {
        self.active
    }

    fn flush(&mut self, ops: &mut dyn TargetOps) -> Result<(), TargetError> {
        if let Some(staged) = self.staged.take() {
            if let Err(err) = ops.flash_write(staged.base, &staged.data) {
                log::warn!(
                    "flash write {:#x}+{:#x} failed: {:?}",
                    staged.base,
                    staged.data.len(),
                    err
                );
                self.abort();
                return Err(err);
            }
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.erased.clear();
        self.staged = None;
        self.active = false;
    }

    fn insert_erased(&mut self, addr: u64, len: u64) {
        self.erased.push((addr, len));
        self.erased.sort_by_key(|range| range.0);

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.erased.len());
        for &(start, len) in &self.erased {
            match merged.last_mut() {
                Some(last) if last.0 + last.1 >= start => {
                    let end = (start + len).max(last.0 + last.1);
                    last.1 = end - last.0;
                }
                _ => merged.push((start, len)),
            }
        }
        self.erased = merged;
    }

    fn covered(&self, addr: u64, len: u64) -> bool {
        self.erased
            .iter()
            .any(|&(start, rlen)| addr >= start && addr + len <= start + rlen)
    }
}
