//! Bookkeeping for breakpoint and watchpoint hardware slots. Validation and
//! pool accounting happen here before anything is delegated to the backend.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakWatchKind {
    /// Patches target memory instead of using a hardware slot; bounded only
    /// by memory write capability.
    SoftBreak,
    HardBreak,
    WatchWrite,
    WatchRead,
    WatchAccess,
}

impl BreakWatchKind {
    pub fn is_watchpoint(self) -> bool {
        matches!(
            self,
            BreakWatchKind::WatchWrite | BreakWatchKind::WatchRead | BreakWatchKind::WatchAccess
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakWatch {
    pub kind: BreakWatchKind,
    pub addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakWatchError {
    /// No free hardware slot of the requested class.
    Exhausted,
    /// The backend lacks this break/watch type.
    Unsupported,
    /// Alignment/length constraints violated, or clear without a matching set.
    InvalidParams,
}

/// Watchpoints need a power-of-two length and natural alignment on most
/// architectures; breakpoints only need a nonzero length.
pub(crate) fn validate(bw: &BreakWatch) -> Result<(), BreakWatchError> {
    if bw.len == 0 {
        return Err(BreakWatchError::InvalidParams);
    }
    if bw.kind.is_watchpoint() && (!bw.len.is_power_of_two() || bw.addr % bw.len != 0) {
        return Err(BreakWatchError::InvalidParams);
    }
    Ok(())
}

#[derive(Default)]
pub(crate) struct BreakWatchTable {
    entries: Vec<BreakWatch>,
}

impl BreakWatchTable {
    pub fn contains(&self, bw: &BreakWatch) -> bool {
        self.entries.iter().any(|entry| entry == bw)
    }

    pub fn insert(&mut self, bw: BreakWatch) {
        self.entries.push(bw);
    }

    pub fn remove(&mut self, bw: &BreakWatch) {
        if let Some(index) = self.entries.iter().position(|entry| entry == bw) {
            self.entries.remove(index);
        }
    }

    pub fn hard_breakpoints(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.kind == BreakWatchKind::HardBreak)
            .count()
    }

    pub fn watchpoints(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.kind.is_watchpoint())
            .count()
    }

    pub fn entries(&self) -> &[BreakWatch] {
        &self.entries
    }
}
