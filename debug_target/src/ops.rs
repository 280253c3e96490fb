use crate::breakwatch::{BreakWatch, BreakWatchError};
use crate::target::{CommandOutcome, HaltReason, TargetError};

/// The capability surface a backend fills in when a device is discovered.
///
/// Every fallible slot has a default body reporting [`TargetError::Unsupported`],
/// so a backend only implements what its silicon actually provides and an
/// unfilled slot can never fail silently. The trait object is chosen once at
/// discovery time and never swapped afterwards.
pub trait TargetOps {
    fn driver_name(&self) -> &str;

    /// Backend connection/reset sequencing run while attaching (commonly
    /// halting the core to establish initial state). If this fails the attach
    /// fails and no controller binding is left behind.
    fn attach(&mut self) -> Result<(), TargetError> {
        Ok(())
    }

    fn detach(&mut self) {}

    fn mem_read32(&mut self, _src: u32, _dest: &mut [u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn mem_write32(&mut self, _dest: u32, _src: &[u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn mem_read64(&mut self, _src: u64, _dest: &mut [u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn mem_write64(&mut self, _dest: u64, _src: &[u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Static property of the backend, not a per-call answer. When true the
    /// caller must halt the core before memory access; the core layer never
    /// halts implicitly on the caller's behalf.
    fn mem_access_needs_halt(&self) -> bool {
        false
    }

    /// Memory map of the device in the remote protocol's XML format.
    fn mem_map(&self) -> Option<String> {
        None
    }

    fn flash_erase(&mut self, _addr: u64, _len: u64) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn flash_write(&mut self, _dest: u64, _src: &[u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn flash_complete(&mut self) -> Result<(), TargetError> {
        Ok(())
    }

    fn flash_mass_erase(&mut self) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Byte size of the full register file, fixed per target.
    fn regs_size(&self) -> usize {
        0
    }

    /// Textual register layout (name/offset/width per register) for upstream
    /// protocol translation.
    fn regs_description(&self) -> Option<&str> {
        None
    }

    fn regs_read(&mut self, _data: &mut [u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn regs_write(&mut self, _data: &[u8]) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Read one register, returning the number of bytes transferred. May be
    /// less than the register's width when `data` under-specifies it.
    fn reg_read(&mut self, _reg: u32, _data: &mut [u8]) -> Result<usize, TargetError> {
        Err(TargetError::Unsupported)
    }

    fn reg_write(&mut self, _reg: u32, _data: &[u8]) -> Result<usize, TargetError> {
        Err(TargetError::Unsupported)
    }

    fn reset(&mut self) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Signal intent to halt. Purely advisory until the next poll.
    fn halt_request(&mut self) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Query the current hardware status. A failed status read is reported as
    /// [`HaltReason::Error`], never a panic. A watchpoint hit whose address
    /// cannot be verified must be reported as [`HaltReason::Breakpoint`].
    fn halt_poll(&mut self) -> HaltReason {
        HaltReason::Error
    }

    fn halt_resume(&mut self, _step: bool) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Declared size of the hardware breakpoint pool.
    fn hw_breakpoint_slots(&self) -> usize {
        0
    }

    /// Declared size of the hardware watchpoint pool.
    fn watchpoint_slots(&self) -> usize {
        0
    }

    fn breakwatch_set(&mut self, _bw: &BreakWatch) -> Result<(), BreakWatchError> {
        Err(BreakWatchError::Unsupported)
    }

    fn breakwatch_clear(&mut self, _bw: &BreakWatch) -> Result<(), BreakWatchError> {
        Err(BreakWatchError::Unsupported)
    }

    fn command(&mut self, _args: &[&str]) -> Result<CommandOutcome, TargetError> {
        Ok(CommandOutcome::NotHandled)
    }

    fn command_names(&self) -> &[&str] {
        &[]
    }
}
