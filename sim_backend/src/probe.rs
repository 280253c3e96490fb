//! Glue between the simulated device and the `debug_target` capability
//! surface, plus the scanner that registers it. Fills the role a real SWD or
//! JTAG probe driver would.

use std::sync::{Arc, Mutex};

use debug_target::breakwatch::{BreakWatch, BreakWatchError, BreakWatchKind};
use debug_target::ops::TargetOps;
use debug_target::registry::{ScanError, Scanner, TargetRegistry};
use debug_target::target::{CommandOutcome, HaltReason, Target, TargetError};

use crate::device::{DebugStatus, SimDevice, FLASH_BASE, FLASH_SECTOR, FLASH_SIZE, NUM_REGS, RAM_BASE, RAM_SIZE};

pub const HW_BREAK_SLOTS: usize = 4;
pub const WATCH_SLOTS: usize = 2;

/// Thumb BKPT #0, little endian, used to patch software breakpoints.
pub const BKPT_INSN: [u8; 2] = [0x00, 0xbe];

pub const REGISTER_DESCRIPTION: &str = "\
name:r0;bitsize:32;offset:0;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r1;bitsize:32;offset:4;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r2;bitsize:32;offset:8;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r3;bitsize:32;offset:12;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r4;bitsize:32;offset:16;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r5;bitsize:32;offset:20;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r6;bitsize:32;offset:24;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r7;bitsize:32;offset:28;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r8;bitsize:32;offset:32;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r9;bitsize:32;offset:36;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r10;bitsize:32;offset:40;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r11;bitsize:32;offset:44;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:r12;bitsize:32;offset:48;encoding:uint;format:hex;set:General Purpose Registers;\n\
name:sp;bitsize:32;offset:52;encoding:uint;format:hex;set:General Purpose Registers;generic:sp;\n\
name:lr;bitsize:32;offset:56;encoding:uint;format:hex;set:General Purpose Registers;generic:ra;\n\
name:pc;bitsize:32;offset:60;encoding:uint;format:hex;set:General Purpose Registers;generic:pc;\n\
name:xpsr;bitsize:32;offset:64;encoding:uint;format:hex;set:General Purpose Registers;\n";

pub struct SimProbe {
    device: Arc<Mutex<SimDevice>>,
    hw_breaks: Vec<BreakWatch>,
    watches: Vec<BreakWatch>,
    /// (addr, displaced bytes) per patched software breakpoint.
    soft_breaks: Vec<(u32, [u8; 2])>,
}

impl SimProbe {
    pub fn new(device: Arc<Mutex<SimDevice>>) -> Self {
        Self {
            device,
            hw_breaks: Vec::new(),
            watches: Vec::new(),
            soft_breaks: Vec::new(),
        }
    }
}

impl TargetOps for SimProbe {
    fn driver_name(&self) -> &str {
        "Simulated Cortex-M"
    }

    /// Halt the core to establish initial state, the way a real probe driver
    /// sequences its connect.
    fn attach(&mut self) -> Result<(), TargetError> {
        let mut dev = self.device.lock().unwrap();
        dev.halt_request();
        for _ in 0..3 {
            if dev.ack_halt() || dev.halted() {
                return Ok(());
            }
        }
        log::error!("failed to halt the core while attaching");
        Err(TargetError::Backend)
    }

    fn detach(&mut self) {
        self.device.lock().unwrap().resume();
    }

    fn mem_read32(&mut self, src: u32, dest: &mut [u8]) -> Result<(), TargetError> {
        if self.device.lock().unwrap().read(src, dest) {
            Ok(())
        } else {
            Err(TargetError::MemoryFault)
        }
    }

    fn mem_write32(&mut self, dest: u32, src: &[u8]) -> Result<(), TargetError> {
        if self.device.lock().unwrap().write(dest, src) {
            Ok(())
        } else {
            Err(TargetError::MemoryFault)
        }
    }

    // mem_read64/mem_write64 stay unfilled: this is a 32-bit part.

    fn mem_map(&self) -> Option<String> {
        Some(format!(
            "<memory-map>\
             <memory type=\"ram\" start=\"{:#x}\" length=\"{:#x}\"/>\
             <memory type=\"flash\" start=\"{:#x}\" length=\"{:#x}\">\
             <property name=\"blocksize\">{:#x}</property>\
             </memory>\
             </memory-map>",
            RAM_BASE, RAM_SIZE, FLASH_BASE, FLASH_SIZE, FLASH_SECTOR
        ))
    }

    fn flash_erase(&mut self, addr: u64, len: u64) -> Result<(), TargetError> {
        let (addr, len) = (u32::try_from(addr), usize::try_from(len));
        match (addr, len) {
            (Ok(addr), Ok(len)) => {
                if self.device.lock().unwrap().erase_flash(addr, len) {
                    Ok(())
                } else {
                    Err(TargetError::InvalidParams)
                }
            }
            _ => Err(TargetError::InvalidParams),
        }
    }

    fn flash_write(&mut self, dest: u64, src: &[u8]) -> Result<(), TargetError> {
        let dest = u32::try_from(dest).map_err(|_| TargetError::InvalidParams)?;
        if self.device.lock().unwrap().program_flash(dest, src) {
            Ok(())
        } else {
            Err(TargetError::MemoryFault)
        }
    }

    fn flash_mass_erase(&mut self) -> Result<(), TargetError> {
        self.device.lock().unwrap().mass_erase_flash();
        Ok(())
    }

    fn regs_size(&self) -> usize {
        NUM_REGS * 4
    }

    fn regs_description(&self) -> Option<&str> {
        Some(REGISTER_DESCRIPTION)
    }

    fn regs_read(&mut self, data: &mut [u8]) -> Result<(), TargetError> {
        let dev = self.device.lock().unwrap();
        for (index, chunk) in data.chunks_exact_mut(4).enumerate() {
            match dev.reg(index) {
                Some(val) => chunk.copy_from_slice(&val.to_le_bytes()),
                None => return Err(TargetError::InvalidParams),
            }
        }
        Ok(())
    }

    fn regs_write(&mut self, data: &[u8]) -> Result<(), TargetError> {
        let mut dev = self.device.lock().unwrap();
        for (index, chunk) in data.chunks_exact(4).enumerate() {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(chunk);
            if !dev.set_reg(index, u32::from_le_bytes(bytes)) {
                return Err(TargetError::InvalidParams);
            }
        }
        Ok(())
    }

    fn reg_read(&mut self, reg: u32, data: &mut [u8]) -> Result<usize, TargetError> {
        let dev = self.device.lock().unwrap();
        let val = dev.reg(reg as usize).ok_or(TargetError::InvalidParams)?;
        let n = data.len().min(4);
        data[..n].copy_from_slice(&val.to_le_bytes()[..n]);
        Ok(n)
    }

    fn reg_write(&mut self, reg: u32, data: &[u8]) -> Result<usize, TargetError> {
        let mut dev = self.device.lock().unwrap();
        let val = dev.reg(reg as usize).ok_or(TargetError::InvalidParams)?;
        let n = data.len().min(4);
        let mut bytes = val.to_le_bytes();
        bytes[..n].copy_from_slice(&data[..n]);
        dev.set_reg(reg as usize, u32::from_le_bytes(bytes));
        Ok(n)
    }

    fn reset(&mut self) -> Result<(), TargetError> {
        self.device.lock().unwrap().reset();
        Ok(())
    }

    fn halt_request(&mut self) -> Result<(), TargetError> {
        self.device.lock().unwrap().halt_request();
        Ok(())
    }

    fn halt_poll(&mut self) -> HaltReason {
        let mut dev = self.device.lock().unwrap();
        if dev.fail_next_status {
            dev.fail_next_status = false;
            return HaltReason::Error;
        }
        if dev.ack_halt() {
            return HaltReason::Request;
        }
        if !dev.halted() {
            return HaltReason::Running;
        }
        if dev.status.contains(DebugStatus::WATCH_HIT) {
            // only report an address the comparator actually identified
            match dev.watch_hit() {
                Some(addr) => HaltReason::Watchpoint(addr),
                None => HaltReason::Breakpoint,
            }
        } else if dev.status.contains(DebugStatus::BKPT_HIT) {
            HaltReason::Breakpoint
        } else if dev.status.contains(DebugStatus::FAULT) {
            HaltReason::Fault
        } else if dev.status.contains(DebugStatus::STEPPED) {
            HaltReason::Stepping
        } else {
            HaltReason::Request
        }
    }

    fn halt_resume(&mut self, step: bool) -> Result<(), TargetError> {
        let mut dev = self.device.lock().unwrap();
        if step {
            dev.step();
        } else {
            dev.resume();
        }
        Ok(())
    }

    fn hw_breakpoint_slots(&self) -> usize {
        HW_BREAK_SLOTS
    }

    fn watchpoint_slots(&self) -> usize {
        WATCH_SLOTS
    }

    fn breakwatch_set(&mut self, bw: &BreakWatch) -> Result<(), BreakWatchError> {
        match bw.kind {
            BreakWatchKind::SoftBreak => {
                let addr = u32::try_from(bw.addr).map_err(|_| BreakWatchError::InvalidParams)?;
                let mut dev = self.device.lock().unwrap();
                let mut displaced = [0u8; 2];
                if !dev.read(addr, &mut displaced) || !dev.write(addr, &BKPT_INSN) {
                    return Err(BreakWatchError::InvalidParams);
                }
                self.soft_breaks.push((addr, displaced));
                Ok(())
            }
            BreakWatchKind::HardBreak => {
                if self.hw_breaks.len() >= HW_BREAK_SLOTS {
                    return Err(BreakWatchError::Exhausted);
                }
                self.hw_breaks.push(*bw);
                Ok(())
            }
            BreakWatchKind::WatchWrite | BreakWatchKind::WatchAccess => {
                if self.watches.len() >= WATCH_SLOTS {
                    return Err(BreakWatchError::Exhausted);
                }
                self.watches.push(*bw);
                Ok(())
            }
            // the simulated comparators cannot trap reads
            BreakWatchKind::WatchRead => Err(BreakWatchError::Unsupported),
        }
    }

    fn breakwatch_clear(&mut self, bw: &BreakWatch) -> Result<(), BreakWatchError> {
        match bw.kind {
            BreakWatchKind::SoftBreak => {
                let addr = u32::try_from(bw.addr).map_err(|_| BreakWatchError::InvalidParams)?;
                let index = self
                    .soft_breaks
                    .iter()
                    .position(|(patched, _)| *patched == addr)
                    .ok_or(BreakWatchError::InvalidParams)?;
                let (addr, displaced) = self.soft_breaks.remove(index);
                self.device.lock().unwrap().write(addr, &displaced);
                Ok(())
            }
            BreakWatchKind::HardBreak => {
                let index = self
                    .hw_breaks
                    .iter()
                    .position(|entry| entry == bw)
                    .ok_or(BreakWatchError::InvalidParams)?;
                self.hw_breaks.remove(index);
                Ok(())
            }
            BreakWatchKind::WatchWrite | BreakWatchKind::WatchAccess => {
                let index = self
                    .watches
                    .iter()
                    .position(|entry| entry == bw)
                    .ok_or(BreakWatchError::InvalidParams)?;
                self.watches.remove(index);
                Ok(())
            }
            BreakWatchKind::WatchRead => Err(BreakWatchError::Unsupported),
        }
    }

    fn command(&mut self, args: &[&str]) -> Result<CommandOutcome, TargetError> {
        match args {
            ["status"] => {
                let dev = self.device.lock().unwrap();
                Ok(CommandOutcome::Handled(format!(
                    "pc={:#010x} status={:?}",
                    dev.pc(),
                    dev.status
                )))
            }
            ["reset"] => {
                self.device.lock().unwrap().reset();
                Ok(CommandOutcome::Handled(String::new()))
            }
            _ => Ok(CommandOutcome::NotHandled),
        }
    }

    fn command_names(&self) -> &[&str] {
        &["status", "reset"]
    }
}

pub struct SimScanner {
    device: Arc<Mutex<SimDevice>>,
}

impl Default for SimScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SimScanner {
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(SimDevice::new())),
        }
    }

    /// Shared handle onto the device, so callers (and tests) can poke the
    /// hardware from outside the debug session.
    pub fn device(&self) -> Arc<Mutex<SimDevice>> {
        self.device.clone()
    }
}

impl Scanner for SimScanner {
    fn name(&self) -> &str {
        "sim"
    }

    fn scan(&mut self, registry: &mut TargetRegistry) -> Result<(), ScanError> {
        let probe = SimProbe::new(self.device.clone());
        let id = registry.add(Target::new(Box::new(probe)));
        log::info!("sim scan found target {}", id);
        Ok(())
    }
}
