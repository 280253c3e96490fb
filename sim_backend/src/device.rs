//! The simulated MCU itself: RAM, sectored NOR-style flash, a small register
//! file and a debug status word. The probe layer in [`crate::probe`] is the
//! only thing that should drive it during a debug session; tests poke it
//! directly to simulate the core hitting breakpoints or faulting.

pub const RAM_BASE: u32 = 0x2000_0000;
pub const RAM_SIZE: usize = 0x1_0000;
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const FLASH_SIZE: usize = 0x2_0000;
pub const FLASH_SECTOR: usize = 0x400;

pub const NUM_REGS: usize = 17;
pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;

bitflags::bitflags! {
    /// Debug status word, loosely modelled on a DHCSR-style register.
    pub struct DebugStatus: u32 {
        const HALTED    = 0x0001;
        const HALT_REQ  = 0x0002;
        const STEPPED   = 0x0004;
        const BKPT_HIT  = 0x0008;
        const WATCH_HIT = 0x0010;
        const FAULT     = 0x0020;
    }
}

enum Region {
    Ram(usize),
    Flash(usize),
}

pub struct SimDevice {
    ram: Vec<u8>,
    flash: Vec<u8>,
    regs: [u32; NUM_REGS],
    pub status: DebugStatus,
    /// Makes the next status read fail, to exercise the flaky-transport path.
    pub fail_next_status: bool,
    watch_hit: Option<u64>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        let mut regs = [0u32; NUM_REGS];
        regs[REG_PC] = FLASH_BASE;
        regs[REG_SP] = RAM_BASE + RAM_SIZE as u32;
        Self {
            ram: vec![0; RAM_SIZE],
            flash: vec![0xff; FLASH_SIZE],
            regs,
            status: DebugStatus::empty(),
            fail_next_status: false,
            watch_hit: None,
        }
    }

    /// Whole range must land in a single region or the access fails whole.
    fn region(addr: u32, len: usize) -> Option<Region> {
        let end = (addr as usize).checked_add(len)?;
        if addr >= RAM_BASE && end <= RAM_BASE as usize + RAM_SIZE {
            Some(Region::Ram((addr - RAM_BASE) as usize))
        } else if addr >= FLASH_BASE && end <= FLASH_BASE as usize + FLASH_SIZE {
            Some(Region::Flash((addr - FLASH_BASE) as usize))
        } else {
            None
        }
    }

    pub fn read(&self, addr: u32, dest: &mut [u8]) -> bool {
        match Self::region(addr, dest.len()) {
            Some(Region::Ram(off)) => {
                dest.copy_from_slice(&self.ram[off..off + dest.len()]);
                true
            }
            Some(Region::Flash(off)) => {
                dest.copy_from_slice(&self.flash[off..off + dest.len()]);
                true
            }
            None => false,
        }
    }

    /// Plain bus writes only reach RAM; flash goes through the erase/program
    /// path below.
    pub fn write(&mut self, addr: u32, src: &[u8]) -> bool {
        match Self::region(addr, src.len()) {
            Some(Region::Ram(off)) => {
                self.ram[off..off + src.len()].copy_from_slice(src);
                true
            }
            _ => false,
        }
    }

    pub fn erase_flash(&mut self, addr: u32, len: usize) -> bool {
        if addr as usize % FLASH_SECTOR != 0 || len % FLASH_SECTOR != 0 {
            return false;
        }
        match Self::region(addr, len) {
            Some(Region::Flash(off)) => {
                self.flash[off..off + len].fill(0xff);
                true
            }
            _ => false,
        }
    }

    pub fn program_flash(&mut self, addr: u32, src: &[u8]) -> bool {
        match Self::region(addr, src.len()) {
            Some(Region::Flash(off)) => {
                // programming can only clear bits, like the real article
                for (byte, val) in self.flash[off..off + src.len()].iter_mut().zip(src) {
                    *byte &= val;
                }
                true
            }
            _ => false,
        }
    }

    pub fn mass_erase_flash(&mut self) {
        self.flash.fill(0xff);
    }

    pub fn reg(&self, index: usize) -> Option<u32> {
        self.regs.get(index).copied()
    }

    pub fn set_reg(&mut self, index: usize, val: u32) -> bool {
        match self.regs.get_mut(index) {
            Some(reg) => {
                *reg = val;
                true
            }
            None => false,
        }
    }

    pub fn pc(&self) -> u32 {
        self.regs[REG_PC]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.regs[REG_PC] = pc;
    }

    pub fn halted(&self) -> bool {
        self.status.contains(DebugStatus::HALTED)
    }

    pub fn watch_hit(&self) -> Option<u64> {
        self.watch_hit
    }

    pub fn halt_request(&mut self) {
        self.status.insert(DebugStatus::HALT_REQ);
    }

    /// Latch a pending halt request into the halted state. Returns whether a
    /// request was pending.
    pub fn ack_halt(&mut self) -> bool {
        if self.status.contains(DebugStatus::HALT_REQ) {
            self.status.remove(DebugStatus::HALT_REQ);
            self.status.insert(DebugStatus::HALTED);
            true
        } else {
            false
        }
    }

    pub fn resume(&mut self) {
        self.status = DebugStatus::empty();
        self.watch_hit = None;
    }

    pub fn step(&mut self) {
        self.regs[REG_PC] = self.regs[REG_PC].wrapping_add(2);
        self.status = DebugStatus::HALTED | DebugStatus::STEPPED;
        self.watch_hit = None;
    }

    /// Reset halts at the reset vector, which is what a debug connect wants.
    pub fn reset(&mut self) {
        self.regs = [0u32; NUM_REGS];
        self.regs[REG_PC] = FLASH_BASE;
        self.regs[REG_SP] = RAM_BASE + RAM_SIZE as u32;
        self.status = DebugStatus::HALTED;
        self.watch_hit = None;
    }

    /* Hooks for simulating the core stopping on its own. */

    pub fn hit_breakpoint(&mut self) {
        self.status = DebugStatus::HALTED | DebugStatus::BKPT_HIT;
    }

    /// `addr` is the watchpoint address when the comparator can identify it;
    /// `None` simulates aliased diagnostics.
    pub fn hit_watchpoint(&mut self, addr: Option<u64>) {
        self.status = DebugStatus::HALTED | DebugStatus::WATCH_HIT;
        self.watch_hit = addr;
    }

    pub fn hit_fault(&mut self) {
        self.status = DebugStatus::HALTED | DebugStatus::FAULT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accesses_fail_whole_across_region_edges() {
        let mut dev = SimDevice::new();
        let mut buf = [0u8; 8];

        assert!(dev.read(RAM_BASE, &mut buf));
        assert!(!dev.read(RAM_BASE + RAM_SIZE as u32 - 4, &mut buf));
        assert!(!dev.read(0x1000_0000, &mut buf));

        assert!(dev.write(RAM_BASE + 16, &[1, 2, 3, 4]));
        // bus writes never reach flash
        assert!(!dev.write(FLASH_BASE, &[1, 2, 3, 4]));
    }

    #[test]
    fn flash_programming_clears_bits_only() {
        let mut dev = SimDevice::new();
        assert!(dev.erase_flash(FLASH_BASE, FLASH_SECTOR));
        assert!(dev.program_flash(FLASH_BASE, &[0xf0]));
        assert!(dev.program_flash(FLASH_BASE, &[0x0f]));

        let mut byte = [0xffu8];
        dev.read(FLASH_BASE, &mut byte);
        assert_eq!(byte[0], 0x00);

        // misaligned erase is refused
        assert!(!dev.erase_flash(FLASH_BASE + 2, FLASH_SECTOR));
    }

    #[test]
    fn halt_request_latches_on_ack() {
        let mut dev = SimDevice::new();
        assert!(!dev.halted());
        dev.halt_request();
        assert!(!dev.halted());
        assert!(dev.ack_halt());
        assert!(dev.halted());
        assert!(!dev.ack_halt());

        dev.resume();
        assert!(!dev.halted());
    }
}
