//! The per-target handle. Routes every operation through the backend's
//! capability surface while keeping the halt state machine, the
//! breakpoint/watchpoint bookkeeping and the flash sequence consistent.

use crate::breakwatch::{self, BreakWatch, BreakWatchError, BreakWatchKind, BreakWatchTable};
use crate::controller::{Controller, SemihostingContext};
use crate::flash::{FlashError, FlashSequence};
use crate::ops::TargetOps;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Target not halted.
    Running,
    /// Failed to read target status. Callers treat this as "unknown, assume
    /// still halted" and poll again.
    Error,
    Request,
    Stepping,
    /// Hit a breakpoint, or a watchpoint the backend cannot pin down. The
    /// core never fabricates a watch address it cannot verify.
    Breakpoint,
    /// Hit a watchpoint at a verified address.
    Watchpoint(u64),
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// The backend left this capability slot unfilled.
    Unsupported,
    NotAttached,
    AlreadyAttached,
    NoSuchTarget,
    InvalidParams,
    MemoryFault,
    Flash(FlashError),
    /// Backend-specific failure with no finer classification.
    Backend,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Command consumed by the backend, with any pre-formatted output.
    Handled(String),
    NotHandled,
}

/// Heap/stack layout reported to semihosting SYS_HEAPINFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapInfo {
    pub heap_base: u32,
    pub heap_limit: u32,
    pub stack_base: u32,
    pub stack_limit: u32,
}

struct Session {
    controller: Box<dyn Controller>,
    semihosting: SemihostingContext,
}

pub struct Target {
    ops: Box<dyn TargetOps>,
    halt_state: HaltReason,
    breakwatch: BreakWatchTable,
    flash: FlashSequence,
    session: Option<Session>,
    cmdline: Option<String>,
    heapinfo: Option<HeapInfo>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("driver", &self.ops.driver_name())
            .field("halt_state", &self.halt_state)
            .field("attached", &self.session.is_some())
            .finish()
    }
}

impl Target {
    /// The capability surface is fixed here and never swapped afterwards.
    pub fn new(ops: Box<dyn TargetOps>) -> Self {
        Self {
            ops,
            halt_state: HaltReason::Running,
            breakwatch: BreakWatchTable::default(),
            flash: FlashSequence::default(),
            session: None,
            cmdline: None,
            heapinfo: None,
        }
    }

    pub fn driver_name(&self) -> &str {
        self.ops.driver_name()
    }

    /* Attach/detach */

    pub fn attached(&self) -> bool {
        self.session.is_some()
    }

    /// Bind a controller exclusively. The backend's connection sequencing
    /// runs first; if it fails, no binding is left behind.
    pub fn attach(&mut self, controller: Box<dyn Controller>) -> Result<(), TargetError> {
        if self.session.is_some() {
            return Err(TargetError::AlreadyAttached);
        }
        self.ops.attach()?;
        self.session = Some(Session {
            controller,
            semihosting: SemihostingContext::new(),
        });
        log::debug!("attached {}", self.ops.driver_name());
        Ok(())
    }

    /// Fires the controller's teardown notification, then clears the binding.
    /// No-op on an unattached handle.
    pub fn detach(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.controller.on_destroy();
            self.ops.detach();
            log::debug!("detached {}", self.ops.driver_name());
        }
    }

    /* Memory access */

    pub fn mem_read32(&mut self, src: u32, dest: &mut [u8]) -> Result<(), TargetError> {
        self.ops.mem_read32(src, dest)
    }

    pub fn mem_write32(&mut self, dest: u32, src: &[u8]) -> Result<(), TargetError> {
        self.ops.mem_write32(dest, src)
    }

    pub fn mem_read64(&mut self, src: u64, dest: &mut [u8]) -> Result<(), TargetError> {
        self.ops.mem_read64(src, dest)
    }

    pub fn mem_write64(&mut self, dest: u64, src: &[u8]) -> Result<(), TargetError> {
        self.ops.mem_write64(dest, src)
    }

    pub fn mem_access_needs_halt(&self) -> bool {
        self.ops.mem_access_needs_halt()
    }

    pub fn mem_map(&self) -> Option<String> {
        self.ops.mem_map()
    }

    /* Flash access */

    pub fn flash_erase(&mut self, addr: u64, len: u64) -> Result<(), TargetError> {
        self.flash.erase(&mut *self.ops, addr, len)
    }

    pub fn flash_write(&mut self, dest: u64, src: &[u8]) -> Result<(), TargetError> {
        self.flash.write(&mut *self.ops, dest, src)
    }

    pub fn flash_complete(&mut self) -> Result<(), TargetError> {
        self.flash.complete(&mut *self.ops)
    }

    pub fn flash_mass_erase(&mut self) -> Result<(), TargetError> {
        self.flash.mass_erase(&mut *self.ops)
    }

    /* Register access */

    pub fn regs_size(&self) -> usize {
        self.ops.regs_size()
    }

    pub fn regs_description(&self) -> Option<&str> {
        self.ops.regs_description()
    }

    pub fn regs_read(&mut self, data: &mut [u8]) -> Result<(), TargetError> {
        if data.len() != self.ops.regs_size() {
            return Err(TargetError::InvalidParams);
        }
        self.ops.regs_read(data)
    }

    pub fn regs_write(&mut self, data: &[u8]) -> Result<(), TargetError> {
        if data.len() != self.ops.regs_size() {
            return Err(TargetError::InvalidParams);
        }
        self.ops.regs_write(data)
    }

    pub fn reg_read(&mut self, reg: u32, data: &mut [u8]) -> Result<usize, TargetError> {
        self.ops.reg_read(reg, data)
    }

    pub fn reg_write(&mut self, reg: u32, data: &[u8]) -> Result<usize, TargetError> {
        self.ops.reg_write(reg, data)
    }

    /* Execution control */

    /// Backend-level reset. The resulting state is backend-defined; callers
    /// re-poll to find out where the core ended up.
    pub fn reset(&mut self) -> Result<(), TargetError> {
        self.ops.reset()
    }

    /// Advisory halt. Does not change the reported state until the next poll.
    pub fn halt_request(&mut self) -> Result<(), TargetError> {
        self.ops.halt_request()
    }

    /// Synchronous status query. Records and returns the current reason.
    pub fn halt_poll(&mut self) -> HaltReason {
        let reason = self.ops.halt_poll();
        if reason == HaltReason::Error {
            log::warn!("{}: status read failed", self.ops.driver_name());
        }
        self.halt_state = reason;
        reason
    }

    /// Most recently polled halt state.
    pub fn halt_state(&self) -> HaltReason {
        self.halt_state
    }

    /// Resume, or perform exactly one step when `step` is set. Always
    /// delegated: the backend may have halted the core outside this state
    /// machine (attach sequencing does exactly that), so the recorded state
    /// cannot be trusted to gate the call. Backends treat resuming an
    /// already-running core as harmless.
    pub fn halt_resume(&mut self, step: bool) -> Result<(), TargetError> {
        self.ops.halt_resume(step)?;
        self.halt_state = if step {
            HaltReason::Stepping
        } else {
            HaltReason::Running
        };
        Ok(())
    }

    /* Breakpoints and watchpoints */

    pub fn breakwatch_set(
        &mut self,
        kind: BreakWatchKind,
        addr: u64,
        len: u64,
    ) -> Result<(), BreakWatchError> {
        let bw = BreakWatch { kind, addr, len };
        breakwatch::validate(&bw)?;
        if self.breakwatch.contains(&bw) {
            return Err(BreakWatchError::InvalidParams);
        }
        if kind == BreakWatchKind::HardBreak
            && self.breakwatch.hard_breakpoints() >= self.ops.hw_breakpoint_slots()
        {
            return Err(BreakWatchError::Exhausted);
        }
        if kind.is_watchpoint() && self.breakwatch.watchpoints() >= self.ops.watchpoint_slots() {
            return Err(BreakWatchError::Exhausted);
        }
        self.ops.breakwatch_set(&bw)?;
        self.breakwatch.insert(bw);
        Ok(())
    }

    /// Must match a prior set by identical (kind, addr, len). Clearing an
    /// unknown tuple is InvalidParams so callers can detect double frees; the
    /// bookkeeping entry is freed only after the backend confirms.
    pub fn breakwatch_clear(
        &mut self,
        kind: BreakWatchKind,
        addr: u64,
        len: u64,
    ) -> Result<(), BreakWatchError> {
        let bw = BreakWatch { kind, addr, len };
        if !self.breakwatch.contains(&bw) {
            return Err(BreakWatchError::InvalidParams);
        }
        self.ops.breakwatch_clear(&bw)?;
        self.breakwatch.remove(&bw);
        Ok(())
    }

    pub fn breakwatch_list(&self) -> &[BreakWatch] {
        self.breakwatch.entries()
    }

    /* Command interpreter */

    /// Dispatch a target-scoped textual command. Output the backend produced
    /// is forwarded to the controller's sink when one is attached.
    pub fn command(&mut self, args: &[&str]) -> Result<CommandOutcome, TargetError> {
        if args.is_empty() {
            return Err(TargetError::InvalidParams);
        }
        let outcome = self.ops.command(args)?;
        if let CommandOutcome::Handled(out) = &outcome {
            if !out.is_empty() {
                if let Some(session) = &mut self.session {
                    session.controller.print(out);
                }
            }
        }
        Ok(outcome)
    }

    /// Emit the backend's command names to the controller's output sink.
    pub fn command_help(&mut self) -> Result<(), TargetError> {
        let names = self.ops.command_names();
        let session = self.session.as_mut().ok_or(TargetError::NotAttached)?;
        for name in names {
            session.controller.print(name);
        }
        Ok(())
    }

    /* Controller bridge */

    /// Semihosting state of the active session. Rejected on a detached
    /// handle; post-mortem memory/register inspection stays allowed, target
    /// I/O does not.
    pub fn semihosting(&mut self) -> Result<&mut SemihostingContext, TargetError> {
        match &mut self.session {
            Some(session) => Ok(&mut session.semihosting),
            None => Err(TargetError::NotAttached),
        }
    }

    /// Forward a pre-formatted message to the attached controller's sink.
    pub fn controller_print(&mut self, msg: &str) -> Result<(), TargetError> {
        let session = self.session.as_mut().ok_or(TargetError::NotAttached)?;
        session.controller.print(msg);
        Ok(())
    }

    /* Semihosting environment */

    pub fn set_cmdline(&mut self, cmdline: &str) {
        self.cmdline = Some(cmdline.to_string());
    }

    pub fn cmdline(&self) -> Option<&str> {
        self.cmdline.as_deref()
    }

    pub fn set_heapinfo(&mut self, heapinfo: HeapInfo) {
        self.heapinfo = Some(heapinfo);
    }

    pub fn heapinfo(&self) -> Option<HeapInfo> {
        self.heapinfo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct MockOps {
        attach_fails: bool,
        halted: bool,
        poll_reasons: Vec<HaltReason>,
        regs: [u8; 8],
    }

    impl TargetOps for MockOps {
        fn driver_name(&self) -> &str {
            "mock"
        }

        fn attach(&mut self) -> Result<(), TargetError> {
            if self.attach_fails {
                Err(TargetError::Backend)
            } else {
                Ok(())
            }
        }

        fn regs_size(&self) -> usize {
            self.regs.len()
        }

        fn regs_read(&mut self, data: &mut [u8]) -> Result<(), TargetError> {
            data.copy_from_slice(&self.regs);
            Ok(())
        }

        fn regs_write(&mut self, data: &[u8]) -> Result<(), TargetError> {
            self.regs.copy_from_slice(data);
            Ok(())
        }

        fn halt_request(&mut self) -> Result<(), TargetError> {
            self.halted = true;
            Ok(())
        }

        fn halt_poll(&mut self) -> HaltReason {
            if let Some(reason) = self.poll_reasons.pop() {
                return reason;
            }
            if self.halted {
                HaltReason::Request
            } else {
                HaltReason::Running
            }
        }

        fn halt_resume(&mut self, _step: bool) -> Result<(), TargetError> {
            self.halted = false;
            Ok(())
        }
    }

    struct NullController {
        printed: Rc<RefCell<Vec<String>>>,
        destroyed: Rc<RefCell<usize>>,
    }

    impl Controller for NullController {
        fn print(&mut self, msg: &str) {
            self.printed.borrow_mut().push(msg.to_string());
        }

        fn on_destroy(&mut self) {
            *self.destroyed.borrow_mut() += 1;
        }
    }

    fn controller() -> (Box<NullController>, Rc<RefCell<Vec<String>>>, Rc<RefCell<usize>>) {
        let printed = Rc::new(RefCell::new(Vec::new()));
        let destroyed = Rc::new(RefCell::new(0));
        (
            Box::new(NullController {
                printed: printed.clone(),
                destroyed: destroyed.clone(),
            }),
            printed,
            destroyed,
        )
    }

    #[test]
    fn unfilled_slots_report_unsupported() {
        let mut target = Target::new(Box::new(MockOps::default()));
        let mut buf = [0u8; 4];
        assert_eq!(
            target.mem_read64(0x1000, &mut buf),
            Err(TargetError::Unsupported)
        );
        assert_eq!(target.reset(), Err(TargetError::Unsupported));
        assert_eq!(
            target.flash_mass_erase(),
            Err(TargetError::Unsupported)
        );
        assert_eq!(
            target.breakwatch_set(BreakWatchKind::SoftBreak, 0x1000, 2),
            Err(BreakWatchError::Unsupported)
        );
    }

    #[test]
    fn failed_backend_attach_leaves_no_binding() {
        let mut target = Target::new(Box::new(MockOps {
            attach_fails: true,
            ..Default::default()
        }));
        let (ctrl, _, destroyed) = controller();
        assert_eq!(target.attach(ctrl), Err(TargetError::Backend));
        assert!(!target.attached());
        assert_eq!(*destroyed.borrow(), 0);
    }

    #[test]
    fn halt_request_then_poll_reaches_a_halted_reason() {
        let mut target = Target::new(Box::new(MockOps::default()));
        assert_eq!(target.halt_poll(), HaltReason::Running);

        target.halt_request().unwrap();
        // request alone must not change the reported state
        assert_eq!(target.halt_state(), HaltReason::Running);

        assert_eq!(target.halt_poll(), HaltReason::Request);
        assert_eq!(target.halt_state(), HaltReason::Request);
    }

    #[test]
    fn poll_error_means_retry_not_corruption() {
        let mut target = Target::new(Box::new(MockOps {
            halted: true,
            // popped back to front: first poll errors, the retry succeeds
            poll_reasons: vec![HaltReason::Request, HaltReason::Error],
            ..Default::default()
        }));
        assert_eq!(target.halt_poll(), HaltReason::Error);
        assert_eq!(target.halt_poll(), HaltReason::Request);
    }

    #[test]
    fn resume_is_delegated_even_when_recorded_state_is_stale() {
        // the backend halted the core on its own; nothing polled yet, so the
        // recorded state still says Running
        let mut target = Target::new(Box::new(MockOps {
            halted: true,
            ..Default::default()
        }));
        assert_eq!(target.halt_state(), HaltReason::Running);

        target.halt_resume(false).unwrap();
        assert_eq!(target.halt_poll(), HaltReason::Running);

        // the ordinary halted path keeps working
        target.halt_request().unwrap();
        target.halt_poll();
        assert_eq!(target.halt_resume(false), Ok(()));
        assert_eq!(target.halt_state(), HaltReason::Running);
    }

    #[test]
    fn step_lands_in_stepping_state() {
        let mut target = Target::new(Box::new(MockOps::default()));
        target.halt_request().unwrap();
        target.halt_poll();
        target.halt_resume(true).unwrap();
        assert_eq!(target.halt_state(), HaltReason::Stepping);
    }

    #[test]
    fn regs_length_must_match_exactly() {
        let mut target = Target::new(Box::new(MockOps::default()));
        let mut short = [0u8; 4];
        assert_eq!(
            target.regs_read(&mut short),
            Err(TargetError::InvalidParams)
        );

        let mut full = [0u8; 8];
        target.regs_write(&[7u8; 8]).unwrap();
        target.regs_read(&mut full).unwrap();
        assert_eq!(full, [7u8; 8]);
    }

    #[test]
    fn semihosting_needs_an_attached_controller() {
        let mut target = Target::new(Box::new(MockOps::default()));
        assert!(matches!(
            target.semihosting(),
            Err(TargetError::NotAttached)
        ));
        assert_eq!(
            target.controller_print("hello"),
            Err(TargetError::NotAttached)
        );

        let (ctrl, printed, _) = controller();
        target.attach(ctrl).unwrap();
        target.semihosting().unwrap().begin(4).unwrap();
        target.controller_print("hello").unwrap();
        assert_eq!(printed.borrow().as_slice(), ["hello"]);

        // memory/register inspection stays allowed after detach
        target.detach();
        assert!(matches!(
            target.semihosting(),
            Err(TargetError::NotAttached)
        ));
        let mut full = [0u8; 8];
        assert_eq!(target.regs_read(&mut full), Ok(()));
    }

    #[test]
    fn cmdline_and_heapinfo_round_trip() {
        let mut target = Target::new(Box::new(MockOps::default()));
        assert_eq!(target.cmdline(), None);
        target.set_cmdline("app.elf --verbose");
        assert_eq!(target.cmdline(), Some("app.elf --verbose"));

        let info = HeapInfo {
            heap_base: 0x2000_0000,
            heap_limit: 0x2000_8000,
            stack_base: 0x2001_0000,
            stack_limit: 0x2000_c000,
        };
        target.set_heapinfo(info);
        assert_eq!(target.heapinfo(), Some(info));
    }
}
