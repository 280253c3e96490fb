//! The caller-owned controller context bound to an attached target, plus the
//! semihosting bridge that maps local I/O outcomes onto GDB's File I/O errno
//! space.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Implemented by the upstream protocol server, consumed by this core.
/// Exactly one controller is bound to a target for the duration of an attach.
pub trait Controller {
    /// Pre-formatted output sink; formatting stays upstream.
    fn print(&mut self, msg: &str);

    /// Teardown notification, invoked exactly once per detach.
    fn on_destroy(&mut self);
}

/// GDB File I/O errno values, per gdbsupport/fileio.h.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub enum SemihostingErrno {
    SUCCESS = 0,
    EPERM = 1,
    ENOENT = 2,
    EINTR = 4,
    EIO = 5,
    EBADF = 9,
    EACCES = 13,
    EFAULT = 14,
    EBUSY = 16,
    EEXIST = 17,
    ENODEV = 19,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    ENFILE = 23,
    EMFILE = 24,
    EFBIG = 27,
    ENOSPC = 28,
    ESPIPE = 29,
    EROFS = 30,
    ENOSYS = 88,
    ENAMETOOLONG = 91,
    /// Catch-all for anything with no mapping.
    EUNKNOWN = 9999,
}

impl SemihostingErrno {
    pub fn from_io_error(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => SemihostingErrno::ENOENT,
            ErrorKind::PermissionDenied => SemihostingErrno::EACCES,
            ErrorKind::AlreadyExists => SemihostingErrno::EEXIST,
            ErrorKind::Interrupted => SemihostingErrno::EINTR,
            ErrorKind::InvalidInput => SemihostingErrno::EINVAL,
            ErrorKind::WriteZero | ErrorKind::UnexpectedEof => SemihostingErrno::EIO,
            _ => SemihostingErrno::EUNKNOWN,
        }
    }
}

impl TryFrom<u32> for SemihostingErrno {
    type Error = ();
    fn try_from(val: u32) -> Result<Self, Self::Error> {
        match num_traits::FromPrimitive::from_u32(val) {
            Option::Some(val) => Result::Ok(val),
            Option::None => Result::Err(()),
        }
    }
}

impl From<SemihostingErrno> for u32 {
    fn from(errno: SemihostingErrno) -> u32 {
        num_traits::ToPrimitive::to_u32(&errno).unwrap_or(SemihostingErrno::EUNKNOWN as u32)
    }
}

/// Per-session semihosting state: the single outstanding request buffer, the
/// errno of the last completed request, and the cooperative-interrupt flag.
///
/// This is not a queue. A new request reuses the same storage once the prior
/// one finishes; starting a second request while one is in flight is EBUSY.
pub struct SemihostingContext {
    buffer: Vec<u8>,
    in_flight: bool,
    errno: SemihostingErrno,
    interrupted: Arc<AtomicBool>,
}

impl SemihostingContext {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            in_flight: false,
            errno: SemihostingErrno::SUCCESS,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle the upstream side can use to request cooperative cancellation
    /// of a blocking semihosting call from another thread.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Stage the buffer for one request. The descriptor lives until
    /// [`SemihostingContext::finish`] is called.
    pub fn begin(&mut self, len: usize) -> Result<&mut [u8], SemihostingErrno> {
        if self.in_flight {
            return Err(SemihostingErrno::EBUSY);
        }
        self.in_flight = true;
        self.buffer.clear();
        self.buffer.resize(len, 0);
        Ok(&mut self.buffer[..])
    }

    /// Buffer of the in-flight request.
    pub fn buffer(&mut self) -> Option<&mut [u8]> {
        if self.in_flight {
            Some(&mut self.buffer[..])
        } else {
            None
        }
    }

    /// To be called at natural suspension points of a blocking semihosting
    /// operation. An observed interrupt aborts the in-flight request promptly
    /// with EINTR rather than a generic unknown error.
    pub fn check_interrupted(&mut self) -> Result<(), SemihostingErrno> {
        if self.interrupted.swap(false, Ordering::Relaxed) {
            log::debug!("semihosting request interrupted");
            self.in_flight = false;
            self.errno = SemihostingErrno::EINTR;
            return Err(SemihostingErrno::EINTR);
        }
        Ok(())
    }

    /// Complete the in-flight request, recording its errno and releasing the
    /// descriptor for reuse.
    pub fn finish(&mut self, errno: SemihostingErrno) -> &[u8] {
        self.in_flight = false;
        self.errno = errno;
        &self.buffer
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Errno of the most recently completed request.
    pub fn errno(&self) -> SemihostingErrno {
        self.errno
    }
}
