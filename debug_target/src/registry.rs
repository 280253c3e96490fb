//! Ordered arena of discovered targets. Handles are indices into the arena,
//! so there is no way to hold onto a freed target record.

use crate::controller::Controller;
use crate::target::{Target, TargetError};

pub type TargetId = usize;

#[derive(Debug)]
pub enum ScanError {
    /// Transport scan completed but found nothing.
    NoTargets,
    /// Transport failed mid-scan.
    Transport(String),
}

/// One per transport (SWD, JTAG, ...). A successful scan registers zero or
/// more new targets as a side effect; callers re-enumerate with
/// [`TargetRegistry::foreach`] rather than trusting a returned count.
pub trait Scanner {
    fn name(&self) -> &str;
    fn scan(&mut self, registry: &mut TargetRegistry) -> Result<(), ScanError>;
}

#[derive(Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly discovered target, returning its stable id.
    pub fn add(&mut self, target: Target) -> TargetId {
        let id = self.targets.len();
        log::debug!("target {} registered ({})", id, target.driver_name());
        self.targets.push(target);
        id
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(id)
    }

    pub fn get_mut(&mut self, id: TargetId) -> Option<&mut Target> {
        self.targets.get_mut(id)
    }

    /// Most recently created target, for a scanner still populating it.
    pub fn get_last_mut(&mut self) -> Option<&mut Target> {
        self.targets.last_mut()
    }

    /// Insertion-order traversal over every live target. Returns the number
    /// visited. Registry mutation cannot be interleaved with the traversal;
    /// the exclusive borrow enforces what the original left to convention.
    pub fn foreach(&mut self, mut callback: impl FnMut(TargetId, &mut Target)) -> usize {
        let mut visited = 0;
        for (index, target) in self.targets.iter_mut().enumerate() {
            callback(index, target);
            visited += 1;
        }
        visited
    }

    /// Bind a controller to the n-th target, exclusively.
    pub fn attach(
        &mut self,
        id: TargetId,
        controller: Box<dyn Controller>,
    ) -> Result<(), TargetError> {
        self.targets
            .get_mut(id)
            .ok_or(TargetError::NoSuchTarget)?
            .attach(controller)
    }

    pub fn detach(&mut self, id: TargetId) -> Result<(), TargetError> {
        self.targets
            .get_mut(id)
            .ok_or(TargetError::NoSuchTarget)?
            .detach();
        Ok(())
    }

    /// Detach and destroy every target, firing each bound controller's
    /// teardown notification first.
    pub fn free_all(&mut self) {
        for target in &mut self.targets {
            target.detach();
        }
        self.targets.clear();
        log::debug!("target list freed");
    }
}
