use std::collections::BTreeSet;

use crate::device::{BufferHandle, Device, ResidencySetHandle};
use crate::foundation::error::{FrameResult, LifeframeError};

/// Tracks which allocations must be resident for submitted work to run.
///
/// Membership grows at setup time. [`Self::commit`] makes the pending membership active on the
/// device; committing again after further [`Self::add_allocation`] calls amends the active set.
pub struct ResidencyRegistry {
    handle: ResidencySetHandle,
    pending: BTreeSet<BufferHandle>,
    committed: BTreeSet<BufferHandle>,
    commits: u32,
}

impl ResidencyRegistry {
    pub fn create<D: Device>(device: &D, label: &str) -> FrameResult<Self> {
        let handle = device.create_residency_set(label)?;
        Ok(Self {
            handle,
            pending: BTreeSet::new(),
            committed: BTreeSet::new(),
            commits: 0,
        })
    }

    pub fn handle(&self) -> ResidencySetHandle {
        self.handle
    }

    /// Register one allocation. Idempotent; takes effect on the next commit.
    pub fn add_allocation(&mut self, buffer: BufferHandle) {
        self.pending.insert(buffer);
    }

    pub fn add_allocations(&mut self, buffers: impl IntoIterator<Item = BufferHandle>) {
        self.pending.extend(buffers);
    }

    /// Registered but not yet committed.
    pub fn has_uncommitted(&self) -> bool {
        self.pending.len() != self.committed.len()
    }

    pub fn commits(&self) -> u32 {
        self.commits
    }

    pub fn is_resident(&self, buffer: BufferHandle) -> bool {
        self.committed.contains(&buffer)
    }

    pub fn committed(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.committed.iter().copied()
    }

    pub fn commit<D: Device>(&mut self, device: &D) -> FrameResult<()> {
        let members: Vec<BufferHandle> = self.pending.iter().copied().collect();
        device.commit_residency_set(self.handle, &members)?;
        self.committed.clone_from(&self.pending);
        self.commits += 1;
        tracing::debug!(
            set = %self.handle,
            members = members.len(),
            commit = self.commits,
            "residency set committed"
        );
        Ok(())
    }

    /// Fail unless every buffer is in the committed set.
    pub fn ensure_resident(
        &self,
        buffers: impl IntoIterator<Item = BufferHandle>,
    ) -> FrameResult<()> {
        for buffer in buffers {
            if !self.committed.contains(&buffer) {
                let hint = if self.pending.contains(&buffer) {
                    " (registered after the last commit)"
                } else {
                    ""
                };
                return Err(LifeframeError::precondition(format!(
                    "allocation {buffer} is not in the committed residency set{hint}"
                )));
            }
        }
        Ok(())
    }

    /// Only call once the device is idle.
    pub fn release<D: Device>(self, device: &D) {
        device.release_residency_set(self.handle);
    }
}

#[cfg(test)]
#[path = "../tests/unit/residency.rs"]
mod tests;
