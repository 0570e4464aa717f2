//! Mirror of the device's bindable state used to skip redundant device calls.
//!
//! Every bind and state change goes through [`DeviceStateCache`]: each method
//! updates the mirror and returns whether the device call must actually be
//! issued. The [`GpuContext`](crate::GpuContext) is the only caller, which keeps
//! the mirror equal to the real device state between operations.

use std::fmt::{Display, Formatter};

use crate::handle::{ProgramId, Resource, TextureId};
use crate::state::{DeviceState, StateChange, TargetBinding};
use crate::types::{BindMode, TextureShape};

/// Counts of bind/set requests that reached the device versus the ones filtered out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Requests forwarded to the device.
    pub issued: u64,
    /// Requests dropped because the device already had that state.
    pub skipped: u64,
}

impl CacheStatistics {
    pub fn total(&self) -> u64 {
        self.issued + self.skipped
    }
}

impl Display for CacheStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "State changes: {} issued, {} skipped",
            self.issued, self.skipped
        )
    }
}

impl std::ops::AddAssign for CacheStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.issued += rhs.issued;
        self.skipped += rhs.skipped;
    }
}

#[derive(Debug, Default)]
pub struct DeviceStateCache {
    state: DeviceState,
    statistics: CacheStatistics,
}

impl DeviceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mirrored state.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics = CacheStatistics::default();
    }

    fn record(&mut self, changed: bool) -> bool {
        if changed {
            self.statistics.issued += 1;
        } else {
            self.statistics.skipped += 1;
        }
        changed
    }

    /// Bind `texture` to `slot` for `shape` sampling.
    pub fn bind_texture(&mut self, slot: usize, shape: TextureShape, texture: TextureId) -> bool {
        let entry = &mut self.state.textures[slot][shape.index()];
        let changed = *entry != texture;
        *entry = texture;
        self.record(changed)
    }

    pub fn bind_target(&mut self, binding: TargetBinding) -> bool {
        let current = match binding.mode {
            BindMode::Read => self.state.read_target,
            BindMode::Write | BindMode::SrgbWrite => self.state.write_target,
        };
        let changed = current != binding;
        self.state.apply_target(binding);
        self.record(changed)
    }

    pub fn use_program(&mut self, program: ProgramId) -> bool {
        let changed = self.state.program != program;
        self.state.program = program;
        self.record(changed)
    }

    pub fn set(&mut self, change: StateChange) -> bool {
        let changed = !self.state.matches(change);
        self.state.apply(change);
        self.record(changed)
    }

    /// Purge every reference to a deleted resource.
    ///
    /// Zeroed entries force the next bind of a reused handle value to reach
    /// the device.
    pub fn notify_deleted(&mut self, resource: Resource) {
        match resource {
            Resource::Texture(id) => {
                for slot in self.state.textures.iter_mut() {
                    for entry in slot.iter_mut() {
                        if *entry == id {
                            *entry = TextureId::NONE;
                        }
                    }
                }
            }
            Resource::Target(id) => {
                if self.state.write_target.target == id {
                    self.state.write_target = TargetBinding::DEFAULT;
                }
                if self.state.read_target.target == id {
                    self.state.read_target = TargetBinding {
                        mode: BindMode::Read,
                        ..TargetBinding::DEFAULT
                    };
                }
            }
            Resource::Program(id) => {
                if self.state.program == id {
                    self.state.program = ProgramId::NONE;
                }
            }
            Resource::Mesh(_) => {}
        }
    }
}
