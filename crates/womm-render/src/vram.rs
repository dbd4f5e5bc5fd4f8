// SPDX-License-Identifier: CEPL-1.0
//! VRAM accounting. Every GPU allocation is checked against a fixed ceiling
//! before the driver is asked for memory, and every free reverses the exact
//! buckets its allocation touched.

use std::fmt::Write as _;
use thiserror::Error;
use womm_core::units::{scale_bytes, GIB, MIB};

pub const VRAM_BUDGET: u64 = GIB;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VramTag {
    Unknown,
    /// Base color, normal, roughness/metallic maps.
    Texture,
    TextureHdr,
    /// UI atlas, fonts.
    TextureUi,
    BufferVertex,
    BufferIndex,
    /// Per-frame and per-object uniform data.
    BufferUniform,
    BufferStaging,
    BufferCompute,
    /// Color attachments.
    RenderTarget,
    /// Depth/stencil attachments.
    DepthTarget,
}

impl VramTag {
    pub const COUNT: usize = 11;
    pub const ALL: [VramTag; Self::COUNT] = [
        VramTag::Unknown,
        VramTag::Texture,
        VramTag::TextureHdr,
        VramTag::TextureUi,
        VramTag::BufferVertex,
        VramTag::BufferIndex,
        VramTag::BufferUniform,
        VramTag::BufferStaging,
        VramTag::BufferCompute,
        VramTag::RenderTarget,
        VramTag::DepthTarget,
    ];

    pub fn label(self) -> &'static str {
        match self {
            VramTag::Unknown => "RDR_TAG_UNKNOWN",
            VramTag::Texture => "RDR_TAG_TEXTURE",
            VramTag::TextureHdr => "RDR_TAG_TEXTURE_HDR",
            VramTag::TextureUi => "RDR_TAG_TEXTURE_UI",
            VramTag::BufferVertex => "RDR_TAG_BUFFER_VERTEX",
            VramTag::BufferIndex => "RDR_TAG_BUFFER_INDEX",
            VramTag::BufferUniform => "RDR_TAG_BUFFER_UNIFORM",
            VramTag::BufferStaging => "RDR_TAG_BUFFER_STAGING",
            VramTag::BufferCompute => "RDR_TAG_BUFFER_COMPUTE",
            VramTag::RenderTarget => "RDR_TAG_RENDER_TARGET",
            VramTag::DepthTarget => "RDR_TAG_DEPTH_TARGET",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocality {
    DeviceLocal,
    HostVisible,
    /// Neither device-local nor host-visible; counted only in the totals.
    Other,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VramError {
    #[error("VRAM budget exceeded: requested {requested} bytes with {used} of {budget} in use")]
    BudgetExceeded { requested: u64, used: u64, budget: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VramBudget {
    total_allocated: u64,
    budget: u64,
    device_local_used: u64,
    host_visible_used: u64,
    tag_count: [u64; VramTag::COUNT],
    tag_bytes: [u64; VramTag::COUNT],
}

impl Default for VramBudget {
    fn default() -> Self {
        Self::new(VRAM_BUDGET)
    }
}

impl VramBudget {
    pub fn new(budget: u64) -> Self {
        Self {
            total_allocated: 0,
            budget,
            device_local_used: 0,
            host_visible_used: 0,
            tag_count: [0; VramTag::COUNT],
            tag_bytes: [0; VramTag::COUNT],
        }
    }

    /// Would `size` more bytes still fit under the ceiling?
    pub fn check(&self, size: u64) -> Result<(), VramError> {
        match self.total_allocated.checked_add(size) {
            Some(after) if after <= self.budget => Ok(()),
            _ => Err(VramError::BudgetExceeded {
                requested: size,
                used: self.total_allocated,
                budget: self.budget,
            }),
        }
    }

    /// Record an allocation the driver has already granted. Callers go
    /// through [`check`](Self::check) first.
    pub fn record_alloc(&mut self, size: u64, tag: VramTag, locality: MemoryLocality) {
        let i = tag.index();
        self.total_allocated += size;
        self.tag_count[i] += 1;
        self.tag_bytes[i] += size;
        match locality {
            MemoryLocality::DeviceLocal => self.device_local_used += size,
            MemoryLocality::HostVisible => self.host_visible_used += size,
            MemoryLocality::Other => {}
        }
    }

    pub fn reserve(
        &mut self,
        size: u64,
        tag: VramTag,
        locality: MemoryLocality,
    ) -> Result<(), VramError> {
        self.check(size)?;
        self.record_alloc(size, tag, locality);
        Ok(())
    }

    /// Reverse one allocation. A free that does not match a live allocation
    /// under the same tag and locality is a bug in the caller and panics.
    pub fn record_free(&mut self, size: u64, tag: VramTag, locality: MemoryLocality) {
        let i = tag.index();
        assert!(
            self.tag_count[i] > 0 && self.tag_bytes[i] >= size,
            "mismatched VRAM free: {size} bytes under {} ({} live allocations, {} bytes)",
            tag.label(),
            self.tag_count[i],
            self.tag_bytes[i],
        );
        let locality_used = match locality {
            MemoryLocality::DeviceLocal => Some(&mut self.device_local_used),
            MemoryLocality::HostVisible => Some(&mut self.host_visible_used),
            MemoryLocality::Other => None,
        };
        if let Some(used) = locality_used {
            assert!(*used >= size, "mismatched VRAM free: locality {locality:?} underflow");
            *used -= size;
        }
        self.tag_count[i] -= 1;
        self.tag_bytes[i] -= size;
        self.total_allocated -= size;
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn device_local_used(&self) -> u64 {
        self.device_local_used
    }

    pub fn host_visible_used(&self) -> u64 {
        self.host_visible_used
    }

    pub fn tag_count(&self, tag: VramTag) -> u64 {
        self.tag_count[tag.index()]
    }

    pub fn tag_bytes(&self, tag: VramTag) -> u64 {
        self.tag_bytes[tag.index()]
    }

    pub fn status_report(&self) -> String {
        let mut out = String::new();
        let (dl, dl_unit) = scale_bytes(self.device_local_used);
        let (hv, hv_unit) = scale_bytes(self.host_visible_used);
        let _ = writeln!(
            out,
            "Engine VRAM Used: {:.2} MiB / {:.2} MiB (device-local {dl:.2}{dl_unit}, host-visible {hv:.2}{hv_unit})",
            self.total_allocated as f64 / MIB as f64,
            self.budget as f64 / MIB as f64
        );

        for tag in VramTag::ALL {
            let count = self.tag_count(tag);
            if count == 0 {
                continue;
            }
            let (amount, unit) = scale_bytes(self.tag_bytes(tag));
            let _ = writeln!(out, "--> {}: [{count}] {amount:.2}{unit}", tag.label());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reserve_updates_tag_and_locality() {
        let mut vram = VramBudget::default();
        vram.reserve(4096, VramTag::BufferVertex, MemoryLocality::DeviceLocal)
            .unwrap();
        vram.reserve(256, VramTag::BufferUniform, MemoryLocality::HostVisible)
            .unwrap();

        assert_eq!(vram.total_allocated(), 4352);
        assert_eq!(vram.device_local_used(), 4096);
        assert_eq!(vram.host_visible_used(), 256);
        assert_eq!(vram.tag_count(VramTag::BufferVertex), 1);
        assert_eq!(vram.tag_bytes(VramTag::BufferUniform), 256);
    }

    #[test]
    fn over_budget_fails_without_touching_counters() {
        let mut vram = VramBudget::new(1000);
        vram.reserve(600, VramTag::Texture, MemoryLocality::DeviceLocal)
            .unwrap();
        let before = vram.clone();

        let err = vram
            .reserve(401, VramTag::Texture, MemoryLocality::DeviceLocal)
            .unwrap_err();
        assert_eq!(
            err,
            VramError::BudgetExceeded {
                requested: 401,
                used: 600,
                budget: 1000
            }
        );
        assert_eq!(vram, before);

        // Exactly at the ceiling is allowed.
        vram.reserve(400, VramTag::Texture, MemoryLocality::DeviceLocal)
            .unwrap();
        assert_eq!(vram.total_allocated(), 1000);
    }

    #[test]
    fn free_reverses_alloc() {
        let mut vram = VramBudget::default();
        vram.reserve(64, VramTag::BufferStaging, MemoryLocality::HostVisible)
            .unwrap();
        vram.record_free(64, VramTag::BufferStaging, MemoryLocality::HostVisible);
        assert_eq!(vram, VramBudget::default());
    }

    #[test]
    #[should_panic(expected = "mismatched VRAM free")]
    fn free_under_wrong_tag_panics() {
        let mut vram = VramBudget::default();
        vram.reserve(64, VramTag::BufferIndex, MemoryLocality::DeviceLocal)
            .unwrap();
        vram.record_free(64, VramTag::BufferVertex, MemoryLocality::DeviceLocal);
    }

    #[test]
    fn status_report_lists_live_tags_in_scaled_units() {
        let mut vram = VramBudget::default();
        vram.reserve(8 * MIB, VramTag::RenderTarget, MemoryLocality::DeviceLocal)
            .unwrap();
        vram.reserve(1536, VramTag::BufferUniform, MemoryLocality::HostVisible)
            .unwrap();
        vram.reserve(12, VramTag::BufferUniform, MemoryLocality::HostVisible)
            .unwrap();

        let report = vram.status_report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(
            lines[0],
            "Engine VRAM Used: 8.00 MiB / 1024.00 MiB (device-local 8.00MiB, host-visible 1.51KiB)"
        );
        // One header, then exactly one line per live tag.
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"--> RDR_TAG_BUFFER_UNIFORM: [2] 1.51KiB"));
        assert!(lines.contains(&"--> RDR_TAG_RENDER_TARGET: [1] 8.00MiB"));
        assert!(!report.contains("RDR_TAG_TEXTURE"));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Alloc(u64, usize, bool),
        Free(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..400, 0..VramTag::COUNT, any::<bool>()).prop_map(|(s, t, d)| Op::Alloc(s, t, d)),
            any::<usize>().prop_map(Op::Free),
        ]
    }

    proptest! {
        #[test]
        fn total_matches_live_allocations(ops in proptest::collection::vec(op(), 1..200)) {
            let mut vram = VramBudget::new(2048);
            let mut live: Vec<(u64, VramTag, MemoryLocality)> = Vec::new();

            for op in ops {
                match op {
                    Op::Alloc(size, tag, device) => {
                        let tag = VramTag::ALL[tag];
                        let loc = if device { MemoryLocality::DeviceLocal } else { MemoryLocality::HostVisible };
                        let before = vram.clone();
                        match vram.reserve(size, tag, loc) {
                            Ok(()) => live.push((size, tag, loc)),
                            Err(VramError::BudgetExceeded { .. }) => {
                                prop_assert!(before.total_allocated() + size > before.budget());
                                prop_assert_eq!(&vram, &before);
                            }
                        }
                    }
                    Op::Free(pick) => {
                        if !live.is_empty() {
                            let (size, tag, loc) = live.swap_remove(pick % live.len());
                            vram.record_free(size, tag, loc);
                        }
                    }
                }

                let sum: u64 = live.iter().map(|a| a.0).sum();
                prop_assert_eq!(vram.total_allocated(), sum);
                prop_assert!(vram.total_allocated() <= vram.budget());
                prop_assert_eq!(vram.device_local_used() + vram.host_visible_used(), sum);
                for tag in VramTag::ALL {
                    let n = live.iter().filter(|a| a.1 == tag).count() as u64;
                    prop_assert_eq!(vram.tag_count(tag), n);
                }
            }
        }
    }
}
