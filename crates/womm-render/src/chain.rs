// SPDX-License-Identifier: CEPL-1.0
//! Order of a presentable-chain rebuild, independent of the backend.
//!
//! The backend supplies the individual steps; [`rebuild_chain`] fixes the
//! order. The old chain handle must still be alive when the new one is
//! created, and attachments are released before new ones are allocated so
//! two generations never sit in the VRAM budget at once.

use anyhow::Result;

pub trait ChainSteps {
    type Handle: Copy + PartialEq;

    /// Free the attachments and image views of the current chain. The chain
    /// handle itself stays valid.
    fn release_attachments(&mut self);

    /// Create a chain, handing `old` to the driver for image reuse.
    fn create_chain(&mut self, old: Self::Handle) -> Result<Self::Handle>;

    fn destroy_chain(&mut self, handle: Self::Handle);

    /// Views and attachments for `handle`.
    fn create_attachments(&mut self, handle: Self::Handle) -> Result<()>;
}

// STRICT ORDER:
// 1) Release attachments + views (the chain handle stays alive)
// 2) Create the NEW chain passing the OLD handle
// 3) Destroy the OLD handle only after the new one exists
// 4) Views + attachments for the new chain
/// `current` is updated as soon as the new chain exists, so on an error in
/// step 4 it still names the one live chain.
pub fn rebuild_chain<S: ChainSteps>(steps: &mut S, current: &mut S::Handle) -> Result<()> {
    steps.release_attachments();

    let old = *current;
    let new = steps.create_chain(old)?;
    steps.destroy_chain(old);
    *current = new;

    steps.create_attachments(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vram::{MemoryLocality, VramBudget, VramTag};
    use crate::RenderSize;
    use anyhow::anyhow;

    fn depth_bytes(size: RenderSize) -> u64 {
        size.width as u64 * size.height as u64 * 4
    }

    /// Chain handles are plain ids; the depth attachment is charged to a
    /// real budget the way the device allocator does it.
    struct FakeChain {
        vram: VramBudget,
        extent: RenderSize,
        live_chains: Vec<u32>,
        next_id: u32,
        depth: Option<u64>,
        peak: u64,
        fail_create: bool,
    }

    impl FakeChain {
        fn new(budget: u64, extent: RenderSize) -> (Self, u32) {
            let mut fake = Self {
                vram: VramBudget::new(budget),
                extent,
                live_chains: vec![1],
                next_id: 2,
                depth: None,
                peak: 0,
                fail_create: false,
            };
            fake.create_attachments(1).unwrap();
            (fake, 1)
        }
    }

    impl ChainSteps for FakeChain {
        type Handle = u32;

        fn release_attachments(&mut self) {
            if let Some(bytes) = self.depth.take() {
                self.vram
                    .record_free(bytes, VramTag::DepthTarget, MemoryLocality::DeviceLocal);
            }
        }

        fn create_chain(&mut self, old: u32) -> Result<u32> {
            assert!(self.live_chains.contains(&old), "old chain {old} already destroyed");
            if self.fail_create {
                return Err(anyhow!("surface lost"));
            }
            let id = self.next_id;
            self.next_id += 1;
            self.live_chains.push(id);
            Ok(id)
        }

        fn destroy_chain(&mut self, handle: u32) {
            assert!(
                self.live_chains.len() >= 2,
                "destroying chain {handle} before its replacement exists"
            );
            self.live_chains.retain(|&c| c != handle);
        }

        fn create_attachments(&mut self, handle: u32) -> Result<()> {
            assert_eq!(self.live_chains, vec![handle]);
            let bytes = depth_bytes(self.extent);
            self.vram
                .reserve(bytes, VramTag::DepthTarget, MemoryLocality::DeviceLocal)?;
            self.depth = Some(bytes);
            self.peak = self.peak.max(self.vram.total_allocated());
            Ok(())
        }
    }

    #[test]
    fn resize_storm_keeps_one_generation_in_the_budget() {
        let small = RenderSize {
            width: 800,
            height: 600,
        };
        let large = RenderSize {
            width: 1920,
            height: 1080,
        };
        // Room for one large depth image and not much more: holding two
        // generations at once would overflow.
        let budget = depth_bytes(large) + depth_bytes(small) / 2;
        let (mut fake, mut current) = FakeChain::new(budget, small);

        for i in 0..100 {
            fake.extent = if i % 2 == 0 { large } else { small };
            rebuild_chain(&mut fake, &mut current).unwrap();

            assert_eq!(fake.live_chains, vec![current]);
            assert_eq!(fake.vram.total_allocated(), depth_bytes(fake.extent));
            assert_eq!(fake.vram.tag_count(VramTag::DepthTarget), 1);
        }

        assert_eq!(fake.extent, small);
        assert_eq!(fake.vram.total_allocated(), depth_bytes(small));
        assert_eq!(fake.peak, depth_bytes(large));
        assert!(fake.peak <= fake.vram.budget());
    }

    #[test]
    fn failed_create_keeps_the_old_chain() {
        let size = RenderSize {
            width: 640,
            height: 480,
        };
        let (mut fake, mut current) = FakeChain::new(u64::MAX, size);
        fake.fail_create = true;

        assert!(rebuild_chain(&mut fake, &mut current).is_err());
        assert_eq!(current, 1);
        assert_eq!(fake.live_chains, vec![1]);
        assert_eq!(fake.vram.total_allocated(), 0);
    }

    #[test]
    fn attachment_failure_still_reports_the_new_chain() {
        let small = RenderSize {
            width: 64,
            height: 64,
        };
        let (mut fake, mut current) = FakeChain::new(depth_bytes(small), small);
        fake.extent = RenderSize {
            width: 128,
            height: 128,
        };

        let err = rebuild_chain(&mut fake, &mut current).unwrap_err();
        assert!(err.to_string().contains("VRAM budget exceeded"));
        assert_eq!(current, 2);
        assert_eq!(fake.live_chains, vec![2]);
        assert_eq!(fake.vram.total_allocated(), 0);
    }
}
