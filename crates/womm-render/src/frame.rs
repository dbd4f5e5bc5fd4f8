// SPDX-License-Identifier: CEPL-1.0
//! CPU-side bookkeeping for frames in flight.
//!
//! The backend owns the actual fences and semaphores; [`FrameRing`] tracks
//! which slot may be recorded and which slot last touched each swapchain
//! image, and refuses any transition that would re-record a slot whose
//! previous submission has not been observed as finished.

use thiserror::Error;

pub const FRAME_FLIGHT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame slot {slot} is {state:?}, expected {expected:?}")]
    BadState {
        slot: usize,
        state: SlotState,
        expected: SlotState,
    },
    #[error("swapchain image {image} out of range ({count} images)")]
    ImageOutOfRange { image: usize, count: usize },
}

#[derive(Debug, Clone)]
pub struct FrameRing {
    frame_idx: usize,
    slots: [SlotState; FRAME_FLIGHT],
    image_owner: Vec<Option<usize>>,
}

impl FrameRing {
    pub fn new(image_count: usize) -> Self {
        Self {
            frame_idx: 0,
            slots: [SlotState::Idle; FRAME_FLIGHT],
            image_owner: vec![None; image_count],
        }
    }

    pub fn frame_idx(&self) -> usize {
        self.frame_idx
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    pub fn image_count(&self) -> usize {
        self.image_owner.len()
    }

    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.image_owner.get(image).copied().flatten()
    }

    /// The fence of `slot` has been waited on and is signaled.
    pub fn fence_signaled(&mut self, slot: usize) -> Result<(), FrameError> {
        match self.slots[slot] {
            SlotState::Submitted | SlotState::Idle => {
                self.slots[slot] = SlotState::Idle;
                Ok(())
            }
            state @ SlotState::Recording => Err(FrameError::BadState {
                slot,
                state,
                expected: SlotState::Submitted,
            }),
        }
    }

    /// Hand `image` to the current slot. Returns the other slot that last
    /// used the image, whose fence must be waited on before recording.
    pub fn claim_image(&mut self, image: usize) -> Result<Option<usize>, FrameError> {
        let count = self.image_owner.len();
        let owner = self
            .image_owner
            .get_mut(image)
            .ok_or(FrameError::ImageOutOfRange { image, count })?;
        let prev = owner.replace(self.frame_idx);
        Ok(prev.filter(|&p| p != self.frame_idx))
    }

    pub fn begin_recording(&mut self) -> Result<usize, FrameError> {
        let slot = self.frame_idx;
        self.expect(slot, SlotState::Idle)?;
        self.slots[slot] = SlotState::Recording;
        Ok(slot)
    }

    pub fn mark_submitted(&mut self) -> Result<(), FrameError> {
        let slot = self.frame_idx;
        self.expect(slot, SlotState::Recording)?;
        self.slots[slot] = SlotState::Submitted;
        Ok(())
    }

    /// Recording failed before submit. The slot goes back to idle; its
    /// fence was never reset, so nothing will ever need to wait on it.
    pub fn abort_recording(&mut self) -> Result<usize, FrameError> {
        let slot = self.frame_idx;
        self.expect(slot, SlotState::Recording)?;
        self.slots[slot] = SlotState::Idle;
        Ok(slot)
    }

    /// Rotate to the next slot. Runs after every attempted present,
    /// whatever its outcome.
    pub fn advance(&mut self) -> usize {
        self.frame_idx = (self.frame_idx + 1) % FRAME_FLIGHT;
        self.frame_idx
    }

    /// The device went idle: every submission has finished.
    pub fn all_signaled(&mut self) {
        for slot in &mut self.slots {
            if *slot == SlotState::Submitted {
                *slot = SlotState::Idle;
            }
        }
    }

    /// New swapchain images carry no history.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }

    fn expect(&self, slot: usize, expected: SlotState) -> Result<(), FrameError> {
        let state = self.slots[slot];
        if state == expected {
            Ok(())
        } else {
            Err(FrameError::BadState {
                slot,
                state,
                expected,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn slot_cannot_be_rerecorded_before_its_fence() {
        let mut ring = FrameRing::new(3);
        for _ in 0..FRAME_FLIGHT {
            ring.begin_recording().unwrap();
            ring.mark_submitted().unwrap();
            ring.advance();
        }
        assert_eq!(ring.frame_idx(), 0);
        assert_eq!(
            ring.begin_recording(),
            Err(FrameError::BadState {
                slot: 0,
                state: SlotState::Submitted,
                expected: SlotState::Idle
            })
        );
        ring.fence_signaled(0).unwrap();
        assert_eq!(ring.begin_recording(), Ok(0));
    }

    #[test]
    fn claim_reports_previous_owner_only_when_different() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.claim_image(1), Ok(None));
        ring.advance();
        assert_eq!(ring.claim_image(1), Ok(Some(0)));
        assert_eq!(ring.claim_image(1), Ok(None));
        assert_eq!(ring.image_owner(1), Some(1));
        assert_eq!(
            ring.claim_image(5),
            Err(FrameError::ImageOutOfRange { image: 5, count: 2 })
        );
    }

    #[test]
    fn failed_recording_returns_slot_to_idle() {
        let mut ring = FrameRing::new(2);
        ring.claim_image(0).unwrap();
        assert_eq!(ring.begin_recording(), Ok(0));
        assert_eq!(ring.abort_recording(), Ok(0));
        assert_eq!(ring.state(0), SlotState::Idle);

        // No submission is pending, so a shutdown drain has nothing to wait on
        // and the same slot can record again on the next attempt.
        ring.all_signaled();
        assert_eq!(ring.state(0), SlotState::Idle);
        assert_eq!(ring.begin_recording(), Ok(0));
        ring.mark_submitted().unwrap();
        assert_eq!(
            ring.abort_recording(),
            Err(FrameError::BadState {
                slot: 0,
                state: SlotState::Submitted,
                expected: SlotState::Recording
            })
        );
    }

    #[test]
    fn advance_wraps_even_without_submit() {
        let mut ring = FrameRing::new(2);
        let seen: Vec<usize> = (0..7).map(|_| ring.advance()).collect();
        assert_eq!(seen, vec![1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn reset_images_forgets_owners() {
        let mut ring = FrameRing::new(2);
        ring.claim_image(0).unwrap();
        ring.reset_images(4);
        assert_eq!(ring.image_count(), 4);
        assert!((0..4).all(|i| ring.image_owner(i).is_none()));
    }

    /// Fake GPU: submissions finish in order, and a CPU wait on a slot's
    /// fence drains the queue up to that slot.
    struct Gpu {
        queue: VecDeque<usize>,
    }

    impl Gpu {
        fn finish_one(&mut self, ring: &mut FrameRing, signals: &mut [u32]) {
            if let Some(slot) = self.queue.pop_front() {
                ring.fence_signaled(slot).unwrap();
                signals[slot] = 0;
            }
        }

        /// False when the slot claims to be submitted but nothing queued
        /// will ever signal its fence.
        fn wait(&mut self, slot: usize, ring: &mut FrameRing, signals: &mut [u32]) -> bool {
            while ring.state(slot) == SlotState::Submitted {
                if self.queue.is_empty() {
                    return false;
                }
                self.finish_one(ring, signals);
            }
            true
        }
    }

    proptest! {
        #[test]
        fn each_slot_records_at_most_once_per_fence_signal(
            steps in proptest::collection::vec((any::<bool>(), 0usize..4, 0u8..8), 1..300),
            image_count in 2usize..5,
        ) {
            let mut ring = FrameRing::new(image_count);
            let mut gpu = Gpu { queue: VecDeque::new() };
            // Records since the slot's fence last signaled.
            let mut records = [0u32; FRAME_FLIGHT];

            for (gpu_tick, image, fail_roll) in steps {
                if gpu_tick {
                    gpu.finish_one(&mut ring, &mut records);
                }
                let image = image % image_count;
                let slot = ring.frame_idx();

                prop_assert!(gpu.wait(slot, &mut ring, &mut records));
                ring.fence_signaled(slot).unwrap();

                if let Some(prev) = ring.claim_image(image).unwrap() {
                    prop_assert!(gpu.wait(prev, &mut ring, &mut records));
                    prop_assert_ne!(ring.state(prev), SlotState::Submitted);
                }

                prop_assert_eq!(ring.begin_recording().unwrap(), slot);
                // Command recording fails now and then; nothing is submitted.
                if fail_roll == 0 {
                    prop_assert_eq!(ring.abort_recording().unwrap(), slot);
                    continue;
                }
                records[slot] += 1;
                prop_assert!(records[slot] <= 1);
                ring.mark_submitted().unwrap();
                gpu.queue.push_back(slot);

                ring.advance();
            }
        }
    }
}
