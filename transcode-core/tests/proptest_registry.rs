//! Property-based tests for the slot pool and frame registry.
//!
//! Drives a registry with random operation sequences and checks the
//! ordering and ownership invariants after every step.

use proptest::prelude::*;
use std::collections::HashSet;
use transcode_core::{FrameRegistry, MediaKind, Retrieved, SlotState};

#[derive(Debug, Clone)]
enum Op {
    Register,
    Claim,
    Finish(usize),
    Skip(usize),
    Consume,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Register),
        2 => Just(Op::Claim),
        2 => (0usize..8).prop_map(Op::Finish),
        1 => (0usize..8).prop_map(Op::Skip),
        2 => Just(Op::Consume),
    ]
}

proptest! {
    /// Consumed ids are strictly increasing and never pass a locked frame.
    #[test]
    fn consumption_follows_registration(
        capacity in 1usize..8,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let mut reg = FrameRegistry::new(MediaKind::Video, capacity, 16);
        let mut next_id = 0u64;
        let mut locked = Vec::new();
        let mut consumed: Vec<u64> = Vec::new();

        for op in ops {
            match op {
                Op::Register => {
                    if let Some(slot) = reg.register(next_id).unwrap() {
                        reg.set_state(slot, SlotState::Wait).unwrap();
                        next_id += 1;
                    }
                }
                Op::Claim => {
                    if let Some(slot) = reg.claim(SlotState::Wait, SlotState::Locked).unwrap() {
                        locked.push(slot);
                    }
                }
                Op::Finish(i) if !locked.is_empty() => {
                    let slot = locked.remove(i % locked.len());
                    reg.set_state(slot, SlotState::Ready).unwrap();
                }
                Op::Skip(i) if !locked.is_empty() => {
                    let slot = locked.remove(i % locked.len());
                    reg.remove(slot).unwrap();
                }
                Op::Consume => {
                    if let Retrieved::Ready(slot) = reg.retrieve_ready().unwrap() {
                        let id = reg.frame(slot).unwrap().id();
                        for &l in &locked {
                            prop_assert!(reg.frame(l).unwrap().id() > id);
                        }
                        consumed.push(id);
                        reg.remove(slot).unwrap();
                    }
                }
                _ => {}
            }

            let ids = reg.frame_ids();
            prop_assert!(ids.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(reg.fill_level().fill, reg.len());
        }

        prop_assert!(consumed.windows(2).all(|w| w[0] < w[1]));
    }

    /// Outstanding acquisitions never share a slot.
    #[test]
    fn acquisitions_are_unique(
        capacity in 1usize..16,
        releases in prop::collection::vec(any::<bool>(), 1..64),
    ) {
        let mut reg = FrameRegistry::new(MediaKind::Audio, capacity, 8);
        let mut live = Vec::new();
        let mut next_id = 0u64;

        for release in releases {
            if release && !live.is_empty() {
                let slot = live.remove(0);
                reg.remove(slot).unwrap();
            } else if let Some(slot) = reg.register(next_id).unwrap() {
                next_id += 1;
                live.push(slot);
            }
            let indices: HashSet<usize> = live.iter().map(|s| s.index()).collect();
            prop_assert_eq!(indices.len(), live.len());
            prop_assert!(live.len() <= capacity);
        }
    }
}
