use crate::desc::{CMPL_STAT_SIZE, RX_CMPL_SIZE, TX_DESC_SIZE, WB_STAT_SIZE};
use crate::ring::{Ring, Writeback};
use proptest::prelude::*;

#[test]
fn usable_capacity_follows_writeback_placement() {
    let plain = Ring::new(8, TX_DESC_SIZE, Writeback::None).unwrap();
    assert_eq!(plain.usable_capacity(), 8);
    assert!(plain.writeback().is_empty());

    let appended = Ring::new(
        8,
        TX_DESC_SIZE,
        Writeback::Appended {
            stat_size: WB_STAT_SIZE,
        },
    )
    .unwrap();
    assert_eq!(appended.usable_capacity(), 8);
    assert_eq!(appended.writeback().len(), WB_STAT_SIZE);

    let colocated = Ring::new(
        8,
        RX_CMPL_SIZE,
        Writeback::Colocated {
            stat_size: CMPL_STAT_SIZE,
        },
    )
    .unwrap();
    assert_eq!(colocated.usable_capacity(), 7);
    assert_eq!(colocated.writeback().len(), CMPL_STAT_SIZE);
}

#[test]
fn rejects_degenerate_capacity() {
    assert!(Ring::new(1, TX_DESC_SIZE, Writeback::None).is_err());
}

#[test]
fn writeback_memory_starts_zeroed() {
    let ring = Ring::new(
        16,
        RX_CMPL_SIZE,
        Writeback::Colocated {
            stat_size: CMPL_STAT_SIZE,
        },
    )
    .unwrap();
    assert!(ring.writeback().iter().all(|b| *b == 0));
    assert!(ring.entry(0).iter().all(|b| *b == 0));
}

proptest! {
    // Full is reported exactly when usable-1 entries are outstanding, never
    // earlier and never later, across arbitrary enqueue/reclaim interleavings.
    #[test]
    fn full_exactly_at_usable_minus_one(
        capacity in 2u16..32,
        ops in proptest::collection::vec(any::<bool>(), 0..300),
    ) {
        let mut ring = Ring::new(capacity, TX_DESC_SIZE, Writeback::None).unwrap();
        let usable = ring.usable_capacity();
        let mut outstanding = 0u16;
        for enqueue in ops {
            if enqueue {
                if !ring.is_full() {
                    ring.advance_head();
                    outstanding += 1;
                }
            } else if outstanding > 0 {
                ring.advance_tail();
                outstanding -= 1;
            }
            prop_assert!(ring.next_to_use < usable);
            prop_assert!(ring.next_to_clean < usable);
            prop_assert_eq!(ring.outstanding(), outstanding);
            prop_assert_eq!(ring.is_full(), outstanding == usable - 1);
        }
    }

    // Index arithmetic never leaves [0, usable) for any number of advances,
    // including across many wraps.
    #[test]
    fn indices_stay_in_range(capacity in 2u16..64, advances in 0u32..2000) {
        let mut ring = Ring::new(
            capacity,
            RX_CMPL_SIZE,
            Writeback::Colocated { stat_size: CMPL_STAT_SIZE },
        )
        .unwrap();
        for _ in 0..advances {
            ring.advance_head();
            prop_assert!(ring.next_to_use < ring.usable_capacity());
        }
        for _ in 0..advances {
            ring.advance_tail();
            prop_assert!(ring.next_to_clean < ring.usable_capacity());
        }
    }

    // One full traversal of the ring flips the color exactly once.
    #[test]
    fn color_flips_once_per_traversal(capacity in 3u16..64) {
        let mut ring = Ring::new(
            capacity,
            RX_CMPL_SIZE,
            Writeback::Colocated { stat_size: CMPL_STAT_SIZE },
        )
        .unwrap();
        ring.color = 1;
        let usable = ring.usable_capacity();
        for _lap in 0..4 {
            let before = ring.color;
            let mut flips = 0;
            for _ in 0..usable {
                if ring.advance_tail() {
                    ring.color ^= 1;
                    flips += 1;
                }
            }
            prop_assert_eq!(flips, 1);
            prop_assert_ne!(ring.color, before);
        }
    }
}
