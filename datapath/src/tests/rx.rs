use crate::counters::Counters;
use crate::filter::{FilterProgram, Verdict, DEFAULT_HEADROOM};
use crate::rx::RxQueue;
use crate::stack::{NullStack, RedirectTarget};
use crate::tests::fake::{
    CollectRedirect, CollectStack, FakeHardware, RawProgram, StaticProgram,
};
use crate::tests::init_logging;
use crate::tx::TxQueue;
use std::sync::{Arc, Mutex};

const BUF_SIZE: usize = 4096;

fn static_program(verdict: Verdict) -> Option<Arc<dyn FilterProgram>> {
    let program: Arc<dyn FilterProgram> = Arc::new(StaticProgram(verdict));
    Some(program)
}

fn rx_queue(
    hw: &Arc<FakeHardware>,
    depth: u16,
    cmpl_depth: u16,
    program: Option<Arc<dyn FilterProgram>>,
) -> (RxQueue, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let q = RxQueue::new(
        0,
        depth,
        cmpl_depth,
        BUF_SIZE,
        DEFAULT_HEADROOM,
        0,
        program,
        hw.clone(),
        counters.clone(),
    )
    .unwrap();
    (q, counters)
}

#[test]
fn init_arms_descriptors_and_publishes_indices() {
    let hw = FakeHardware::new();
    let (q, _) = rx_queue(&hw, 1024, 1024, None);
    assert_eq!(q.armed(), 256);
    assert_eq!(hw.rx_head_writes(0), vec![256]);
    assert_eq!(hw.cmpl_tail_writes(0), vec![(0, true)]);
    assert_eq!(q.expected_color(), 1);
}

#[test]
fn pass_delivers_a_copy_and_recycles_the_page() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, None);
    let stack = CollectStack::default();

    let payload: Vec<u8> = (0..100).map(|i| i as u8).collect();
    assert!(hw.push_rx(0, &payload, false));
    let result = q.poll(64, None, &stack, None);
    assert_eq!(result.work, 1);
    assert!(!result.rescheduled);

    let delivered = stack.packets.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, 0);
    assert_eq!(delivered[0].1, payload);

    let snap = counters.snapshot();
    assert_eq!(snap.passed, 1);
    assert_eq!(snap.rx_packets, 1);
    assert_eq!(snap.rx_bytes, 100);

    // The page went back to the pool; only armed slots stay lent.
    let pool = q.pool().lock().unwrap();
    let (free, hardware, host, redirect) = pool.counts();
    assert_eq!(hardware, q.armed() as usize);
    assert_eq!((host, redirect), (0, 0));
    assert_eq!(free + hardware, pool.capacity() as usize);
}

#[test]
fn drop_program_recycles_every_page() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, static_program(Verdict::Drop));

    const K: usize = 10;
    for _ in 0..K {
        assert!(hw.push_rx(0, &[0x42; 80], false));
    }
    let result = q.poll(64, None, &NullStack, None);
    assert_eq!(result.work, K as u32);

    let snap = counters.snapshot();
    assert_eq!(snap.dropped, K as u64);
    assert_eq!(snap.passed, 0);

    let pool = q.pool().lock().unwrap();
    let (free, hardware, host, redirect) = pool.counts();
    assert_eq!((host, redirect), (0, 0));
    assert_eq!(hardware, q.armed() as usize);
    assert_eq!(free, pool.capacity() as usize - q.armed() as usize);
}

#[test]
fn error_flag_consumes_and_clears_latch_once() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, None);
    let stack = CollectStack::default();

    assert!(hw.push_rx(0, &[0xee; 64], true));
    let result = q.poll(64, None, &stack, None);

    // Consumed, not delivered; error latch cleared exactly once.
    assert_eq!(result.work, 1);
    assert_eq!(hw.error_clears(), 1);
    assert_eq!(counters.snapshot().passed, 0);
    assert_eq!(stack.count(), 0);

    // Processing continues normally afterwards.
    assert!(hw.push_rx(0, &[0x11; 64], false));
    assert_eq!(q.poll(64, None, &stack, None).work, 1);
    assert_eq!(counters.snapshot().passed, 1);
    assert_eq!(hw.error_clears(), 1);
}

#[test]
fn budget_bounds_work_and_defers_tail_publish() {
    let hw = FakeHardware::new();
    let (mut q, _) = rx_queue(&hw, 1024, 1024, static_program(Verdict::Drop));

    for _ in 0..10 {
        assert!(hw.push_rx(0, &[0; 64], false));
    }
    let tails_before = hw.cmpl_tail_writes(0).len();

    let first = q.poll(4, None, &NullStack, None);
    assert_eq!(first.work, 4);
    assert!(first.rescheduled);
    // Out of budget mid-batch: nothing republished to hardware.
    assert_eq!(hw.cmpl_tail_writes(0).len(), tails_before);

    let second = q.poll(64, None, &NullStack, None);
    assert_eq!(second.work, 6);
    assert!(!second.rescheduled);
    let tails = hw.cmpl_tail_writes(0);
    assert_eq!(tails.len(), tails_before + 1);
    assert_eq!(tails.last(), Some(&(10, true)));
}

#[test]
fn expected_color_tracks_device_across_wraps() {
    init_logging();
    let hw = FakeHardware::new();
    // Completion ring of usable capacity 7 wraps quickly.
    let (mut q, counters) = rx_queue(&hw, 16, 8, static_program(Verdict::Drop));

    for _round in 0..6 {
        for _ in 0..3 {
            assert!(hw.push_rx(0, &[0x33; 64], false));
        }
        let result = q.poll(64, None, &NullStack, None);
        assert_eq!(result.work, 3);
        // Once drained, the software expectation matches the color the
        // device will write next — through every wrap.
        assert_eq!(q.expected_color(), hw.rx_color(0));
    }
    assert_eq!(counters.snapshot().dropped, 18);
}

#[test]
fn watermark_triggers_exactly_one_step_refill() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, _) = rx_queue(&hw, 1024, 1024, None);
    assert_eq!(hw.rx_head_writes(0), vec![256]);

    for _ in 0..150 {
        assert!(hw.push_rx(0, &[0x77; 64], false));
    }
    let result = q.poll(512, None, &NullStack, None);
    assert_eq!(result.work, 150);

    // Armed slots fell under half a refill step after 129 consumptions; one
    // full-step refill republished the head, and only one.
    assert_eq!(hw.rx_head_writes(0), vec![256, 512]);
    assert_eq!(q.armed(), 256 + 256 - 150);
}

#[test]
fn retransmit_out_is_zero_copy_onto_same_queue_id() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, static_program(Verdict::RetransmitOut));
    let tx = Mutex::new(TxQueue::new(0, 8, 0, hw.clone(), counters.clone()).unwrap());

    for _ in 0..2 {
        assert!(hw.push_rx(0, &[0x55; 90], false));
    }
    let result = q.poll(64, Some(&tx), &NullStack, None);
    assert_eq!(result.work, 2);

    let snap = counters.snapshot();
    assert_eq!(snap.retransmitted, 2);
    assert_eq!(snap.retransmit_dropped, 0);
    assert_eq!(snap.tx_packets, 2);
    {
        let guard = tx.lock().unwrap();
        assert_eq!(guard.outstanding(), 2);
        let (_, _, _, redirect) = q.pool().lock().unwrap().counts();
        assert_eq!(redirect, 2);
    }

    // Device sends the frames; reclaim returns the pages to the pool.
    hw.complete_tx(0, 2);
    assert_eq!(tx.lock().unwrap().reclaim(), 2);
    let (_, _, _, redirect) = q.pool().lock().unwrap().counts();
    assert_eq!(redirect, 0);
}

#[test]
fn retransmit_backpressure_degrades_to_counted_drop() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, static_program(Verdict::RetransmitOut));
    // Transmit ring of usable capacity 2 holds a single in-flight frame.
    let tx = Mutex::new(TxQueue::new(0, 2, 0, hw.clone(), counters.clone()).unwrap());

    for _ in 0..3 {
        assert!(hw.push_rx(0, &[0x66; 70], false));
    }
    let result = q.poll(64, Some(&tx), &NullStack, None);
    assert_eq!(result.work, 3);

    let snap = counters.snapshot();
    assert_eq!(snap.retransmitted, 1);
    assert_eq!(snap.retransmit_dropped, 2);

    // Only the in-flight frame still holds its page.
    let (_, _, _, redirect) = q.pool().lock().unwrap().counts();
    assert_eq!(redirect, 1);
}

#[test]
fn missing_tx_queue_degrades_to_counted_drop() {
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, static_program(Verdict::RetransmitOut));
    assert!(hw.push_rx(0, &[0x11; 64], false));
    q.poll(64, None, &NullStack, None);
    assert_eq!(counters.snapshot().retransmit_dropped, 1);
    let (_, _, _, redirect) = q.pool().lock().unwrap().counts();
    assert_eq!(redirect, 0);
}

#[test]
fn redirect_hands_frame_to_target_and_recycles() {
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, static_program(Verdict::Redirect));
    let target = CollectRedirect::default();

    let payload = vec![0x99; 120];
    assert!(hw.push_rx(0, &payload, false));
    q.poll(64, None, &NullStack, Some(&target as &dyn RedirectTarget));

    assert_eq!(counters.snapshot().redirected, 1);
    let frames = target.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].1, payload);

    let (_, _, host, redirect) = q.pool().lock().unwrap().counts();
    assert_eq!((host, redirect), (0, 0));
}

#[test]
fn redirect_without_target_still_counts_and_recycles() {
    let hw = FakeHardware::new();
    let (mut q, counters) = rx_queue(&hw, 1024, 1024, static_program(Verdict::Redirect));
    assert!(hw.push_rx(0, &[0x44; 64], false));
    q.poll(64, None, &NullStack, None);
    assert_eq!(counters.snapshot().redirected, 1);
    let (_, _, host, redirect) = q.pool().lock().unwrap().counts();
    assert_eq!((host, redirect), (0, 0));
}

#[test]
fn out_of_range_raw_action_is_dropped() {
    let hw = FakeHardware::new();
    let program: Arc<dyn FilterProgram> = Arc::new(RawProgram(7));
    let counters = Arc::new(Counters::default());
    let mut q = RxQueue::new(
        0,
        1024,
        1024,
        BUF_SIZE,
        DEFAULT_HEADROOM,
        0,
        Some(program),
        hw.clone(),
        counters.clone(),
    )
    .unwrap();
    assert!(hw.push_rx(0, &[0x12; 64], false));
    q.poll(64, None, &NullStack, None);
    let snap = counters.snapshot();
    assert_eq!(snap.dropped, 1);
    assert_eq!(snap.passed, 0);
}

#[test]
fn pool_pressure_skips_refill() {
    init_logging();
    let hw = FakeHardware::new();
    let (mut q, _) = rx_queue(&hw, 512, 512, None);

    // Drain the free list so a full refill step cannot be armed.
    let drained: Vec<_> = {
        let mut pool = q.pool().lock().unwrap();
        std::iter::from_fn(|| pool.acquire()).collect()
    };

    for _ in 0..130 {
        assert!(hw.push_rx(0, &[0x21; 64], false));
    }
    q.poll(512, None, &NullStack, None);
    // The watermark fired but the pool could not cover a step; no new head.
    assert_eq!(hw.rx_head_writes(0), vec![256]);

    let mut pool = q.pool().lock().unwrap();
    for id in drained {
        pool.recycle(id);
    }
}

#[test]
fn teardown_releases_pages_and_mappings() {
    let hw = FakeHardware::new();
    let (mut q, _) = rx_queue(&hw, 512, 512, None);
    for _ in 0..5 {
        assert!(hw.push_rx(0, &[0x10; 64], false));
    }
    q.poll(64, None, &NullStack, None);
    q.teardown();
    assert_eq!(hw.mappings_outstanding(), 0);
    assert_eq!(q.pool().lock().unwrap().lent_count(), 0);
}
