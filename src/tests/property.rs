//! Randomized checks of scheduling order and counting invariants.

use std::collections::VecDeque;
use std::vec;
use std::vec::Vec;

use crate::config::KernelConfig;
use crate::errors::SyncError;
use crate::sched::priority;
use crate::sync::{GivePolicy, RingBuffer, Semaphore};
use crate::tests::helpers::{event_log, leak, started_kernel, started_kernel_with, SimpleRng};
use crate::thread::ThreadBuilder;
use crate::time::Timeout;

#[test]
fn property_sleepers_wake_by_deadline_then_arrival() {
    let mut rng = SimpleRng::new(0x5eed_1234);
    let kernel = started_kernel();
    let log = event_log();

    let durations: Vec<u64> = (0..12).map(|_| rng.gen_range(1, 40)).collect();
    let handles: Vec<_> = durations
        .iter()
        .enumerate()
        .map(|(i, &ticks)| {
            ThreadBuilder::new()
                .priority(5)
                .spawn(kernel, move || {
                    kernel.sleep(Timeout::ticks(ticks));
                    log.push((kernel.uptime_ticks(), i));
                })
                .unwrap()
        })
        .collect();
    for handle in &handles {
        handle.join(Timeout::Forever).unwrap();
    }

    let mut expected: Vec<(u64, usize)> = durations.iter().copied().zip(0..).collect();
    expected.sort();
    assert_eq!(log.snapshot(), expected);
}

#[test]
fn property_ready_threads_run_by_priority_then_arrival() {
    let mut rng = SimpleRng::new(0xfeed_beef);
    let kernel = started_kernel_with(KernelConfig::DEFAULT.main_priority(priority::HIGHEST));
    let log = event_log();

    let prios: Vec<i32> = (0..20)
        .map(|_| rng.gen_range(0, 30) as i32 + priority::HIGHEST + 1)
        .collect();
    let handles: Vec<_> = prios
        .iter()
        .enumerate()
        .map(|(i, &prio)| {
            ThreadBuilder::new()
                .priority(prio)
                .spawn(kernel, move || log.push((prio, i)))
                .unwrap()
        })
        .collect();
    // Main outranks everything, so nothing has run yet.
    assert_eq!(log.len(), 0);
    for handle in &handles {
        handle.join(Timeout::Forever).unwrap();
    }

    let mut expected: Vec<(i32, usize)> = prios.iter().copied().zip(0..).collect();
    expected.sort();
    assert_eq!(log.snapshot(), expected);
}

#[test]
fn property_semaphore_count_matches_model() {
    let mut rng = SimpleRng::new(42);
    let kernel = started_kernel();
    let limit = 5;
    let sem = Semaphore::with_policy(kernel, 0, limit, GivePolicy::Strict).unwrap();
    let mut model = 0u32;

    for _ in 0..500 {
        if rng.next_u64() % 2 == 0 {
            let result = sem.give();
            if model < limit {
                model += 1;
                assert_eq!(result, Ok(()));
            } else {
                assert_eq!(result, Err(SyncError::LimitReached));
            }
        } else {
            let result = sem.take(Timeout::NoWait);
            if model > 0 {
                model -= 1;
                assert_eq!(result, Ok(()));
            } else {
                assert_eq!(result, Err(SyncError::WouldBlock));
            }
        }
        assert_eq!(sem.count(), model);
    }
}

#[test]
fn property_give_and_timeout_resolve_once() {
    let mut rng = SimpleRng::new(0xdead_0001);
    let kernel = started_kernel();

    for _ in 0..40 {
        let give_after = rng.gen_range(1, 20);
        let wait_for = rng.gen_range(1, 20);
        let sem = leak(Semaphore::new(kernel, 0, 1).unwrap());
        let outcome = event_log();
        let waiter = ThreadBuilder::new()
            .priority(5)
            .spawn(kernel, move || outcome.push(sem.take(Timeout::ticks(wait_for))))
            .unwrap();

        kernel.sleep(Timeout::ticks(give_after));
        sem.give().unwrap();
        waiter.join(Timeout::Forever).unwrap();

        assert_eq!(outcome.len(), 1);
        let result = outcome.snapshot()[0];
        // The unit went either to the waiter or to the count, never both.
        match result {
            Ok(()) => assert_eq!(sem.count(), 0),
            Err(err) => {
                assert_eq!(err, SyncError::TimedOut);
                assert_eq!(sem.count(), 1);
            }
        }
        if give_after < wait_for {
            assert_eq!(result, Ok(()));
        } else if give_after > wait_for {
            assert_eq!(result, Err(SyncError::TimedOut));
        }
    }
}

#[test]
fn property_ring_buffer_preserves_fifo_bytes() {
    let mut rng = SimpleRng::new(0x0b0f_fe12);
    let mut ring: RingBuffer<64> = RingBuffer::new();
    let (mut tx, mut rx) = ring.split();
    let mut model: VecDeque<u8> = VecDeque::new();
    let mut next = 0u8;

    for _ in 0..2_000 {
        if rng.next_u64() % 2 == 0 {
            let len = rng.gen_range(1, 24) as usize;
            let data: Vec<u8> = (0..len).map(|i| next.wrapping_add(i as u8)).collect();
            let written = tx.put(&data);
            assert_eq!(written, len.min(64 - model.len()));
            model.extend(&data[..written]);
            next = next.wrapping_add(written as u8);
        } else {
            let mut out = vec![0u8; rng.gen_range(1, 24) as usize];
            let read = rx.get(&mut out);
            assert_eq!(read, out.len().min(model.len()));
            let expected: Vec<u8> = model.drain(..read).collect();
            assert_eq!(&out[..read], &expected[..]);
        }
        assert_eq!(rx.bytes_available(), model.len());
    }
}
