//! Priority scheduling, time, and interrupt bookkeeping.

mod priority_tests {
    use crate::errors::{InvalidOperationError, ThreadError};
    use crate::sched::priority;
    use crate::tests::helpers::{event_log, started_kernel};
    use crate::thread::ThreadBuilder;
    use crate::time::Timeout;

    #[test]
    fn test_higher_priority_preempts_on_spawn() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || log.push("high"))
            .unwrap();
        log.push("main");
        assert_eq!(log.snapshot(), ["high", "main"]);
        handle.join(Timeout::Forever).unwrap();
    }

    #[test]
    fn test_lower_priority_waits_until_main_blocks() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(5)
            .spawn(kernel, move || log.push("low"))
            .unwrap();
        log.push("main");
        handle.join(Timeout::Forever).unwrap();
        assert_eq!(log.snapshot(), ["main", "low"]);
    }

    #[test]
    fn test_ready_threads_run_in_priority_order() {
        let kernel = started_kernel();
        let log = event_log();
        let handles: std::vec::Vec<_> = [7, 3, 9, 3, 1]
            .into_iter()
            .enumerate()
            .map(|(i, prio)| {
                ThreadBuilder::new()
                    .priority(prio)
                    .spawn(kernel, move || log.push((prio, i)))
                    .unwrap()
            })
            .collect();
        kernel.sleep(Timeout::ticks(1));
        assert_eq!(log.snapshot(), [(1, 4), (3, 1), (3, 3), (7, 0), (9, 2)]);
        drop(handles);
    }

    #[test]
    fn test_yield_rotates_equal_priority() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = kernel.spawn(move || log.push("worker")).unwrap();
        log.push("before yield");
        kernel.yield_now();
        log.push("after yield");
        assert_eq!(log.snapshot(), ["before yield", "worker", "after yield"]);
        handle.join(Timeout::Forever).unwrap();
    }

    #[test]
    fn test_yield_does_not_run_lower_priority() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(5)
            .spawn(kernel, move || log.push("low"))
            .unwrap();
        kernel.yield_now();
        assert_eq!(log.len(), 0);
        handle.join(Timeout::Forever).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_set_priority_preempts() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(5)
            .spawn(kernel, move || log.push("worker"))
            .unwrap();
        kernel.set_priority(handle.thread_id(), -3).unwrap();
        log.push("main");
        assert_eq!(log.snapshot(), ["worker", "main"]);

        assert_eq!(
            kernel.set_priority(kernel.current(), priority::IDLE),
            Err(ThreadError::InvalidOperation(InvalidOperationError::InvalidPriority(
                priority::IDLE
            )))
        );
    }

    #[test]
    fn test_cooperative_thread_runs_until_it_yields() {
        let kernel = started_kernel();
        let log = event_log();
        kernel.set_priority(kernel.current(), priority::coop(10)).unwrap();
        let handle = ThreadBuilder::new()
            .priority(priority::coop(2))
            .delay(Timeout::Forever)
            .spawn(kernel, move || log.push("urgent"))
            .unwrap();
        // More urgent, but main is cooperative and keeps the CPU.
        kernel.start_thread(handle.thread_id()).unwrap();
        log.push("main");
        kernel.yield_now();
        log.push("yielded");
        assert_eq!(log.snapshot(), ["main", "urgent", "yielded"]);
    }

    #[test]
    fn test_sched_lock_defers_preemption() {
        let kernel = started_kernel();
        let log = event_log();
        kernel.sched_lock();
        kernel.sched_lock();
        let handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || log.push("high"))
            .unwrap();
        kernel.sched_unlock();
        log.push("still locked");
        kernel.sched_unlock();
        assert_eq!(log.snapshot(), ["still locked", "high"]);
        handle.join(Timeout::Forever).unwrap();
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_unbalanced_sched_unlock_halts() {
        let kernel = started_kernel();
        kernel.sched_unlock();
    }
}

mod time_tests {
    use crate::config::KernelConfig;
    use crate::tests::helpers::{event_log, started_kernel, started_kernel_with};
    use crate::thread::{ThreadBuilder, ThreadState};
    use crate::time::{Duration, Instant, Timeout};

    #[test]
    fn test_sleep_advances_simulated_time() {
        let kernel = started_kernel();
        assert_eq!(kernel.sleep(Timeout::ticks(10)), 0);
        assert_eq!(kernel.uptime_ticks(), 10);
        assert_eq!(kernel.now(), Instant::from_ticks(10));
        assert_eq!(kernel.sleep(Timeout::At(Instant::from_ticks(25))), 0);
        assert_eq!(kernel.uptime_ticks(), 25);
        assert_eq!(kernel.sleep(Timeout::After(Duration::from_millis(5))), 0);
        assert_eq!(kernel.uptime_ticks(), 30);
    }

    #[test]
    fn test_sleep_no_wait_yields() {
        let kernel = started_kernel();
        assert_eq!(kernel.sleep(Timeout::NoWait), 0);
        assert_eq!(kernel.uptime_ticks(), 0);
    }

    #[test]
    fn test_sleepers_wake_in_deadline_order() {
        let kernel = started_kernel();
        let log = event_log();
        let handles: std::vec::Vec<_> = [30u64, 10, 20]
            .into_iter()
            .map(|ticks| {
                ThreadBuilder::new()
                    .priority(1)
                    .spawn(kernel, move || {
                        kernel.sleep(Timeout::ticks(ticks));
                        log.push((ticks, kernel.uptime_ticks()));
                    })
                    .unwrap()
            })
            .collect();
        for handle in &handles {
            handle.join(Timeout::Forever).unwrap();
        }
        assert_eq!(log.snapshot(), [(10, 10), (20, 20), (30, 30)]);
    }

    #[test]
    fn test_wakeup_returns_remaining_ticks() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(1)
            .spawn(kernel, move || log.push(kernel.sleep(Timeout::ticks(100))))
            .unwrap();
        kernel.sleep(Timeout::ticks(5));
        assert_eq!(kernel.state(handle.thread_id()).unwrap(), ThreadState::Blocked);
        assert_eq!(kernel.thread_timeout_remaining(handle.thread_id()).unwrap(), Some(95));
        kernel.wakeup(handle.thread_id()).unwrap();
        handle.join(Timeout::Forever).unwrap();
        assert_eq!(log.snapshot(), [95]);
    }

    #[test]
    fn test_wakeup_ignores_threads_that_are_not_sleeping() {
        let kernel = started_kernel();
        let handle = ThreadBuilder::new()
            .priority(5)
            .delay(Timeout::Forever)
            .spawn(kernel, || {})
            .unwrap();
        kernel.wakeup(handle.thread_id()).unwrap();
        assert_eq!(kernel.state(handle.thread_id()).unwrap(), ThreadState::Suspended);
    }

    #[test]
    fn test_sleep_forever_until_resumed() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || log.push(kernel.sleep(Timeout::Forever)))
            .unwrap();
        assert_eq!(kernel.state(handle.thread_id()).unwrap(), ThreadState::Suspended);
        kernel.resume(handle.thread_id()).unwrap();
        assert_eq!(log.snapshot(), [u64::MAX]);
    }

    #[test]
    fn test_suspend_and_resume() {
        let kernel = started_kernel();
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(5)
            .spawn(kernel, move || log.push(1))
            .unwrap();
        kernel.suspend(handle.thread_id()).unwrap();
        assert_eq!(kernel.state(handle.thread_id()).unwrap(), ThreadState::Suspended);
        kernel.sleep(Timeout::ticks(3));
        assert_eq!(log.len(), 0);
        kernel.resume(handle.thread_id()).unwrap();
        handle.join(Timeout::Forever).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_time_slicing_rotates_equal_priority() {
        let kernel = started_kernel_with(KernelConfig::DEFAULT.time_slice(2, 0));
        let log = event_log();
        let spawn = |tag: char| {
            ThreadBuilder::new()
                .priority(5)
                .spawn(kernel, move || {
                    for _ in 0..4 {
                        log.push(tag);
                        kernel.tick();
                    }
                })
                .unwrap()
        };
        let a = spawn('a');
        let b = spawn('b');
        a.join(Timeout::Forever).unwrap();
        b.join(Timeout::Forever).unwrap();
        assert_eq!(log.snapshot(), ['a', 'a', 'b', 'b', 'a', 'a', 'b', 'b']);
    }

    #[test]
    fn test_time_slicing_disabled_at_runtime() {
        let kernel = started_kernel_with(KernelConfig::DEFAULT.time_slice(1, 0));
        kernel.set_time_slice(0, 0);
        let log = event_log();
        let spawn = |tag: char| {
            ThreadBuilder::new()
                .priority(5)
                .spawn(kernel, move || {
                    for _ in 0..3 {
                        log.push(tag);
                        kernel.tick();
                    }
                })
                .unwrap()
        };
        let a = spawn('a');
        let b = spawn('b');
        a.join(Timeout::Forever).unwrap();
        b.join(Timeout::Forever).unwrap();
        assert_eq!(log.snapshot(), ['a', 'a', 'a', 'b', 'b', 'b']);
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_everything_blocked_forever_is_deadlock() {
        let kernel = started_kernel();
        kernel.suspend(kernel.current()).unwrap();
    }
}

mod isr_tests {
    use crate::arch::host::HostArch;
    use crate::arch::Arch;
    use crate::config::KernelConfig;
    use crate::sync::Semaphore;
    use crate::tests::helpers::{event_log, leak, leaked_kernel, started_kernel};
    use crate::thread::ThreadBuilder;
    use crate::time::Timeout;

    #[test]
    fn test_wakeup_from_isr_switches_on_exit() {
        let kernel = started_kernel();
        let sem = leak(Semaphore::new(kernel, 0, 1).unwrap());
        let log = event_log();
        let handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || {
                sem.take(Timeout::Forever).unwrap();
                log.push("woken");
            })
            .unwrap();

        kernel.isr_enter();
        assert!(kernel.in_isr());
        sem.give().unwrap();
        log.push("given");
        kernel.isr_exit();
        assert!(!kernel.in_isr());
        assert_eq!(log.snapshot(), ["given", "woken"]);
        handle.join(Timeout::Forever).unwrap();
    }

    #[test]
    fn test_nested_isr_defers_switch_to_outermost_exit() {
        let kernel = started_kernel();
        let sem = leak(Semaphore::new(kernel, 0, 1).unwrap());
        let log = event_log();
        let _handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || {
                sem.take(Timeout::Forever).unwrap();
                log.push("woken");
            })
            .unwrap();

        kernel.isr_enter();
        kernel.isr_enter();
        sem.give().unwrap();
        kernel.isr_exit();
        assert_eq!(log.len(), 0);
        kernel.isr_exit();
        assert_eq!(log.snapshot(), ["woken"]);
    }

    #[test]
    fn test_tick_fires_timeouts() {
        let kernel = started_kernel();
        let log = event_log();
        let _handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || {
                kernel.sleep(Timeout::ticks(2));
                log.push(kernel.uptime_ticks());
            })
            .unwrap();
        kernel.tick();
        assert_eq!(log.len(), 0);
        kernel.tick();
        assert_eq!(log.snapshot(), [2]);
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_unbalanced_isr_exit_halts() {
        let kernel = started_kernel();
        kernel.isr_exit();
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_blocking_in_isr_halts() {
        let kernel = started_kernel();
        let sem = Semaphore::new(kernel, 0, 1).unwrap();
        kernel.isr_enter();
        let _ = sem.take(Timeout::Forever);
    }

    #[test]
    #[should_panic(expected = "kernel halted: blocking call before the kernel started")]
    fn test_blocking_before_start_halts() {
        let kernel = leaked_kernel(KernelConfig::DEFAULT);
        let sem = Semaphore::new(kernel, 0, 1).unwrap();
        let _ = sem.take(Timeout::Forever);
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_blocking_with_interrupts_masked_halts() {
        let kernel = started_kernel();
        let _key = HostArch::irq_lock();
        kernel.sleep(Timeout::ticks(1));
    }

    #[test]
    fn test_reschedule_waits_for_interrupts_enabled() {
        let kernel = started_kernel();
        let sem = leak(Semaphore::new(kernel, 0, 1).unwrap());
        let log = event_log();
        let _handle = ThreadBuilder::new()
            .priority(-1)
            .spawn(kernel, move || {
                sem.take(Timeout::Forever).unwrap();
                log.push("woken");
            })
            .unwrap();

        let key = HostArch::irq_lock();
        sem.give().unwrap();
        assert_eq!(log.len(), 0);
        HostArch::irq_unlock(key);
        kernel.yield_now();
        assert_eq!(log.snapshot(), ["woken"]);
    }
}
