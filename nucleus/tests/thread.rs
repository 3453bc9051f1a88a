use nucleus::{KernelError, SystemConfigurationBuilder};

fn boot() -> nucleus::Kernel {
    SystemConfigurationBuilder::new()
        .boot()
        .expect("failed to boot")
}

mod thread {
    use super::*;
    use nucleus::{
        sync::SpinLock,
        thread::{Current, ThreadBuilder, ThreadState, get_state_by_tid},
    };
    use std::sync::Arc;

    #[test]
    fn join_returns_exit_code() {
        let code = boot().run(|| {
            let a = ThreadBuilder::new("a").spawn(|| {});
            let b = ThreadBuilder::new("b").spawn(|| Current::exit(7));
            assert_eq!(b.join(), 7);
            assert_eq!(a.join(), 0);
        });
        assert_eq!(code, Ok(0));
    }

    #[test]
    fn main_exit_code() {
        assert_eq!(boot().run(|| Current::exit(3)), Ok(3));
    }

    #[test]
    fn panicking_main() {
        assert_eq!(boot().run(|| panic!("boom")), Ok(-1));
    }

    #[test]
    fn run_twice() {
        let kernel = boot();
        assert_eq!(kernel.run(|| {}), Ok(0));
        assert_eq!(kernel.run(|| {}), Err(KernelError::Busy));
    }

    #[test]
    fn yield_is_round_robin() {
        let code = boot().run(|| {
            let trace = Arc::new(SpinLock::new(Vec::new()));
            let handles = (0..3)
                .map(|i| {
                    let trace = trace.clone();
                    ThreadBuilder::new("yielder").spawn(move || {
                        for round in 0..2 {
                            let mut guard = trace.lock();
                            guard.push((round, i));
                            guard.unlock();
                            Current::yield_now();
                        }
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                assert_eq!(handle.join(), 0);
            }
            let trace = trace.lock();
            assert_eq!(
                &*trace,
                &[(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
            );
            trace.unlock();
        });
        assert_eq!(code, Ok(0));
    }

    #[test]
    fn parked_state() {
        let code = boot().run(|| {
            let slot = Arc::new(SpinLock::new(None));
            let sleeper = {
                let slot = slot.clone();
                ThreadBuilder::new("sleeper").spawn(move || {
                    Current::park_with(|handle| {
                        let mut slot = slot.lock();
                        *slot = Some(handle);
                        slot.unlock();
                    });
                })
            };
            Current::yield_now();
            assert_eq!(get_state_by_tid(sleeper.tid), Ok(ThreadState::Parked));

            let mut guard = slot.lock();
            let handle = guard.take();
            guard.unlock();
            handle.expect("sleeper did not park").unpark();
            assert_eq!(get_state_by_tid(sleeper.tid), Ok(ThreadState::Runnable));

            let tid = sleeper.tid;
            assert_eq!(sleeper.join(), 0);
            assert_eq!(get_state_by_tid(tid), Err(KernelError::InvalidArgument));
        });
        assert_eq!(code, Ok(0));
    }

    #[test]
    fn deadlock_is_reported() {
        let code = boot().run(|| Current::park_with(drop));
        assert_eq!(code, Err(KernelError::Deadlock));
    }

    #[test]
    fn stranded_threads_are_discarded() {
        let code = boot().run(|| {
            ThreadBuilder::new("stranded").spawn(|| Current::park_with(drop));
            Current::yield_now();
            Current::exit(5);
        });
        assert_eq!(code, Ok(5));
    }
}

mod lock {
    use super::*;
    use nucleus::{
        sync::{Lock, SpinLock},
        thread::{Current, ThreadBuilder, ThreadState, get_state_by_tid},
    };
    use std::sync::Arc;

    #[test]
    fn parking() {
        let code = boot().run(|| {
            let lock = Arc::new(Lock::new());
            lock.acquire();
            let blockee = {
                let lock = lock.clone();
                ThreadBuilder::new("blockee").spawn(move || {
                    lock.acquire();
                    assert!(lock.is_held_by_current());
                    lock.release();
                })
            };
            Current::yield_now();
            assert_eq!(
                get_state_by_tid(blockee.tid),
                Ok(ThreadState::Parked),
                "Blocked thread by Lock should be in Parked state"
            );
            assert!(lock.is_held_by_current());
            lock.release();
            assert!(!lock.is_held_by_current());
            assert_eq!(blockee.join(), 0);
        });
        assert_eq!(code, Ok(0));
    }

    #[test]
    fn fifo_handoff() {
        const LENGTH: usize = 8;
        let code = boot().run(|| {
            let lock = Arc::new(Lock::new());
            let order = Arc::new(SpinLock::new(Vec::new()));
            lock.acquire();
            let handles = (0..LENGTH)
                .map(|i| {
                    let (lock, order) = (lock.clone(), order.clone());
                    ThreadBuilder::new("waiter").spawn(move || {
                        lock.acquire();
                        let mut guard = order.lock();
                        guard.push(i);
                        guard.unlock();
                        Current::yield_now();
                        lock.release();
                    })
                })
                .collect::<Vec<_>>();
            Current::yield_now();
            lock.release();
            for handle in handles {
                assert_eq!(handle.join(), 0);
            }
            let order = order.lock();
            assert_eq!(&*order, &(0..LENGTH).collect::<Vec<_>>());
            order.unlock();
        });
        assert_eq!(code, Ok(0));
    }

    #[test]
    fn release_without_holding() {
        let code = boot().run(|| {
            let lock = Lock::new();
            lock.release();
        });
        assert_eq!(code, Ok(-1));
    }

    #[test]
    fn recursive_acquire() {
        let code = boot().run(|| {
            let lock = Lock::new();
            lock.acquire();
            lock.acquire();
        });
        assert_eq!(code, Ok(-1));
    }
}

mod preemption {
    use super::*;
    use nucleus::thread::{Current, ThreadBuilder};
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[test]
    fn timer_preempts_spinning_thread() {
        let kernel = SystemConfigurationBuilder::new()
            .timer_interval(5)
            .kernel_tick(1)
            .boot()
            .expect("failed to boot");
        {
            let machine = kernel.machine().clone();
            kernel
                .machine()
                .timer()
                .set_interrupt_handler(move |_| machine.interrupt().request_yield());
        }
        let code = kernel.run(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let setter = {
                let flag = flag.clone();
                ThreadBuilder::new("setter").spawn(move || flag.store(true, Ordering::SeqCst))
            };
            // Each guard drop ticks the clock; the timer eventually preempts.
            while !flag.load(Ordering::SeqCst) {
                drop(nucleus::sync::InterruptGuard::new());
            }
            assert_eq!(setter.join(), 0);
        });
        assert_eq!(code, Ok(0));
    }

    #[test]
    fn budget_is_reported() {
        let kernel = SystemConfigurationBuilder::new()
            .timer_interval(10)
            .tick_budget(100)
            .boot()
            .expect("failed to boot");
        kernel.machine().timer().set_interrupt_handler(|_| {});
        let code = kernel.run(|| Current::park_with(drop));
        assert_eq!(code, Err(KernelError::TimedOut));
        assert_eq!(kernel.ticks(), 100);
    }

    #[test]
    fn yielding_thread_runs_out_of_budget() {
        let kernel = SystemConfigurationBuilder::new()
            .timer_interval(10)
            .kernel_tick(1)
            .tick_budget(100)
            .boot()
            .expect("failed to boot");
        let code = kernel.run(|| {
            loop {
                Current::yield_now();
            }
        });
        assert_eq!(code, Err(KernelError::TimedOut));
        assert_eq!(kernel.ticks(), 101);
    }

    #[test]
    fn yield_advances_clock() {
        let code = boot().run(|| {
            let kernel = nucleus::Kernel::current();
            let before = kernel.ticks();
            Current::yield_now();
            Current::yield_now();
            assert!(kernel.ticks() >= before + 2);
        });
        assert_eq!(code, Ok(0));
    }
}
