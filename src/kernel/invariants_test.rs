//! Invariant Tests
//!
//! These tests pin down the guarantees iteration tasks make to their callers.
//! Each test is named after the invariant it verifies.

#[cfg(test)]
mod lifecycle_invariants {
    use crate::kernel::iterate::{Collection, Execution, IterationTask};
    use crate::kernel::{Executor, TaskGroup, TaskHandle, TaskState};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// State is Active whenever an element function runs, Complete by the time
    /// the callback and `next` run
    #[test]
    fn state_observed_by_each_stage() {
        let exec = Executor::new();
        let handle: Rc<RefCell<Option<TaskHandle>>> = Rc::new(RefCell::new(None));
        let observed = Rc::new(RefCell::new(Vec::new()));

        let (h, o) = (handle.clone(), observed.clone());
        let (h_cb, o_cb) = (handle.clone(), observed.clone());
        let task = IterationTask::each(Collection::from(vec![1, 2, 3]), move |_, _: &i32, _, _| {
            if let Some(h) = h.borrow().as_ref() {
                o.borrow_mut().push(format!("element:{}", h.state()));
            }
        })
        .callback(move |_, _| {
            if let Some(h) = h_cb.borrow().as_ref() {
                o_cb.borrow_mut().push(format!("callback:{}", h.state()));
            }
        })
        .step(2)
        .scheduler(exec.spawner())
        .build()
        .unwrap();
        *handle.borrow_mut() = Some(task.handle());

        assert_eq!(task.state(), TaskState::Pending);

        let (h_next, o_next) = (task.handle(), observed.clone());
        task.execute(
            Rc::new(TaskGroup::with_origin(())),
            move |_| o_next.borrow_mut().push(format!("next:{}", h_next.state())),
            false,
        )
        .unwrap();
        exec.run();

        assert_eq!(
            *observed.borrow(),
            vec![
                "element:active",
                "element:active",
                "element:active",
                "callback:complete",
                "next:complete",
            ]
        );
    }

    /// A task never goes back to Pending, so a stopped task cannot be restarted
    #[test]
    fn stopped_task_stays_stopped() {
        let exec = Executor::new();
        let group = Rc::new(TaskGroup::with_origin(()));
        let task = IterationTask::map(Collection::from(vec![1, 2, 3]), |_, x: &i32, _, _| *x)
            .scheduler(exec.spawner())
            .build()
            .unwrap();

        task.execute(group.clone(), |_| {}, false).unwrap();
        task.handle().cancel();
        exec.run();

        let again = task.execute(group.clone(), |_| {}, false).unwrap();
        assert!(matches!(again, Execution::AlreadyRun(Some(_))));
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(!exec.has_pending());
    }
}

#[cfg(test)]
mod cursor_invariants {
    use crate::kernel::iterate::{Collection, IterationTask};
    use crate::kernel::{Executor, TaskGroup};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// While element i runs, exactly i elements have been fully processed
    #[test]
    fn cursor_counts_processed_elements() {
        let exec = Executor::new();
        let slot: Rc<RefCell<Option<IterationTask<i32>>>> = Rc::new(RefCell::new(None));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (slot_clone, seen_clone) = (slot.clone(), seen.clone());
        let task = IterationTask::each(Collection::from(vec![0, 1, 2, 3, 4]), move |_, _, k, _| {
            if let Some(task) = slot_clone.borrow().as_ref() {
                seen_clone
                    .borrow_mut()
                    .push((k.as_index(), task.current_iteration()));
            }
        })
        .step(2)
        .scheduler(exec.spawner())
        .build()
        .unwrap();
        *slot.borrow_mut() = Some(task.clone());

        task.execute(Rc::new(TaskGroup::with_origin(())), |_| {}, false)
            .unwrap();
        exec.run();
        // Break the task -> closure -> slot -> task cycle
        slot.borrow_mut().take();

        let expected: Vec<_> = (0..5usize)
            .map(|i| (Some(i), if i == 0 { None } else { Some(i) }))
            .collect();
        assert_eq!(*seen.borrow(), expected);
    }

    /// Between turns the cursor only grows, by at most `step` per turn
    #[test]
    fn cursor_is_monotonic_across_turns() {
        for step in 1..=4 {
            let exec = Executor::new();
            let task = IterationTask::map(Collection::from((0..9).collect::<Vec<i32>>()), |_, x: &i32, _, _| x + 1)
                .step(step)
                .scheduler(exec.spawner())
                .build()
                .unwrap();

            assert_eq!(task.current_iteration(), None);
            task.execute(Rc::new(TaskGroup::with_origin(())), |_| {}, false)
                .unwrap();

            let mut last = task.current_iteration().unwrap_or(0);
            assert_eq!(last, step.min(9));
            while exec.has_pending() {
                exec.tick();
                let now = task.current_iteration().unwrap_or(0);
                assert!(now > last, "step {}: {} -> {}", step, last, now);
                assert!(now - last <= step);
                last = now;
            }
            assert_eq!(last, 9);
            assert_eq!(task.progress(), 1.0);
        }
    }

    /// Each element is handed to the element function exactly once
    #[test]
    fn every_element_processed_once() {
        let exec = Executor::new();
        let counts = Rc::new(RefCell::new(vec![0u32; 6]));
        let counts_clone = counts.clone();

        let task = IterationTask::each(Collection::from(vec![0usize, 1, 2, 3, 4, 5]), move |_, v, _, _| {
            counts_clone.borrow_mut()[*v] += 1;
        })
        .step(4)
        .scheduler(exec.spawner())
        .build()
        .unwrap();

        let group = Rc::new(TaskGroup::with_origin(()));
        task.execute(group.clone(), |_| {}, false).unwrap();
        // Re-entry mid-run must not start a second pass
        task.execute(group.clone(), |_| {}, false).unwrap();
        exec.run();
        task.execute(group, |_| {}, false).unwrap();
        exec.run();

        assert_eq!(*counts.borrow(), vec![1; 6]);
    }
}

#[cfg(test)]
mod shape_invariants {
    use crate::kernel::iterate::{Collection, IterationTask, Shape};
    use crate::kernel::{Executor, TaskGroup};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Keyed collections are visited in insertion order, whatever the step
    #[test]
    fn keyed_order_is_insertion_order() {
        for step in 1..=4 {
            let exec = Executor::new();
            let order = Rc::new(RefCell::new(Vec::new()));
            let order_clone = order.clone();

            let task = IterationTask::each(
                Collection::keyed([("delta", 4), ("alpha", 1), ("charlie", 3), ("bravo", 2)]),
                move |_, _: &i32, k, _| order_clone.borrow_mut().push(k.to_string()),
            )
            .step(step)
            .scheduler(exec.spawner())
            .build()
            .unwrap();

            assert_eq!(task.shape(), Shape::Keyed);
            task.execute(Rc::new(TaskGroup::with_origin(())), |_| {}, false)
                .unwrap();
            exec.run();

            assert_eq!(*order.borrow(), vec!["delta", "alpha", "charlie", "bravo"]);
        }
    }

    /// The element function sees the task's own collection, never a copy
    #[test]
    fn collection_is_shared_not_copied() {
        let exec = Executor::new();
        let list = Rc::new(Collection::from(vec![1, 2]));
        let expected = Rc::as_ptr(&list) as usize;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        let task = IterationTask::each(list.clone(), move |_, _: &i32, _, coll| {
            seen_clone.borrow_mut().push(coll as *const Collection<i32> as usize)
        })
        .scheduler(exec.spawner())
        .build()
        .unwrap();

        task.execute(Rc::new(TaskGroup::with_origin(())), |_| {}, false)
            .unwrap();
        exec.run();

        assert_eq!(*seen.borrow(), vec![expected, expected]);
        assert!(Rc::ptr_eq(&task.collection(), &list));
    }
}

#[cfg(test)]
mod completion_invariants {
    use crate::kernel::iterate::{Aggregate, Collection, IterationTask};
    use crate::kernel::{Defer, Executor, Priority, TaskGroup, TaskId};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Owner, callback and `next` each fire exactly once per task, even when
    /// `execute` is called again on every turn of the run
    #[test]
    fn finalization_fires_exactly_once() {
        for step in 1..=5 {
            let exec = Executor::new();
            let group = Rc::new(TaskGroup::with_origin(()));
            let callbacks = Rc::new(Cell::new(0));
            let nexts = Rc::new(Cell::new(0));

            let callbacks_clone = callbacks.clone();
            let task = IterationTask::reduce(Collection::from(vec![1, 2, 3, 4, 5]), 0, |_, a, v: &i32, _, _| a + v)
                .step(step)
                .callback(move |_, _| callbacks_clone.set(callbacks_clone.get() + 1))
                .scheduler(exec.spawner())
                .build()
                .unwrap();

            let nexts_clone = nexts.clone();
            task.execute(group.clone(), move |_| nexts_clone.set(nexts_clone.get() + 1), false)
                .unwrap();

            while exec.has_pending() {
                // Interleaved re-entry from another task on the same run loop
                let (task, group, nexts) = (task.clone(), group.clone(), nexts.clone());
                exec.spawner().defer(
                    TaskId(u64::MAX),
                    Priority::Critical,
                    Box::new(move || {
                        let _ = task.execute(group, move |_| nexts.set(nexts.get() + 1), true);
                    }),
                );
                exec.tick();
            }

            assert_eq!(callbacks.get(), 1, "step {}", step);
            assert_eq!(nexts.get(), 1, "step {}", step);
            assert_eq!(group.completions(), vec![(task.id(), false)]);
            assert_eq!(task.result(), Some(Aggregate::Value(15)));
        }
    }

    /// Nothing is reported before the collection is exhausted
    #[test]
    fn no_finalization_before_exhaustion() {
        let exec = Executor::new();
        let group = Rc::new(TaskGroup::with_origin(()));
        let seen = Rc::new(RefCell::new(None));
        let seen_clone = seen.clone();

        let task = IterationTask::map(Collection::from(vec![1, 2, 3, 4]), |_, x: &i32, _, _| x * 10)
            .priority(Priority::Background)
            .scheduler(exec.spawner())
            .build()
            .unwrap();

        task.execute(group.clone(), move |r| *seen_clone.borrow_mut() = Some(r), false)
            .unwrap();

        for _ in 0..3 {
            assert!(seen.borrow().is_none());
            assert!(group.completions().is_empty());
            exec.tick();
        }

        assert_eq!(
            seen.borrow().clone().and_then(Aggregate::into_vec),
            Some(vec![10, 20, 30, 40])
        );
        assert_eq!(group.completions().len(), 1);
    }
}

#[cfg(test)]
mod cancellation_invariants {
    use crate::kernel::iterate::{Collection, IterationTask};
    use crate::kernel::{Executor, TaskGroup, TaskState};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Cancelling at any turn boundary stops the run there, with no finalization
    #[test]
    fn cancel_halts_at_any_boundary() {
        let len = 6;
        // The last element would finish the run
        for boundary in 0..len - 1 {
            let exec = Executor::new();
            let group = Rc::new(TaskGroup::with_origin(()));
            let processed = Rc::new(Cell::new(0));
            let finished = Rc::new(Cell::new(false));

            let processed_clone = processed.clone();
            let task = IterationTask::each(Collection::from(vec![0; len]), move |_, _: &i32, _, _| {
                processed_clone.set(processed_clone.get() + 1)
            })
            .scheduler(exec.spawner())
            .build()
            .unwrap();

            let finished_clone = finished.clone();
            task.execute(group.clone(), move |_| finished_clone.set(true), false)
                .unwrap();
            for _ in 0..boundary {
                exec.tick();
            }

            assert!(task.handle().cancel());
            exec.run();

            // First element runs inside execute, then one per tick
            assert_eq!(processed.get(), boundary + 1, "boundary {}", boundary);
            assert!(!finished.get());
            assert!(group.completions().is_empty());
            assert_eq!(task.state(), TaskState::Cancelled);
        }
    }

    /// Cancelling a task that already completed changes nothing
    #[test]
    fn cancel_after_completion_is_ignored() {
        let exec = Executor::new();
        let group = Rc::new(TaskGroup::with_origin(()));
        let task = IterationTask::each(Collection::from(vec![1]), |_, _: &i32, _, _| {})
            .scheduler(exec.spawner())
            .build()
            .unwrap();

        task.execute(group.clone(), |_| {}, false).unwrap();
        exec.run();

        assert!(!task.handle().cancel());
        assert_eq!(task.state(), TaskState::Complete);
        assert_eq!(group.completions().len(), 1);
    }
}

#[cfg(test)]
mod scheduler_invariants {
    use crate::kernel::iterate::{Collection, IterationTask};
    use crate::kernel::{Executor, Priority, TaskGroup, TaskState};
    use std::cell::Cell;
    use std::rc::Rc;

    /// A running task has at most one continuation queued at any time
    #[test]
    fn one_continuation_per_yield() {
        let exec = Executor::new();
        let task = IterationTask::each(Collection::from(vec![1; 7]), |_, _: &i32, _, _| {})
            .step(3)
            .scheduler(exec.spawner())
            .build()
            .unwrap();

        task.execute(Rc::new(TaskGroup::with_origin(())), |_| {}, false)
            .unwrap();

        let mut turns = 1;
        while exec.has_pending() {
            assert_eq!(exec.pending_for(task.id()), 1);
            exec.tick();
            turns += 1;
        }
        // 3 + 3 + 1
        assert_eq!(turns, 3);
        assert_eq!(exec.pending_for(task.id()), 0);
    }

    /// A task that panics mid-tick does not strand the other tasks of that tick
    #[test]
    fn failure_is_confined_to_its_task() {
        let exec = Executor::new();
        let group = Rc::new(TaskGroup::with_origin(()));

        let failing = IterationTask::each(Collection::from(vec![0, 1, 2]), |_, v: &i32, _, _| {
            if *v == 1 {
                panic!("element failed");
            }
        })
        .priority(Priority::Critical)
        .scheduler(exec.spawner())
        .build()
        .unwrap();

        let visited = Rc::new(Cell::new(0));
        let visited_clone = visited.clone();
        let healthy = IterationTask::each(Collection::from(vec![0, 1, 2]), move |_, _: &i32, _, _| {
            visited_clone.set(visited_clone.get() + 1)
        })
        .scheduler(exec.spawner())
        .build()
        .unwrap();

        failing.execute(group.clone(), |_| {}, false).unwrap();
        healthy.execute(group.clone(), |_| {}, false).unwrap();

        // Critical slice runs first and panics before the healthy one gets its turn
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| exec.tick()));
        assert!(outcome.is_err());
        assert_eq!(exec.pending_for(healthy.id()), 1);

        exec.run();

        assert_eq!(failing.state(), TaskState::Active);
        assert_eq!(healthy.state(), TaskState::Complete);
        assert_eq!(visited.get(), 3);
        assert_eq!(group.completions(), vec![(healthy.id(), false)]);
    }

    /// Work deferred during a tick runs on the next tick, never the same one
    #[test]
    fn deferred_work_waits_a_tick() {
        let exec = Executor::new();
        let task = IterationTask::each(Collection::from(vec![1; 4]), |_, _: &i32, _, _| {})
            .scheduler(exec.spawner())
            .build()
            .unwrap();

        task.execute(Rc::new(TaskGroup::with_origin(())), |_| {}, false)
            .unwrap();

        for expected in 2..=4 {
            assert_eq!(exec.tick(), 1);
            assert_eq!(task.current_iteration(), Some(expected));
        }
        assert!(!exec.has_pending());
    }
}
