use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{bounded, unbounded};
use log::{debug, error};

/// What became of one unit of work handed to [`run_bounded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOutcome<R> {
    Completed(R),
    /// The worker panicked while processing this unit
    Crashed(String),
    /// The unit was never picked up (no worker could be started)
    Unfinished,
}

/// Run `work` over `items` on at most `workers` OS threads.
///
/// Items are admitted strictly in input order, and only when a worker is
/// idle: the job channel has no buffer, so the dispatcher blocks until a
/// worker takes the next unit. Completion order is free; outcomes come back
/// indexed like `items`. A panic inside `work` is caught and reported as
/// [`PoolOutcome::Crashed`] for that unit only.
///
/// The pool does no locking on behalf of `work`: callers must hand out
/// units whose write-sets are disjoint.
pub fn run_bounded<T, R, F>(label: &str, items: Vec<T>, workers: usize, work: F) -> Vec<PoolOutcome<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = items.len();
    let mut outcomes: Vec<PoolOutcome<R>> = (0..total).map(|_| PoolOutcome::Unfinished).collect();
    if total == 0 {
        return outcomes;
    }

    let thread_count = workers.max(1).min(total);
    let (job_tx, job_rx) = bounded::<(usize, T)>(0);
    let (result_tx, result_rx) = unbounded::<(usize, PoolOutcome<R>)>();
    let work = &work;

    thread::scope(|scope| {
        let mut started = 0;
        for i in 0..thread_count {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", label, i))
                .spawn_scoped(scope, move || {
                    while let Ok((index, item)) = jobs.recv() {
                        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(item))) {
                            Ok(result) => PoolOutcome::Completed(result),
                            Err(payload) => PoolOutcome::Crashed(panic_message(payload.as_ref())),
                        };
                        if results.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(_) => started += 1,
                Err(e) => error!("Failed to start {} worker {}: {}", label, i, e),
            }
        }
        drop(job_rx);
        drop(result_tx);

        if started == 0 {
            error!("No {} workers could be started; {} units left unfinished", label, total);
            return;
        }
        debug!("Started {} {} workers for {} units", started, label, total);

        for (index, item) in items.into_iter().enumerate() {
            if job_tx.send((index, item)).is_err() {
                error!("All {} workers exited early", label);
                break;
            }
        }
        drop(job_tx);
    });

    for (index, outcome) in result_rx.try_iter() {
        outcomes[index] = outcome;
    }
    outcomes
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_all_units_complete_in_index_order() {
        let outcomes = run_bounded("test", (0..20).collect(), 4, |n: u32| n * 2);
        let values: Vec<u32> = outcomes
            .into_iter()
            .map(|o| match o {
                PoolOutcome::Completed(v) => v,
                other => panic!("unexpected outcome {:?}", other),
            })
            .collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrency_never_exceeds_ceiling() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        run_bounded("ceiling", (0..16).collect::<Vec<u32>>(), 3, |_| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_panic_is_isolated_to_its_unit() {
        let outcomes = run_bounded("panicky", vec![1, 2, 3], 2, |n: u32| {
            if n == 2 {
                panic!("unit {} exploded", n);
            }
            n
        });

        assert_eq!(outcomes[0], PoolOutcome::Completed(1));
        assert_eq!(outcomes[1], PoolOutcome::Crashed("unit 2 exploded".to_string()));
        assert_eq!(outcomes[2], PoolOutcome::Completed(3));
    }

    #[test]
    fn test_empty_input() {
        let outcomes: Vec<PoolOutcome<()>> = run_bounded("empty", Vec::<u8>::new(), 4, |_| ());
        assert!(outcomes.is_empty());
    }
}
