use pano_runtime::{run_with_deadline, scheduler, CancellationToken, DeadlineOutcome, ResourceGroup};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn stress_test_concurrent_group_churn() {
    let barrier = Arc::new(Barrier::new(9)); // 8 workers + 1 main

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let b = barrier.clone();
            thread::spawn(move || {
                b.wait();
                let s = scheduler();
                for j in 0..20 {
                    let name = format!("churn-{}-{}", i, j);
                    let group = s.create_group(&name, 1, None).unwrap();
                    let sum: u64 = group.install(|| (0..1000u64).into_par_iter().sum());
                    assert_eq!(sum, 499_500);
                    assert!(s.remove_group(&name).is_some());
                }
            })
        })
        .collect();

    barrier.wait();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn stress_test_bounded_pool_limits_parallelism() {
    let group = ResourceGroup::new("bounded", 2, None).unwrap();
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    group.install(|| {
        (0..64).into_par_iter().for_each(|_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            active.fetch_sub(1, Ordering::SeqCst);
        });
    });

    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn stress_test_many_deadline_calls() {
    let token = CancellationToken::new();
    let results: Vec<_> = (0..32)
        .map(|i| run_with_deadline("many", Duration::from_secs(5), &token, move || i * i).unwrap())
        .collect();
    for (i, r) in results.into_iter().enumerate() {
        assert_eq!(r, DeadlineOutcome::Completed(i * i));
    }
}
