use frameweave::partition::split_range;
use frameweave::{ForkJoinPool, WorkerState};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_partition_coverage_visits_each_index_once() {
    let mut pool = ForkJoinPool::new(4).unwrap();
    let mut rng = rand::rng();

    for _ in 0..50 {
        let lo = rng.random_range(0..200);
        let hi = lo + rng.random_range(0..1_000);
        let visited: Vec<AtomicUsize> = (0..hi).map(|_| AtomicUsize::new(0)).collect();

        pool.run_parallel(&visited, lo..hi, |visited, i| {
            visited[i].fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        for (i, v) in visited.iter().enumerate() {
            let expected = usize::from(i >= lo);
            assert_eq!(v.load(Ordering::Relaxed), expected, "index {i} in {lo}..{hi}");
        }
    }
    pool.shutdown().expect("Shutdown failed");
}

#[test]
fn test_join_waits_for_all_workers() {
    let mut pool = ForkJoinPool::new(4).unwrap();
    let sentinel = AtomicUsize::new(0);

    for frame in 0..20 {
        sentinel.store(0, Ordering::SeqCst);
        pool.run_parallel(&sentinel, 0..64, |sentinel, i| {
            // Uneven work so partitions finish at different times.
            if i % 16 == frame % 16 {
                std::thread::sleep(Duration::from_millis(2));
            }
            sentinel.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(sentinel.load(Ordering::SeqCst), 64);
    }
}

#[test]
fn test_split_gives_remainder_to_last_partition() {
    let ranges: Vec<_> = split_range(0..103, 4).collect();
    assert_eq!(ranges, vec![0..25, 25..50, 50..75, 75..103]);
}

#[test]
fn test_reused_every_frame() {
    let mut pool = ForkJoinPool::new(4).unwrap();
    let ticks: Vec<AtomicUsize> = (0..257).map(|_| AtomicUsize::new(0)).collect();

    let frames = 600;
    for _ in 0..frames {
        pool.run_parallel(&ticks, 0..ticks.len(), |t, i| {
            t[i].fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }

    assert!(ticks.iter().all(|t| t.load(Ordering::Relaxed) == frames));
    let metrics = pool.metrics();
    assert_eq!(metrics.parallel_calls, frames as u64);
    assert_eq!(metrics.indices_executed, (frames * ticks.len()) as u64);
}

#[test]
fn test_panicking_callback_does_not_poison_pool() {
    let mut pool = ForkJoinPool::new(2).unwrap();
    let hits = AtomicUsize::new(0);

    pool.run_parallel(&hits, 0..10, |hits, i| {
        if i == 7 {
            panic!("pathfinding request for despawned unit");
        }
        hits.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 9);

    hits.store(0, Ordering::SeqCst);
    pool.run_parallel(&hits, 0..10, |hits, _| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 10);

    for id in 0..pool.num_workers() {
        assert_eq!(pool.worker_state(id), Some(WorkerState::Idle));
    }
    pool.shutdown().expect("Shutdown failed");
}

#[test]
fn test_for_each_mut_disjoint_entities() {
    let mut pool = ForkJoinPool::new(4).unwrap();
    let mut waypoints: Vec<Vec<u32>> = vec![Vec::new(); 300];

    for step in 0..5 {
        pool.for_each_mut(&mut waypoints, |path, i| path.push(i as u32 * 10 + step))
            .unwrap();
    }

    for (i, path) in waypoints.iter().enumerate() {
        let expected: Vec<u32> = (0..5).map(|s| i as u32 * 10 + s).collect();
        assert_eq!(*path, expected);
    }
}
