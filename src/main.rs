use frameweave::{
    ForkJoinPool, LoopDispatcher, QueueWorker, QueueWorkerConfig, Residency, Resident,
    SegmentedQueue,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

struct Turret {
    residency: Residency,
    heading: f32,
    target: f32,
    shots: u32,
}

impl Resident for Turret {
    fn residency(&self) -> Residency {
        self.residency
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> frameweave::Result<()> {
    println!("frameweave - fork-join frame simulation demo\n");

    let mut pool = ForkJoinPool::new(4)?;
    println!("Started pool with {} worker threads\n", pool.num_workers());

    // Example 1: turret logic via a dispatcher
    println!("Example 1: 10,000 turrets, 60 frames");
    let mut turrets = LoopDispatcher::new(|t: &mut Turret| {
        let delta = t.target - t.heading;
        t.heading += delta.clamp(-0.05, 0.05);
        if delta.abs() < 0.01 {
            t.shots += 1;
        }
    });
    for i in 0..10_000 {
        turrets.add(Turret {
            residency: if i % 10 == 0 {
                Residency::Dormant
            } else {
                Residency::Active
            },
            heading: 0.0,
            target: (i % 360) as f32 / 100.0,
            shots: 0,
        });
    }

    let start = Instant::now();
    for _ in 0..60 {
        turrets.run_one_frame(&mut pool)?;
    }
    let shots: u32 = turrets.items().iter().map(|t| t.shots).sum();
    println!(
        "  {} active turrets, {} shots in {:?}\n",
        turrets.active_len(),
        shots,
        start.elapsed()
    );

    // Example 2: cross-thread notifications
    println!("Example 2: visibility notifications drained in the background");
    let queue = Arc::new(SegmentedQueue::new());
    let handled = Arc::new(AtomicUsize::new(0));
    let sink = handled.clone();
    let worker = QueueWorker::start(
        queue.clone(),
        QueueWorkerConfig::with_poll_interval_ms(2),
        move |cell: (u16, u16)| -> Result<(), String> {
            if cell.0 > 512 {
                return Err(format!("cell {:?} outside the map", cell));
            }
            sink.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
    )?;

    for x in 0..64u16 {
        for y in 0..16u16 {
            queue.enqueue((x, y));
        }
    }
    while !queue.is_empty() {
        std::thread::sleep(Duration::from_millis(1));
    }
    worker.stop(Duration::from_secs(1))?;
    println!(
        "  {} notifications handled\n",
        handled.load(Ordering::Relaxed)
    );

    let metrics = pool.metrics();
    println!(
        "Pool ran {} calls, {} indices ({:.0} indices/s)",
        metrics.parallel_calls,
        metrics.indices_executed,
        metrics.indices_per_second()
    );

    println!("Shutting down...");
    pool.shutdown()?;
    println!("Done!");
    Ok(())
}
