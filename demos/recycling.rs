//! Named pools recycled in the background

use recycling_objectpool::{BoxError, Pool, PoolOption, PoolRegistry, RecycleStrategyKind, Recycler};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug)]
struct Connection {
    id: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== recycling_objectpool - Recycling Example ===\n");

    let registry = Arc::new(PoolRegistry::with_recycle_interval(Duration::from_secs(1)).unwrap());
    let next_id = Arc::new(AtomicUsize::new(0));

    let option = PoolOption::new()
        .with_min_objects(1)
        .with_max_objects(4)
        .with_max_lifetime(Duration::from_secs(2))
        .with_recycle_ratio(1.0)
        .with_recycle_strategy(RecycleStrategyKind::Time {
            recycle_time: Duration::from_secs(1),
        });

    let factory_ids = Arc::clone(&next_id);
    let builder = Pool::builder(move || {
        Ok::<_, BoxError>(Connection {
            id: factory_ids.fetch_add(1, Ordering::SeqCst),
        })
    })
    .option(option)
    .destroy_hook(|conn: Connection| {
        println!("   closing connection {}", conn.id);
        Ok::<_, BoxError>(())
    });
    let pool = registry.create_with("connections", builder).unwrap();

    // Fill the pool up to max_objects
    let held: Vec<_> = futures::future::try_join_all((0..4).map(|_| pool.get()))
        .await
        .unwrap();
    println!("1. Checked out {} connections", held.len());
    drop(held);
    println!("   Idle: {}\n", pool.idle_count());

    let recycler = Recycler::new(Arc::clone(&registry));
    recycler.start().unwrap();

    println!("2. Waiting for objects to expire and be recycled...");
    sleep(Duration::from_secs(4)).await;

    let stats = pool.stats();
    println!("   Live: {}", stats.objects_count);
    println!("   Idle: {}", stats.objects_in_pool);
    println!("   Last recycled: {:?}\n", stats.last_recycled_at.map(|at| at.elapsed()));

    recycler.stop();
    println!("3. Prometheus export:\n{}", pool.export_metrics_prometheus(None));
}
