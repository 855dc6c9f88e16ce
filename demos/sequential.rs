//! Sequential (non-async) usage of the pool

use futures::executor::block_on;
use recycling_objectpool::{BoxError, ExecutionContext, Pool, PoolError, PoolOption};
use std::time::Duration;

fn main() {
    println!("=== recycling_objectpool - Sequential Examples ===\n");

    // Example 1: Reuse of released objects
    reuse();

    // Example 2: Exhaustion never blocks a sequential caller
    exhaustion();

    // Example 3: Flushing down to min_objects
    flushing();
}

fn buffer_pool(option: PoolOption) -> Pool<Vec<u8>> {
    Pool::builder(|| Ok::<_, BoxError>(Vec::with_capacity(4096)))
        .name("buffers")
        .option(option)
        .context(ExecutionContext::Sequential)
        .build()
        .unwrap()
}

fn reuse() {
    println!("1. Reuse:");
    let pool = buffer_pool(PoolOption::default());

    {
        let mut buffer = block_on(pool.get()).unwrap();
        buffer.extend_from_slice(b"hello");
        println!("   Got buffer with {} bytes", buffer.len());
        buffer.clear();
        // returned when dropped
    }

    let again = block_on(pool.get()).unwrap();
    println!("   Reused buffer, capacity {}", again.capacity());
    println!("   Live objects: {}\n", pool.current_object_number());
}

fn exhaustion() {
    println!("2. Exhaustion:");
    let option = PoolOption::new()
        .with_max_objects(1)
        .with_wait_timeout(Duration::from_secs(5));
    let pool = buffer_pool(option);

    let _held = block_on(pool.get()).unwrap();
    match block_on(pool.get()) {
        Ok(_) => println!("   Got a second buffer"),
        Err(PoolError::Exhausted(_)) => println!("   Pool exhausted, returned immediately"),
        Err(e) => println!("   Error: {}", e),
    }

    println!();
}

fn flushing() {
    println!("3. Flushing:");
    let pool = buffer_pool(PoolOption::new().with_min_objects(1).with_max_objects(5));

    let held: Vec<_> = (0..5).map(|_| block_on(pool.get()).unwrap()).collect();
    drop(held);
    println!("   Idle before flush: {}", pool.idle_count());

    let destroyed = block_on(pool.flush());
    println!("   Destroyed: {}", destroyed);
    println!("   Idle after flush: {}", pool.idle_count());
    println!("   Metrics: {:?}\n", pool.metrics());
}
