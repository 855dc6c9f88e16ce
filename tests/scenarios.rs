//! End-to-end acquire / release / flush scenarios

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use recycling_objectpool::{
    BoxError, ExecutionContext, Pool, PoolError, PoolOption, PoolRegistry, RecycleStrategy,
    TimeStrategy,
};
use tokio::time::Instant;

#[derive(Debug)]
struct Client {
    id: usize,
}

struct Counters {
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl Counters {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        })
    }
}

fn client_pool(option: PoolOption, counters: &Arc<Counters>) -> Pool<Client> {
    let created = Arc::clone(counters);
    let destroyed = Arc::clone(counters);
    Pool::builder(move || {
        let id = created.created.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BoxError>(Client { id })
    })
    .option(option)
    .destroy_hook(move |_client| {
        destroyed.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BoxError>(())
    })
    .build()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn third_get_times_out_when_both_objects_are_held() {
    let counters = Counters::new();
    let option = PoolOption::new()
        .with_min_objects(1)
        .with_max_objects(2)
        .with_wait_timeout(Duration::from_secs(1))
        .with_max_lifetime(Duration::ZERO);
    let pool = client_pool(option, &counters);

    let first = pool.get().await.unwrap();
    let second = pool.get().await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(pool.current_object_number(), 2);

    let started = Instant::now();
    let third = pool.get().await;

    assert!(matches!(third, Err(PoolError::Exhausted(timeout)) if timeout == Duration::from_secs(1)));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(pool.current_object_number(), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_object_is_replaced_with_a_fresh_one() {
    let counters = Counters::new();
    let pool = client_pool(
        PoolOption::new().with_max_lifetime(Duration::from_secs(5)),
        &counters,
    );

    let original = pool.get().await.unwrap();
    let original_id = original.id;
    pool.release(original);

    tokio::time::advance(Duration::from_secs(6)).await;
    let replacement = pool.get().await.unwrap();

    assert_ne!(replacement.id, original_id);
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.current_object_number(), 1);
}

#[tokio::test]
async fn flush_shrinks_to_min_objects() {
    let counters = Counters::new();
    let pool = client_pool(
        PoolOption::new().with_min_objects(1).with_max_objects(5),
        &counters,
    );

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.get().await.unwrap());
    }
    drop(held);
    assert_eq!(pool.idle_count(), 5);

    assert_eq!(pool.flush().await, 4);
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 4);
    assert_eq!(pool.current_object_number(), 1);
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn time_strategy_pass_on_real_pool() {
    let counters = Counters::new();
    let pool = client_pool(
        PoolOption::new()
            .with_min_objects(0)
            .with_max_objects(4)
            .with_max_lifetime(Duration::from_secs(5)),
        &counters,
    );
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.get().await.unwrap());
    }
    drop(held);

    pool.set_last_recycled_at(Some(Instant::now()));
    tokio::time::advance(Duration::from_secs(11)).await;

    let strategy = TimeStrategy::new(Duration::from_secs(10), 0.5);
    assert!(strategy.should_recycle(&pool));
    strategy.recycle(&pool).await;

    // floor(0.5 * 4) + 1 attempts, every idle object is past its lifetime
    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 3);
    assert_eq!(pool.current_object_number(), 1);
    assert_eq!(pool.last_recycled_at(), Some(Instant::now()));
    assert!(!strategy.should_recycle(&pool));
}

#[tokio::test]
async fn zero_ratio_pass_evicts_nothing_fresh() {
    let counters = Counters::new();
    let pool = client_pool(PoolOption::new().with_min_objects(0), &counters);
    let object = pool.get().await.unwrap();
    pool.release(object);

    TimeStrategy::new(Duration::from_secs(10), 0.0)
        .recycle(&pool)
        .await;

    assert_eq!(counters.destroyed.load(Ordering::SeqCst), 0);
    assert_eq!(pool.idle_count(), 1);
    assert!(pool.last_recycled_at().is_some());
}

#[tokio::test]
async fn failing_destroy_hook_still_frees_the_slot() {
    let pool = Pool::builder(|| Ok::<_, BoxError>(Client { id: 0 }))
        .option(PoolOption::new().with_min_objects(0))
        .destroy_hook(|client: Client| Err(format!("cannot close client {}", client.id)))
        .build()
        .unwrap();
    let object = pool.get().await.unwrap();
    pool.release(object);

    assert!(pool.flush_one(true).await);
    assert_eq!(pool.current_object_number(), 0);
    assert_eq!(pool.metrics().destroy_failures, 1);
    assert_eq!(pool.metrics().destroyed, 1);
}

#[tokio::test]
async fn duplicate_pool_name_leaves_first_pool_untouched() {
    let registry = PoolRegistry::new();
    let first = registry
        .create("x", || Ok::<_, BoxError>(Client { id: 1 }), PoolOption::default())
        .unwrap();
    let held = first.get().await.unwrap();

    let second = registry.create("x", || Ok::<_, BoxError>(Client { id: 2 }), PoolOption::default());
    assert!(matches!(second, Err(PoolError::DuplicatePool(_))));

    let looked_up = registry.get::<Client>("x").unwrap();
    assert_eq!(looked_up.current_object_number(), 1);
    drop(held);
    assert_eq!(looked_up.get().await.unwrap().id, 1);
}

#[test]
fn sequential_pool_works_without_a_runtime() {
    let counters = Counters::new();
    let created = Arc::clone(&counters);
    let pool = Pool::builder(move || {
        Ok::<_, BoxError>(Client {
            id: created.created.fetch_add(1, Ordering::SeqCst),
        })
    })
    .option(
        PoolOption::new()
            .with_min_objects(0)
            .with_max_objects(2)
            .with_wait_timeout(Duration::from_secs(10)),
    )
    .context(ExecutionContext::Sequential)
    .build()
    .unwrap();

    let a = futures::executor::block_on(pool.get()).unwrap();
    let b = futures::executor::block_on(pool.get()).unwrap();
    assert!(matches!(
        futures::executor::block_on(pool.get()),
        Err(PoolError::Exhausted(_))
    ));

    let a_id = a.id;
    pool.release(a);
    assert_eq!(futures::executor::block_on(pool.get()).unwrap().id, a_id);

    drop(b);
    assert_eq!(futures::executor::block_on(pool.flush()), 2);
    assert_eq!(pool.current_object_number(), 0);
}

#[tokio::test]
async fn flush_one_never_goes_below_min_objects() {
    let counters = Counters::new();
    let pool = client_pool(
        PoolOption::new().with_min_objects(2).with_max_objects(4),
        &counters,
    );
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.get().await.unwrap());
    }
    drop(held);

    for _ in 0..10 {
        pool.flush_one(true).await;
        assert!(pool.current_object_number() >= 2);
        assert!(pool.idle_count() <= pool.current_object_number());
    }
    assert_eq!(pool.current_object_number(), 2);
}
