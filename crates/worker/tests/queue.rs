//! Integration tests for the digest worker against Redis.
//!
//! Requires a running Redis with `REDIS_URL` env var set.
//! Run with:
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p courier-worker --test queue -- --ignored --nocapture
//! ```

use std::sync::Arc;

use redis::AsyncCommands;
use uuid::Uuid;

use courier_common::redis_pool::create_redis_pool;
use courier_engine::DigestCoordinator;
use courier_engine::audit::InMemoryAuditLog;
use courier_engine::flags::StaticFlagResolver;
use courier_engine::store::InMemoryJobStore;
use courier_worker::queue::{DeadLetter, DigestWorker, dead_letter_key};

#[tokio::test]
#[ignore]
async fn test_handle_pushes_failed_command_to_dead_letter_list() {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let mut redis = create_redis_pool(&redis_url).await.unwrap();
    let queue_key = format!("test:digest:{}", Uuid::new_v4());

    let coordinator = DigestCoordinator::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(StaticFlagResolver(false)),
        Arc::new(InMemoryAuditLog::new()),
    );
    let mut worker = DigestWorker::new(Arc::new(coordinator), redis.clone(), queue_key.clone(), 100);

    worker.handle("{\"job_id\": 1}").await.unwrap();

    let entries: Vec<String> = redis.lrange(dead_letter_key(&queue_key), 0, -1).await.unwrap();
    let _: () = redis.del(dead_letter_key(&queue_key)).await.unwrap();

    assert_eq!(entries.len(), 1);
    let entry: DeadLetter = serde_json::from_str(&entries[0]).unwrap();
    assert_eq!(entry.command, "{\"job_id\": 1}");
    assert!(!entry.transient);
}
