//! 合并加锁测试套件
//!
//! 同一客户端上并发的加锁请求只访问一次 Redis，所有调用方共享同一把锁。

use crate::setup::TestEnvironment;
use futures::future::join_all;
use redis_lock::{CancellationToken, FixedIntervalRetry, LockError, NoRetry};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod single_flight_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_concurrent_callers_share_one_lock() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("single-flight");
        let client = Arc::new(env.client());

        let calls = (0..20).map(|_| {
            let client = client.clone();
            let key = key.clone();
            async move {
                let cancel = CancellationToken::new();
                client
                    .single_flight_lock(
                        &key,
                        Duration::from_secs(5),
                        Arc::new(NoRetry),
                        Duration::from_millis(500),
                        &cancel,
                    )
                    .await
            }
        });
        let locks: Vec<_> = join_all(calls)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        let first = &locks[0];
        assert!(locks.iter().all(|lock| Arc::ptr_eq(lock, first)));
        assert_eq!(env.stored_token(&key).await.unwrap().as_deref(), Some(first.token()));

        first.unlock().await.unwrap();
        env.cleanup().await.unwrap();
    }

    /// 不同客户端之间不合并，仍然互斥
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_separate_clients_still_contend() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("single-flight-contend");
        let a = env.client();
        let b = env.client();
        let cancel = CancellationToken::new();
        let retry = Arc::new(FixedIntervalRetry::new(Duration::from_millis(20), 2));

        let (ra, rb) = tokio::join!(
            a.single_flight_lock(&key, Duration::from_secs(5), retry.clone(), Duration::from_millis(500), &cancel),
            b.single_flight_lock(&key, Duration::from_secs(5), retry.clone(), Duration::from_millis(500), &cancel),
        );

        let (winner, loser) = match (ra, rb) {
            (Ok(lock), Err(e)) | (Err(e), Ok(lock)) => (lock, e),
            (ra, rb) => panic!("exactly one client should win: {ra:?} / {rb:?}"),
        };
        assert!(matches!(loser, LockError::AcquisitionFailed { .. }));

        winner.unlock().await.unwrap();
        env.cleanup().await.unwrap();
    }
}
