//! 加锁测试套件
//!
//! 验证单次加锁、竞争、租约过期和重试加锁在真实 Redis 上的行为。

use crate::setup::TestEnvironment;
use redis_lock::{CancellationToken, FixedIntervalRetry, LockError, NoRetry};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(test)]
mod try_lock_tests {
    use super::*;

    /// 空闲的锁可以立即获得，存储中写入的是锁的令牌
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_try_lock_writes_token_with_lease() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("try-lock");
        let client = env.client();

        let lock = client.try_lock(&key, Duration::from_secs(5)).await.unwrap();

        assert_eq!(lock.key(), env.stored_key(&key));
        assert_eq!(env.stored_token(&key).await.unwrap().as_deref(), Some(lock.token()));
        let remaining = env.remaining_lease(&key).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));

        lock.unlock().await.unwrap();
        assert_eq!(env.stored_token(&key).await.unwrap(), None);
        env.cleanup().await.unwrap();
    }

    /// 锁被另一个客户端持有时立即失败，不修改存储
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_try_lock_contended() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("contended");
        let holder = env.client();
        let contender = env.client();

        let lock = holder.try_lock(&key, Duration::from_secs(5)).await.unwrap();
        let err = contender
            .try_lock(&key, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::AcquisitionFailed { .. }));
        assert_eq!(env.stored_token(&key).await.unwrap().as_deref(), Some(lock.token()));

        lock.unlock().await.unwrap();
        env.cleanup().await.unwrap();
    }

    /// 持有者不续约也不释放时，租约到期后其他客户端可以获得锁
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_lock_becomes_available_after_lease_expires() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("expiry");
        let holder = env.client();
        let contender = env.client();

        let stale = holder.try_lock(&key, Duration::from_millis(300)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let lock = contender.try_lock(&key, Duration::from_secs(5)).await.unwrap();
        assert_ne!(lock.token(), stale.token());

        // 过期的持有者既不能续约也不能删除新持有者的锁
        assert!(matches!(stale.refresh().await, Err(LockError::NotHeld { .. })));
        assert!(matches!(stale.unlock().await, Err(LockError::NotHeld { .. })));
        assert_eq!(env.stored_token(&key).await.unwrap().as_deref(), Some(lock.token()));

        lock.unlock().await.unwrap();
        env.cleanup().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_zero_and_sub_millisecond_leases_are_rejected() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("zero-lease");

        let err = env.client().try_lock(&key, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));

        // 不足 1 毫秒的租约在 Redis 端会变成 PX 0
        let err = env
            .client()
            .try_lock(&key, Duration::from_micros(900))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
        assert_eq!(env.stored_token(&key).await.unwrap(), None);
        env.cleanup().await.unwrap();
    }
}

#[cfg(test)]
mod retry_lock_tests {
    use super::*;

    /// 持有者在重试期间释放，等待者随后获得锁
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_lock_waits_for_release() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("wait-release");
        let holder = env.client();
        let waiter = env.client();

        let lock = Arc::new(holder.try_lock(&key, Duration::from_secs(5)).await.unwrap());
        let releaser = {
            let lock = lock.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                lock.unlock().await
            })
        };

        let cancel = CancellationToken::new();
        let acquired = waiter
            .lock(
                &key,
                Duration::from_secs(5),
                Arc::new(FixedIntervalRetry::new(Duration::from_millis(50), 20)),
                Duration::from_millis(500),
                &cancel,
            )
            .await
            .unwrap();

        releaser.await.unwrap().unwrap();
        assert_eq!(
            env.stored_token(&key).await.unwrap().as_deref(),
            Some(acquired.token())
        );

        acquired.unlock().await.unwrap();
        env.cleanup().await.unwrap();
    }

    /// 重试次数用尽后返回 AcquisitionFailed
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_lock_exhausts_retries() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("exhausted");
        env.occupy(&key, "someone-else", Duration::from_secs(10))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let started = Instant::now();
        let err = env
            .client()
            .lock(
                &key,
                Duration::from_secs(5),
                Arc::new(FixedIntervalRetry::new(Duration::from_millis(50), 3)),
                Duration::from_millis(500),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::AcquisitionFailed { .. }));
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(
            env.stored_token(&key).await.unwrap().as_deref(),
            Some("someone-else")
        );
        env.cleanup().await.unwrap();
    }

    /// 取消令牌在退避等待期间触发，立即返回 Cancelled
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_lock_cancelled_while_waiting() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("cancelled");
        env.occupy(&key, "someone-else", Duration::from_secs(10))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            });
        }

        let started = Instant::now();
        let err = env
            .client()
            .lock(
                &key,
                Duration::from_secs(5),
                Arc::new(FixedIntervalRetry::new(Duration::from_secs(5), 10)),
                Duration::from_millis(500),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        env.cleanup().await.unwrap();
    }

    /// NoRetry 等价于单次加锁
    #[tokio::test]
    #[ignore = "需要运行 Redis"]
    async fn test_lock_with_no_retry() {
        let mut env = TestEnvironment::setup().await.unwrap();
        let key = env.key("no-retry");
        env.occupy(&key, "someone-else", Duration::from_secs(10))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let err = env
            .client()
            .lock(
                &key,
                Duration::from_secs(5),
                Arc::new(NoRetry),
                Duration::from_millis(500),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::AcquisitionFailed { .. }));
        env.cleanup().await.unwrap();
    }
}
