//! 合并调用（single flight）
//!
//! 同一个 key 上并发的多个调用只真正执行一次，所有等待者拿到同一个结果。
//!
//! 真正的调用运行在独立的 tokio 任务中，并带有一个属于这次合并调用本身的取消令牌：
//! 只有当所有等待者都已离开、调用仍未完成时，这个令牌才会触发。
//! 每个等待者各自监听自己的取消令牌，离开时不影响其他等待者。
//!
//! 调用完成时如果已经没有任何等待者能拿到结果，结果交给孤儿处理器，
//! 例如释放一把已经没人持有的锁。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type OrphanHandler<V> = Arc<dyn Fn(V) + Send + Sync>;

/// 等待合并调用时的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlightError {
    /// 等待者自己的取消令牌先触发
    #[error("等待被取消")]
    Cancelled,

    /// 执行调用的任务异常终止（panic）
    #[error("合并调用异常终止")]
    Aborted,
}

/// 一次进行中的合并调用
struct Flight<V> {
    state: Mutex<FlightState<V>>,
    /// 调用完成（包括 panic）后触发
    done: CancellationToken,
    /// 所有等待者离开后触发，传给调用本身
    abandoned: CancellationToken,
}

struct FlightState<V> {
    /// 尚未拿到结果、也未离开的等待者数
    waiters: usize,
    /// 是否已有等待者拿到结果
    delivered: bool,
    /// `None` 表示未完成，`Some(None)` 表示任务 panic
    outcome: Option<Option<V>>,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState {
                waiters: 0,
                delivered: false,
                outcome: None,
            }),
            done: CancellationToken::new(),
            abandoned: CancellationToken::new(),
        }
    }
}

struct Inner<V> {
    calls: Mutex<HashMap<String, Arc<Flight<V>>>>,
    on_orphan: Option<OrphanHandler<V>>,
}

impl<V> Inner<V> {
    /// 表中的条目仍是这次调用时才移除，避免误删之后新开始的调用
    fn remove_if_current(calls: &mut HashMap<String, Arc<Flight<V>>>, key: &str, flight: &Arc<Flight<V>>) {
        if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, flight)) {
            calls.remove(key);
        }
    }

    fn orphan(&self, value: V) {
        if let Some(handler) = &self.on_orphan {
            handler(value);
        }
    }

    /// 调用结束：记录结果并唤醒等待者；没有等待者时结果成为孤儿
    fn finish(&self, key: &str, flight: &Arc<Flight<V>>, outcome: Option<V>) {
        let orphan = {
            let mut calls = self.calls.lock();
            Self::remove_if_current(&mut calls, key, flight);

            let mut state = flight.state.lock();
            if state.waiters == 0 {
                outcome
            } else {
                state.outcome = Some(outcome);
                None
            }
        };
        flight.done.cancel();

        if let Some(value) = orphan {
            debug!(key = %key, "Flight finished with no waiters left");
            self.orphan(value);
        }
    }
}

/// 按 key 合并并发调用
///
/// 由使用方持有（例如每个 `LockClient` 一个），不是进程级单例。
pub struct SingleFlight<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(HashMap::new()),
                on_orphan: None,
            }),
        }
    }
}

/// 一个等待者的登记，未拿到结果就被丢弃时注销
struct Waiter<V> {
    inner: Arc<Inner<V>>,
    flight: Arc<Flight<V>>,
    key: String,
    received: bool,
}

impl<V: Clone> Waiter<V> {
    fn receive(&mut self) -> Result<V, FlightError> {
        let mut state = self.flight.state.lock();
        self.received = true;
        state.waiters -= 1;
        state.delivered = true;
        match &state.outcome {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(FlightError::Aborted),
        }
    }
}

impl<V> Drop for Waiter<V> {
    fn drop(&mut self) {
        if self.received {
            return;
        }

        let orphan = {
            let mut calls = self.inner.calls.lock();
            let mut state = self.flight.state.lock();
            state.waiters -= 1;

            if state.waiters > 0 || state.delivered {
                None
            } else if state.outcome.is_none() {
                // 最后一个等待者离开：放弃调用，之后的调用重新开始
                Inner::remove_if_current(&mut calls, &self.key, &self.flight);
                self.flight.abandoned.cancel();
                None
            } else {
                state.outcome.take().flatten()
            }
        };

        if let Some(value) = orphan {
            debug!(key = %self.key, "Last waiter left before taking the result");
            self.inner.orphan(value);
        }
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置孤儿处理器
    ///
    /// 调用完成时已没有等待者，或最后一个等待者在取走结果前离开，结果会交给 `handler`。
    pub fn with_orphan_handler(handler: impl Fn(V) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(HashMap::new()),
                on_orphan: Some(Arc::new(handler)),
            }),
        }
    }

    /// 当前正在执行的调用数
    pub fn in_flight(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// 执行或加入 `key` 上正在进行的调用
    ///
    /// 只有第一个到达的调用方的 `f` 会被执行，它拿到这次合并调用自己的取消令牌；
    /// 其余调用方等待同一个结果。`cancel` 先触发时返回 `FlightError::Cancelled`，
    /// 只要还有其他等待者，进行中的调用就不受影响。
    pub async fn call<F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<V, FlightError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut calls = self.inner.calls.lock();
            let flight = match calls.get(key) {
                Some(existing) => {
                    debug!(key = %key, "Joining in-flight call");
                    metrics::counter!("lock_single_flight_shared_total").increment(1);
                    existing.clone()
                }
                None => {
                    let flight = Arc::new(Flight::new());
                    calls.insert(key.to_string(), flight.clone());
                    self.spawn(key, &flight, f(flight.abandoned.clone()));
                    flight
                }
            };
            flight.state.lock().waiters += 1;
            flight
        };

        let done = flight.done.clone();
        let mut waiter = Waiter {
            inner: self.inner.clone(),
            flight,
            key: key.to_string(),
            received: false,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FlightError::Cancelled),
            _ = done.cancelled() => waiter.receive(),
        }
    }

    /// 在独立任务中运行调用；外层任务负责收尾，内层 panic 也能被记录
    fn spawn<Fut>(&self, key: &str, flight: &Arc<Flight<V>>, fut: Fut)
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let inner = self.inner.clone();
        let flight = flight.clone();
        let key = key.to_string();
        let handle = tokio::spawn(fut);
        tokio::spawn(async move {
            let outcome = handle.await.ok();
            inner.finish(&key, &flight, outcome);
        });
    }
}
