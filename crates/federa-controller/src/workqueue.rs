//! 去重工作队列
//!
//! 观察事件只负责把键放入队列，由固定数量的 worker 取出并调用协调函数。
//! 同一个键不会被两个 worker 同时处理：处理期间再次加入的键会被标记为“脏”，
//! 在处理结束后重新入队。不同的键可以并行处理。
//!
//! 每个键最多只有一个延迟入队的计时器：新的 `add_after` 会取消同一个键上
//! 尚未触发的计时器，因此重新同步与失败重试不会随事件数量叠加。

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::utils::ItemBackoff;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    timers: HashMap<K, (u64, JoinHandle<()>)>,
    next_timer: u64,
    shutting_down: bool,
}

/// 按键去重的工作队列
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// 创建空队列
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                timers: HashMap::new(),
                next_timer: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 加入一个键；已在队列中的键会被合并
    pub fn add(&self, key: K) {
        {
            let mut state = self.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                // 处理结束后由 done 重新入队
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_waiters();
    }

    /// 延迟一段时间后加入一个键，替换该键上尚未触发的计时器
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        state.next_timer = state.next_timer.wrapping_add(1);
        let id = state.next_timer;

        let queue = Arc::clone(self);
        let timer_key = key.clone();
        // 计时器触发时需要先拿到锁，登记完成之前不会执行
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.take_timer(&timer_key, id) {
                queue.add(timer_key);
            }
        });

        if let Some((_, previous)) = state.timers.insert(key, (id, handle)) {
            previous.abort();
        }
    }

    fn take_timer(&self, key: &K, id: u64) -> bool {
        let mut state = self.lock();
        match state.timers.get(key) {
            Some((current, _)) if *current == id => {
                state.timers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// 尚未触发的延迟入队计时器数量
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// 取出下一个键；队列关闭后返回 `None`
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// 标记一个键处理完毕
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_waiters();
        }
    }

    /// 关闭队列，唤醒所有等待中的 worker
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
            for (_, (_, timer)) in state.timers.drain() {
                timer.abort();
            }
        }
        self.notify.notify_waiters();
    }

    /// 队列中等待处理的键数量
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 启动 `workers` 个 worker 消费队列，直到队列关闭
///
/// 协调成功后清除退避记录，并在 `resync` 之后再次入队；
/// 协调失败时按退避延迟重新入队。两种情况都会替换该键上已有的计时器。
pub async fn run_workers<K, F, Fut, E>(
    queue: Arc<WorkQueue<K>>,
    backoff: Arc<ItemBackoff<K>>,
    workers: usize,
    resync: Duration,
    reconcile: F,
) where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    F: Fn(K) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let handles: Vec<_> = (0..workers.max(1))
        .map(|worker| {
            let queue = Arc::clone(&queue);
            let backoff = Arc::clone(&backoff);
            let reconcile = reconcile.clone();
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    match reconcile(key.clone()).await {
                        Ok(()) => {
                            debug!(worker, key = %key, "协调完成");
                            backoff.forget(&key);
                            queue.add_after(key.clone(), resync);
                        }
                        Err(e) => {
                            let delay = backoff.next_delay(&key);
                            warn!(worker, key = %key, error = %e, retry_in = ?delay, "协调失败，稍后重试");
                            queue.add_after(key.clone(), delay);
                        }
                    }
                    queue.done(&key);
                }
            })
        })
        .collect();

    futures::future::join_all(handles).await;
}
