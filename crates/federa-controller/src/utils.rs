//! 控制平面工具函数
//!
//! 包括按键的指数退避计算以及错误链的格式化。

use rand::Rng;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// 默认初始退避
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// 默认退避上限
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// 默认周期性重新同步间隔，远大于退避上限
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(180);

/// 抖动比例上限
const JITTER_FACTOR: f64 = 0.1;

/// 按键记录失败次数的指数退避
///
/// 第 n 次失败的延迟为 `base * 2^n`，不超过 `max`，再加上至多 10% 的随机抖动，
/// 避免大量资源在同一时刻集中重新验证。
#[derive(Debug)]
pub struct ItemBackoff<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemBackoff<K> {
    /// 创建新的退避计算器
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一次失败并返回下一次重试前的延迟
    pub fn next_delay(&self, key: &K) -> Duration {
        let attempts = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(key.clone()).or_insert(0);
            let attempts = *count;
            *count = count.saturating_add(1);
            attempts
        };

        let exp = 2u32.saturating_pow(attempts.min(31));
        let delay = self.base.saturating_mul(exp).min(self.max);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FACTOR);
        delay.saturating_add(delay.mul_f64(jitter))
    }

    /// 成功后清除该键的失败记录
    pub fn forget(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// 当前记录的失败次数
    pub fn failures(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl<K: Eq + Hash + Clone> Default for ItemBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

/// 将错误及其全部来源连接为一行，保留底层错误原文
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
