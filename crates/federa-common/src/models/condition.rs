//! 条件集合模型
//!
//! 条件（Condition）是一个带有名称的健康检查结果，包含状态、机器可读的原因
//! 以及面向运维人员的消息。一个资源的全部条件组成有序的 `ConditionSet`，
//! 同一类型在集合中只出现一次，消费者按 `type` 匹配，顺序没有语义。

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 汇总条件类型
pub const TYPE_READY: &str = "Ready";

/// 检查通过时使用的原因
pub const REASON_SUCCESS: &str = "Success";

/// 汇总条件未就绪时使用的原因
pub const REASON_NOT_READY: &str = "NotReady";

/// 前置阶段失败、本阶段未执行时使用的原因
pub const REASON_UNABLE_TO_VALIDATE: &str = "UnableToValidate";

/// 前置阶段失败、本阶段未执行时使用的消息
pub const MESSAGE_UNABLE_TO_VALIDATE: &str = "unable to validate; see other conditions for details";

/// 条件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// 检查通过
    True,
    /// 检查失败
    False,
    /// 未能执行检查
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// 单个条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// 条件类型，在集合内唯一
    #[serde(rename = "type")]
    pub type_: String,
    /// 条件状态
    pub status: ConditionStatus,
    /// 机器可读的原因
    pub reason: String,
    /// 人类可读的消息
    pub message: String,
    /// 状态最近一次变化的时间（RFC3339）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// 计算该条件时资源的 generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// 创建一个检查通过的条件
    pub fn success(type_: &str, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, REASON_SUCCESS, message)
    }

    /// 创建一个检查失败的条件
    pub fn failure(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, reason, message)
    }

    /// 创建一个未能检查的条件
    pub fn unknown(type_: &str) -> Self {
        Self::new(
            type_,
            ConditionStatus::Unknown,
            REASON_UNABLE_TO_VALIDATE,
            MESSAGE_UNABLE_TO_VALIDATE,
        )
    }

    fn new(type_: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    /// 条件是否为 True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// 资源的整体阶段，用于粗粒度过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    /// 全部条件通过
    Ready,
    /// 至少一个条件未通过
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ready => write!(f, "Ready"),
            Phase::Error => write!(f, "Error"),
        }
    }
}

/// 有序的条件集合，类型唯一
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入条件；同类型的旧条件被原位替换
    pub fn set(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    /// 按类型查找条件
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// 遍历条件
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    /// 条件数量
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// 集合是否为空
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// 除 `Ready` 以外的所有条件是否都为 True
    pub fn all_true(&self) -> bool {
        self.conditions
            .iter()
            .filter(|c| c.type_ != TYPE_READY)
            .all(Condition::is_true)
    }

    /// 转换为条件列表
    pub fn into_vec(self) -> Vec<Condition> {
        self.conditions
    }
}

/// 单次协调得到的验证结果
///
/// 每次协调都重新创建，从不增量修改。创建时所有阶段先被标记为
/// `Unknown/UnableToValidate`，因此提前结束的流程仍然产生一组完整的条件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// 条件集合
    pub conditions: ConditionSet,
    /// 整体阶段
    pub phase: Phase,
}

impl ValidationOutcome {
    /// 以给定阶段类型创建一个全部为 Unknown 的结果
    pub fn pending(types: &[&str]) -> Self {
        let mut conditions = ConditionSet::new();
        for type_ in types {
            conditions.set(Condition::unknown(type_));
        }
        Self {
            conditions,
            phase: Phase::Error,
        }
    }

    /// 写入某个阶段的结果
    pub fn set(&mut self, condition: Condition) {
        self.conditions.set(condition);
    }

    /// 计算 `Ready` 汇总条件与整体阶段
    ///
    /// `kind` 为资源类型名称，例如 `JWTAuthenticator`。
    pub fn finish(mut self, kind: &str) -> Self {
        if self.conditions.all_true() {
            self.conditions
                .set(Condition::success(TYPE_READY, format!("the {kind} is ready")));
            self.phase = Phase::Ready;
        } else {
            self.conditions.set(Condition::failure(
                TYPE_READY,
                REASON_NOT_READY,
                format!("the {kind} is not ready: see other conditions for details"),
            ));
            self.phase = Phase::Error;
        }
        self
    }

    /// 是否就绪
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}

/// 将新计算的条件与资源上已有的条件合并
///
/// 状态未变化的条件保留原有的 `lastTransitionTime`，
/// 状态变化（或原先不存在）的条件使用 `now`。
pub fn merge_conditions(
    computed: &[Condition],
    existing: &[Condition],
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);

    computed
        .iter()
        .map(|condition| {
            let previous = existing.iter().find(|c| c.type_ == condition.type_);
            let last_transition_time = match previous {
                Some(prev) if prev.status == condition.status => prev
                    .last_transition_time
                    .clone()
                    .or_else(|| Some(now.clone())),
                _ => Some(now.clone()),
            };

            Condition {
                last_transition_time,
                observed_generation,
                ..condition.clone()
            }
        })
        .collect()
}
