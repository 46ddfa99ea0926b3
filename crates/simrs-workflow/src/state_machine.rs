//! 号票状态机
//!
//! 号票只能向前流转：
//! Waiting → Called → Serving → Completed，Waiting/Called 可过号 (Skipped)。

use serde::{Deserialize, Serialize};
use simrs_core::{QueueStatus, Result, SimrsError};
use std::collections::HashMap;

/// 号票状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    Call,
    Serve,
    Complete,
    Skip,
}

impl QueueEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEvent::Call => "call",
            QueueEvent::Serve => "serve",
            QueueEvent::Complete => "complete",
            QueueEvent::Skip => "skip",
        }
    }
}

/// 号票状态机
#[derive(Debug)]
pub struct QueueStateMachine {
    transitions: HashMap<(QueueStatus, QueueEvent), QueueStatus>,
}

impl QueueStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((QueueStatus::Waiting, QueueEvent::Call), QueueStatus::Called);
        transitions.insert((QueueStatus::Called, QueueEvent::Serve), QueueStatus::Serving);
        transitions.insert((QueueStatus::Serving, QueueEvent::Complete), QueueStatus::Completed);
        transitions.insert((QueueStatus::Waiting, QueueEvent::Skip), QueueStatus::Skipped);
        transitions.insert((QueueStatus::Called, QueueEvent::Skip), QueueStatus::Skipped);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: QueueStatus, event: QueueEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: QueueStatus, event: QueueEvent) -> Result<QueueStatus> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(SimrsError::InvalidStateTransition {
                from: from.to_string(),
                event: event.as_str().to_string(),
            }),
        }
    }

    /// 当前状态下可执行的事件
    pub fn possible_events(&self, current: QueueStatus) -> Vec<QueueEvent> {
        let mut events: Vec<QueueEvent> = self
            .transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect();
        events.sort_by_key(|e| e.as_str());
        events
    }
}

impl Default for QueueStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = QueueStateMachine::new();

        assert!(sm.can_transition(QueueStatus::Waiting, QueueEvent::Call));
        assert!(sm.can_transition(QueueStatus::Called, QueueEvent::Serve));
        assert!(sm.can_transition(QueueStatus::Serving, QueueEvent::Complete));
        assert!(sm.can_transition(QueueStatus::Called, QueueEvent::Skip));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = QueueStateMachine::new();

        // 只能向前
        assert!(!sm.can_transition(QueueStatus::Serving, QueueEvent::Call));
        assert!(!sm.can_transition(QueueStatus::Serving, QueueEvent::Skip));
        assert!(!sm.can_transition(QueueStatus::Waiting, QueueEvent::Serve));
        for event in [QueueEvent::Call, QueueEvent::Serve, QueueEvent::Complete, QueueEvent::Skip] {
            assert!(!sm.can_transition(QueueStatus::Completed, event));
            assert!(!sm.can_transition(QueueStatus::Skipped, event));
        }
    }

    #[test]
    fn test_state_execution() {
        let sm = QueueStateMachine::new();

        assert_eq!(sm.transition(QueueStatus::Waiting, QueueEvent::Call).unwrap(), QueueStatus::Called);
        match sm.transition(QueueStatus::Completed, QueueEvent::Skip) {
            Err(SimrsError::InvalidStateTransition { from, event }) => {
                assert_eq!(from, "completed");
                assert_eq!(event, "skip");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            sm.possible_events(QueueStatus::Waiting),
            vec![QueueEvent::Call, QueueEvent::Skip]
        );
    }
}
