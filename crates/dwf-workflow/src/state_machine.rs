//! UPS状态机
//!
//! 管理统一过程步骤 (UPS) 的生命周期状态转换

use dwf_core::{DwfError, Result, UpsStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// UPS状态转换事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UpsEvent {
    Start,
    Complete,
    Fail,
    Cancel,
}

impl UpsEvent {
    /// 由目标状态推出事件，未知或初始状态没有对应事件
    pub fn for_target(target: &UpsStatus) -> Option<Self> {
        match target {
            UpsStatus::InProgress => Some(Self::Start),
            UpsStatus::Completed => Some(Self::Complete),
            UpsStatus::Failed => Some(Self::Fail),
            UpsStatus::Cancelled => Some(Self::Cancel),
            UpsStatus::Scheduled | UpsStatus::Other(_) => None,
        }
    }
}

/// UPS状态机
#[derive(Debug)]
pub struct UpsStateMachine {
    transitions: HashMap<(UpsStatus, UpsEvent), UpsStatus>,
}

impl UpsStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((UpsStatus::Scheduled, UpsEvent::Start), UpsStatus::InProgress);
        transitions.insert((UpsStatus::Scheduled, UpsEvent::Cancel), UpsStatus::Cancelled);
        transitions.insert((UpsStatus::InProgress, UpsEvent::Complete), UpsStatus::Completed);
        transitions.insert((UpsStatus::InProgress, UpsEvent::Fail), UpsStatus::Failed);
        transitions.insert((UpsStatus::InProgress, UpsEvent::Cancel), UpsStatus::Cancelled);

        Self { transitions }
    }

    pub fn can_transition(&self, from: &UpsStatus, event: &UpsEvent) -> bool {
        self.transitions.contains_key(&(from.clone(), event.clone()))
    }

    /// 执行状态转换
    pub fn transition(&self, from: &UpsStatus, event: &UpsEvent) -> Result<UpsStatus> {
        match self.transitions.get(&(from.clone(), event.clone())) {
            Some(to) => Ok(to.clone()),
            None => Err(DwfError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            }),
        }
    }

    /// 按目标状态转换
    pub fn transition_to(&self, from: &UpsStatus, target: &UpsStatus) -> Result<UpsStatus> {
        let event = UpsEvent::for_target(target).ok_or_else(|| DwfError::InvalidStateTransition {
            from: from.to_string(),
            event: target.to_string(),
        })?;
        self.transition(from, &event)
    }

    /// 获取状态的所有可能事件
    pub fn get_possible_events(&self, current: &UpsStatus) -> Vec<UpsEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| state == current)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Default for UpsStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = UpsStateMachine::new();

        assert!(sm.can_transition(&UpsStatus::Scheduled, &UpsEvent::Start));
        assert!(sm.can_transition(&UpsStatus::InProgress, &UpsEvent::Complete));
        assert!(sm.can_transition(&UpsStatus::InProgress, &UpsEvent::Fail));
        assert!(sm.can_transition(&UpsStatus::Scheduled, &UpsEvent::Cancel));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let sm = UpsStateMachine::new();

        for status in [UpsStatus::Completed, UpsStatus::Failed, UpsStatus::Cancelled] {
            assert!(sm.get_possible_events(&status).is_empty());
        }
        assert!(!sm.can_transition(&UpsStatus::Scheduled, &UpsEvent::Complete));
    }

    #[test]
    fn test_transition_to_target() {
        let sm = UpsStateMachine::new();

        let next = sm.transition_to(&UpsStatus::Scheduled, &UpsStatus::InProgress).unwrap();
        assert_eq!(next, UpsStatus::InProgress);

        let err = sm
            .transition_to(&UpsStatus::Completed, &UpsStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, DwfError::InvalidStateTransition { .. }));

        // 回到 SCHEDULED 没有对应事件
        assert!(sm.transition_to(&UpsStatus::InProgress, &UpsStatus::Scheduled).is_err());
    }
}
