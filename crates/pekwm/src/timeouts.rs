//! Timeout wheel: a sorted set of `(key, deadline)` actions, used by the
//! `pekwm_sys` reactor to know how long it can safely block in `select`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutAction {
    pub key: i64,
    pub deadline: Instant,
}

impl TimeoutAction {
    pub fn new(key: i64, deadline: Instant) -> TimeoutAction {
        TimeoutAction { key, deadline }
    }
}

/// Always kept sorted ascending by `deadline`; `_actions[0]` is the next
/// thing due to fire. Keys are unique: [`Timeouts::replace`] removes any
/// prior action under the same key before inserting the new one.
#[derive(Default)]
pub struct Timeouts {
    actions: Vec<TimeoutAction>,
}

impl Timeouts {
    pub fn new() -> Timeouts {
        Timeouts::default()
    }

    /// Insert `action` at its sorted position.
    pub fn add(&mut self, action: TimeoutAction) {
        let pos = self
            .actions
            .iter()
            .position(|a| a.deadline > action.deadline)
            .unwrap_or(self.actions.len());
        self.actions.insert(pos, action);
    }

    pub fn add_in(&mut self, key: i64, timeout: Duration) {
        self.add(TimeoutAction::new(key, Instant::now() + timeout));
    }

    /// Remove any existing action with `action.key`, then insert it.
    pub fn replace(&mut self, action: TimeoutAction) {
        self.actions.retain(|a| a.key != action.key);
        self.add(action);
    }

    pub fn replace_in(&mut self, key: i64, timeout: Duration) {
        self.replace(TimeoutAction::new(key, Instant::now() + timeout));
    }

    /// If the earliest action is already due, pop and return it. Otherwise
    /// return `None` along with the remaining duration until it fires (or
    /// `None` entirely when the wheel is empty, meaning the caller may block
    /// indefinitely).
    pub fn get_next_timeout(&mut self) -> (Option<Duration>, Option<TimeoutAction>) {
        let Some(first) = self.actions.first() else {
            return (None, None);
        };
        let now = Instant::now();
        if first.deadline <= now {
            let action = self.actions.remove(0);
            return (None, Some(action));
        }
        (Some(first.deadline - now), None)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_stays_sorted_ascending() {
        let mut t = Timeouts::new();
        let base = Instant::now();
        t.add(TimeoutAction::new(1, base + Duration::from_millis(500)));
        t.add(TimeoutAction::new(2, base + Duration::from_millis(100)));
        assert_eq!(t.actions[0].key, 2);
        assert_eq!(t.actions[1].key, 1);
    }

    #[test]
    fn replace_removes_prior_entry_for_same_key() {
        let mut t = Timeouts::new();
        let base = Instant::now();
        t.add(TimeoutAction::new(1, base + Duration::from_millis(500)));
        t.add(TimeoutAction::new(2, base + Duration::from_millis(100)));
        t.replace(TimeoutAction::new(1, base + Duration::from_millis(50)));
        assert_eq!(t.len(), 2);
        assert_eq!(t.actions[0].key, 1);
    }

    #[test]
    fn empty_wheel_returns_no_action_and_no_duration() {
        let mut t = Timeouts::new();
        let (tv, action) = t.get_next_timeout();
        assert!(tv.is_none());
        assert!(action.is_none());
    }

    #[test]
    fn due_action_is_popped_and_returned() {
        let mut t = Timeouts::new();
        t.add(TimeoutAction::new(7, Instant::now() - Duration::from_millis(1)));
        let (tv, action) = t.get_next_timeout();
        assert!(tv.is_none());
        assert_eq!(action.unwrap().key, 7);
        assert!(t.is_empty());
    }

    #[test]
    fn not_yet_due_action_reports_remaining_duration() {
        let mut t = Timeouts::new();
        t.add(TimeoutAction::new(7, Instant::now() + Duration::from_secs(10)));
        let (tv, action) = t.get_next_timeout();
        assert!(action.is_none());
        let remaining = tv.unwrap();
        assert!(remaining <= Duration::from_secs(10) && remaining > Duration::from_secs(5));
    }
}
