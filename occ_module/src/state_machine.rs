//! Table driven state machine with opaque state and action tags.
//!
//! The table is built once with [`StateMachine::add_transition`]; an
//! action that has no entry for the current state leaves the state
//! untouched.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::trace;

/// Transition table plus the current state.
#[derive(Debug, Clone)]
pub struct StateMachine<S, A> {
    transitions: HashMap<(S, A), S>,
    state: S,
}

impl<S, A> StateMachine<S, A>
where
    S: Copy + Eq + Hash + Debug,
    A: Copy + Eq + Hash + Debug,
{
    /// Empty table starting in `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            transitions: HashMap::new(),
            state: initial,
        }
    }

    /// Move from `from` to `to` when `action` happens. A later entry for
    /// the same `(from, action)` pair replaces the earlier one.
    pub fn add_transition(&mut self, from: S, action: A, to: S) -> &mut Self {
        self.transitions.insert((from, action), to);
        self
    }

    /// Current state.
    #[inline]
    pub fn current(&self) -> S {
        self.state
    }

    /// Apply `action`, returning whether the table had an entry for it.
    pub fn transition(&mut self, action: A) -> bool {
        match self.transitions.get(&(self.state, action)) {
            Some(&next) => {
                trace!("{:?} --{:?}--> {:?}", self.state, action, next);
                self.state = next;
                true
            }
            None => false,
        }
    }

    /// True if `action` would change the state. Never mutates.
    pub fn check_transition(&self, action: A) -> bool {
        self.transitions.contains_key(&(self.state, action))
    }

    /// Jump to `state` regardless of the table.
    pub fn force(&mut self, state: S) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Off,
        On,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Switch {
        Flip,
        Break,
    }

    fn lamp() -> StateMachine<Light, Switch> {
        let mut sm = StateMachine::new(Light::Off);
        sm.add_transition(Light::Off, Switch::Flip, Light::On)
            .add_transition(Light::On, Switch::Flip, Light::Off);
        sm
    }

    #[test]
    fn known_action_moves_state() {
        let mut sm = lamp();
        assert!(sm.transition(Switch::Flip));
        assert_eq!(sm.current(), Light::On);
        assert!(sm.transition(Switch::Flip));
        assert_eq!(sm.current(), Light::Off);
    }

    #[test]
    fn unknown_action_is_ignored() {
        let mut sm = lamp();
        assert!(!sm.check_transition(Switch::Break));
        assert!(!sm.transition(Switch::Break));
        assert_eq!(sm.current(), Light::Off);
    }

    #[test]
    fn check_does_not_mutate() {
        let sm = lamp();
        assert!(sm.check_transition(Switch::Flip));
        assert_eq!(sm.current(), Light::Off);
    }

    #[test]
    fn later_entry_wins() {
        let mut sm = lamp();
        sm.add_transition(Light::Off, Switch::Flip, Light::Off);
        assert!(sm.transition(Switch::Flip));
        assert_eq!(sm.current(), Light::Off);
    }
}
