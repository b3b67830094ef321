use std::fmt::Display;
use std::sync::Mutex;

use crate::lock::lock;
use crate::models::{WorkError, WorkErrorKind, WorkResult};

/// A rule allowing a move from any state in `from` to any state in `to`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Move<S> {
    pub from: Vec<S>,
    pub to: Vec<S>,
}

impl<S> Move<S> {
    pub fn new(from: impl IntoIterator<Item = S>, to: impl IntoIterator<Item = S>) -> Self {
        Self {
            from: from.into_iter().collect(),
            to: to.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// Current state plus the table of legal moves.
///
/// The machine only validates and records moves; publishing the resulting
/// `state` / per-state events is left to the owner, which knows where events
/// should be delivered.
#[derive(Debug)]
pub struct StateMachine<S> {
    initial: S,
    current: Mutex<S>,
    moves: Vec<Move<S>>,
}

impl<S: Copy + Eq + Display> StateMachine<S> {
    pub fn new(initial: S, moves: Vec<Move<S>>) -> Self {
        Self {
            initial,
            current: Mutex::new(initial),
            moves,
        }
    }

    pub fn state(&self) -> S {
        *lock(&self.current)
    }

    pub fn initial_state(&self) -> S {
        self.initial
    }

    pub fn moves(&self) -> &[Move<S>] {
        &self.moves
    }

    pub fn can_move_to(&self, to: S) -> bool {
        let current = self.state();
        current == to
            || self
                .moves
                .iter()
                .any(|rule| rule.from.contains(&current) && rule.to.contains(&to))
    }

    /// Moves to `to`. Returns `Ok(None)` when already there.
    pub fn set_state(&self, to: S) -> WorkResult<Option<Transition<S>>> {
        let mut current = lock(&self.current);
        if *current == to {
            return Ok(None);
        }

        if !self.moves.iter().any(|rule| rule.to.contains(&to)) {
            return Err(WorkError::new(
                WorkErrorKind::InvalidMove,
                format!("invalid state: {to}"),
            ));
        }

        let from = *current;
        if self
            .moves
            .iter()
            .any(|rule| rule.from.contains(&from) && rule.to.contains(&to))
        {
            *current = to;
            return Ok(Some(Transition { from, to }));
        }

        let origins: Vec<String> = self
            .moves
            .iter()
            .filter(|rule| rule.to.contains(&to))
            .flat_map(|rule| rule.from.iter().map(|state| format!("'{state}'")))
            .collect();
        let origins = if origins.is_empty() {
            "<unspecified>".to_string()
        } else {
            origins.join(" or ")
        };
        Err(WorkError::new(
            WorkErrorKind::InvalidMove,
            format!("can only move to '{to}' from {origins} (not '{from}')"),
        ))
    }

    /// Forces the initial state back, bypassing the move table.
    /// Returns the state that was replaced.
    pub fn reset(&self) -> S {
        let mut current = lock(&self.current);
        std::mem::replace(&mut *current, self.initial)
    }
}

#[cfg(test)]
mod tests {
    use super::{Move, StateMachine, Transition};
    use crate::models::{ExecutionState, WorkErrorKind};

    fn machine() -> StateMachine<ExecutionState> {
        StateMachine::new(ExecutionState::Pending, ExecutionState::moves())
    }

    #[test]
    fn legal_move_records_transition() {
        let fsm = machine();
        let moved = fsm.set_state(ExecutionState::InProgress).unwrap();
        assert_eq!(
            moved,
            Some(Transition {
                from: ExecutionState::Pending,
                to: ExecutionState::InProgress,
            })
        );
        assert_eq!(fsm.state(), ExecutionState::InProgress);
    }

    #[test]
    fn same_state_is_a_no_op() {
        let fsm = machine();
        assert_eq!(fsm.set_state(ExecutionState::Pending).unwrap(), None);
        assert_eq!(fsm.state(), ExecutionState::Pending);
    }

    #[test]
    fn unreachable_origin_lists_valid_origins_and_keeps_state() {
        let fsm = machine();
        let error = fsm.set_state(ExecutionState::Successful).unwrap_err();
        assert_eq!(error.kind, WorkErrorKind::InvalidMove);
        assert_eq!(
            error.message,
            "can only move to 'successful' from 'in-progress' (not 'pending')"
        );
        assert_eq!(fsm.state(), ExecutionState::Pending);
    }

    #[test]
    fn target_outside_the_table_is_invalid() {
        let fsm = machine();
        fsm.set_state(ExecutionState::InProgress).unwrap();
        let error = fsm.set_state(ExecutionState::Pending).unwrap_err();
        assert_eq!(error.kind, WorkErrorKind::InvalidMove);
        assert_eq!(error.message, "invalid state: pending");
        assert_eq!(fsm.state(), ExecutionState::InProgress);
    }

    #[test]
    fn every_illegal_target_fails_without_moving() {
        for start in ExecutionState::ALL {
            for target in ExecutionState::ALL {
                let fsm = machine();
                // walk to `start` along legal moves where possible
                let reached = match start {
                    ExecutionState::Pending => true,
                    ExecutionState::InProgress
                    | ExecutionState::Skipped
                    | ExecutionState::Cancelled => fsm.set_state(start).is_ok(),
                    ExecutionState::Successful | ExecutionState::Failed => {
                        fsm.set_state(ExecutionState::InProgress).is_ok()
                            && fsm.set_state(start).is_ok()
                    }
                };
                assert!(reached);

                let legal = fsm.can_move_to(target);
                let outcome = fsm.set_state(target);
                if legal {
                    assert!(outcome.is_ok());
                    assert_eq!(fsm.state(), target);
                } else {
                    assert_eq!(outcome.unwrap_err().kind, WorkErrorKind::InvalidMove);
                    assert_eq!(fsm.state(), start);
                }
            }
        }
    }

    #[test]
    fn reset_bypasses_the_table() {
        let fsm = machine();
        fsm.set_state(ExecutionState::InProgress).unwrap();
        fsm.set_state(ExecutionState::Failed).unwrap();
        assert_eq!(fsm.reset(), ExecutionState::Failed);
        assert_eq!(fsm.state(), ExecutionState::Pending);
        assert_eq!(fsm.initial_state(), ExecutionState::Pending);
    }

    #[test]
    fn works_with_any_state_type() {
        let fsm = StateMachine::new("off", vec![Move::new(["off"], ["on"])]);
        fsm.set_state("on").unwrap();
        let error = fsm.set_state("off").unwrap_err();
        assert_eq!(error.message, "invalid state: off");
    }
}
