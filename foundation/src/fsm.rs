//! Table-driven finite-state-machine executor.
//!
//! A machine is a slice of [`Transition`] rules plus an opaque context. On
//! every [`Fsm::step`] the table is scanned in order; the first rule whose
//! `present` state matches and whose guard passes (a missing guard always
//! passes) fires: the state moves to `next`, the observer sees the change,
//! and the rule's action runs.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::fsm::{Fsm, Transition};
//! use ember_foundation::transition;
//!
//! const IDLE: i16 = 0;
//! const ACTIVE: i16 = 1;
//!
//! fn armed(_from: i16, _to: i16, ctx: &mut bool) -> bool { *ctx }
//!
//! let table = [
//!     transition!(IDLE, armed, _, ACTIVE),
//!     transition!(ACTIVE, _, _, IDLE),
//! ];
//! let mut fsm = Fsm::new(&table, true);
//! assert_eq!(fsm.step(), ACTIVE);
//! assert_eq!(fsm.step(), IDLE);
//! ```

/// State identifier. The initial state is 0.
pub type State = i16;

/// Guard: may the rule fire? Receives (present, candidate next, context).
pub type Guard<C> = fn(State, State, &mut C) -> bool;

/// Action run after a rule fires. Receives (previous, current, context).
pub type Action<C> = fn(State, State, &mut C);

/// Observer of state changes. Receives (new, previous, context) immediately
/// after every change.
pub type Observer<C> = fn(State, State, &mut C);

/// One transition rule.
#[derive(Clone, Copy)]
pub struct Transition<C> {
    pub present: State,
    pub next: State,
    pub guard: Option<Guard<C>>,
    pub action: Option<Action<C>>,
}

impl<C> Transition<C> {
    pub const fn new(
        present: State,
        guard: Option<Guard<C>>,
        action: Option<Action<C>>,
        next: State,
    ) -> Self {
        Self {
            present,
            next,
            guard,
            action,
        }
    }
}

/// Build a [`Transition`]; `_` stands for a missing guard or action.
#[macro_export]
macro_rules! transition {
    ($present:expr, _, _, $next:expr) => {
        $crate::fsm::Transition::new($present, None, None, $next)
    };
    ($present:expr, $guard:expr, _, $next:expr) => {
        $crate::fsm::Transition::new($present, Some($guard), None, $next)
    };
    ($present:expr, _, $action:expr, $next:expr) => {
        $crate::fsm::Transition::new($present, None, Some($action), $next)
    };
    ($present:expr, $guard:expr, $action:expr, $next:expr) => {
        $crate::fsm::Transition::new($present, Some($guard), Some($action), $next)
    };
}

/// Table-driven transition engine owning its context.
pub struct Fsm<'a, C> {
    state: State,
    transitions: &'a [Transition<C>],
    context: C,
    observer: Option<Observer<C>>,
}

impl<'a, C> Fsm<'a, C> {
    /// Store the rule set and reset the state to 0.
    pub fn new(transitions: &'a [Transition<C>], context: C) -> Self {
        Self {
            state: 0,
            transitions,
            context,
            observer: None,
        }
    }

    /// Install a state-change observer.
    pub fn set_state_change_callback(&mut self, observer: Observer<C>) {
        self.observer = Some(observer);
    }

    /// Evaluate the table once and return the (possibly new) state.
    pub fn step(&mut self) -> State {
        let current = self.state;

        for rule in self.transitions {
            if rule.present != current {
                continue;
            }
            let allowed = match rule.guard {
                Some(guard) => guard(current, rule.next, &mut self.context),
                None => true,
            };
            if !allowed {
                continue;
            }

            if rule.next != current {
                self.state = rule.next;
                log::debug!("fsm: state change from {} to {}", current, rule.next);
                if let Some(observer) = self.observer {
                    observer(rule.next, current, &mut self.context);
                }
            }
            if let Some(action) = rule.action {
                action(current, self.state, &mut self.context);
            }
            break;
        }

        self.state
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Back to state 0 without touching the context.
    pub fn reset(&mut self) {
        self.state = 0;
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }
}
