//! Deterministic reducer.
//!
//! State is never stored; it is rebuilt by folding the ordered log from
//! [`LifeState::initial`]. The fold reads nothing but the events themselves:
//! every time-dependent fact (the user's local `day`) is fixed at append time.

pub mod state;

pub use state::*;

use chrono::NaiveDate;

use crate::error::Result;
use crate::events::{Event, StoredEvent};

/// A value that can be rebuilt from a sequence of events.
///
/// `apply` must be a pure function of `(self, event)`: no I/O, no clock,
/// no randomness, and it must not fail.
pub trait Aggregate {
    fn apply(&mut self, event: &Event);
}

/// `(state, event) -> state'`
pub fn reduce(mut state: LifeState, event: &Event) -> LifeState {
    state.apply(event);
    state
}

/// Fold already-decoded events, in the given order, into the snapshot for `day`.
pub fn replay<'a, I>(day: NaiveDate, events: I) -> LifeState
where
    I: IntoIterator<Item = &'a Event>,
{
    events.into_iter().fold(LifeState::initial(day), reduce)
}

/// Decode and fold stored events into the snapshot for `day`.
///
/// Events are put in log order first. A single undecodable event fails the
/// whole replay.
pub fn replay_stored(day: NaiveDate, events: &[StoredEvent]) -> Result<LifeState> {
    let mut ordered: Vec<&StoredEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.order_key());

    let decoded = ordered
        .into_iter()
        .map(Event::decode)
        .collect::<Result<Vec<_>>>()?;
    Ok(replay(day, &decoded))
}
