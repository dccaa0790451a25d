//! Edge detection over sampled input signals

use shared::EntityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Turns a level signal sampled once per tick into press/release events.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    previous: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds this tick's sample. Returns an edge only when the signal
    /// changed since the previous tick.
    pub fn sample(&mut self, level: bool) -> Option<Edge> {
        let edge = match (self.previous, level) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        };
        self.previous = level;
        edge
    }

    pub fn reset(&mut self) {
        self.previous = false;
    }
}

/// Sets the effect flag on press and clears it on release.
pub fn apply_edge(state: &mut EntityState, edge: Edge) {
    match edge {
        Edge::Rising => {
            if !state.active_effect {
                state.active_effect = true;
            }
        }
        Edge::Falling => {
            if state.active_effect {
                state.active_effect = false;
            }
        }
    }
}

/// Input sampled for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickInput {
    /// Whether the fire button is held down.
    pub fire_held: bool,
    /// Damage taken by the local entity since the last tick.
    pub damage: f32,
}
