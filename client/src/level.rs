//! Active level context and the ground probe used to validate positions

use shared::{
    level_label_for, participant_count_of, Position, ARENA_HALF_EXTENT_PER_PARTICIPANT,
    LAUNCHER_LEVEL,
};

/// The scene every participant currently has loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelContext {
    pub label: String,
    /// Room size the arena was built for. Zero for the launcher.
    pub participant_count: usize,
}

impl LevelContext {
    pub fn launcher() -> Self {
        Self {
            label: LAUNCHER_LEVEL.to_string(),
            participant_count: 0,
        }
    }

    pub fn arena_for(participant_count: usize) -> Self {
        Self {
            label: level_label_for(participant_count),
            participant_count,
        }
    }

    /// Builds the context for a broadcast label, falling back to the
    /// current room size for labels that do not encode one.
    pub fn from_label(label: &str, room_size: usize) -> Self {
        Self {
            label: label.to_string(),
            participant_count: participant_count_of(label).unwrap_or(room_size),
        }
    }

    pub fn is_launcher(&self) -> bool {
        self.label == LAUNCHER_LEVEL
    }
}

/// Downward ray test against a level's static geometry.
pub trait LevelGeometry {
    /// True if ground lies below `from` within `max_distance`.
    fn ground_below(&self, from: Position, max_distance: f32) -> bool;
}

/// Flat square arena at y = 0 that grows with the room size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaGeometry {
    half_extent: f32,
}

impl ArenaGeometry {
    pub fn for_level(level: &LevelContext) -> Self {
        Self {
            half_extent: ARENA_HALF_EXTENT_PER_PARTICIPANT * level.participant_count as f32,
        }
    }

    pub fn half_extent(&self) -> f32 {
        self.half_extent
    }
}

impl LevelGeometry for ArenaGeometry {
    fn ground_below(&self, from: Position, max_distance: f32) -> bool {
        let over_floor = from.x.abs() <= self.half_extent && from.z.abs() <= self.half_extent;
        over_floor && from.y >= 0.0 && from.y <= max_distance
    }
}
