use std::fmt;

use tracing::{info, warn};

/// Number of records fetched when no limit is given.
pub const DEFAULT_LIMIT: u32 = 20;

/// Reading order for a history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Oldest to newest (ascending ids).
    Forward,
    /// Newest to oldest, explicitly requested or inferred from the bounds.
    Backward,
    /// Platform native order (newest to oldest), nothing requested.
    Default,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
            Direction::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(u32),
    Unbounded,
}

/// Something the caller should tell the user about a resolution. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeNote {
    DefaultLimit(u32),
    Unbounded,
    DirectionOverridden { requested: Direction, inferred: Direction },
}

/// User-supplied range inputs, all optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeRequest {
    pub from_id: Option<i64>,
    pub to_id: Option<i64>,
    pub forward: bool,
    pub backward: bool,
    pub inclusive: bool,
    pub limit: Option<u32>,
}

/// Concrete fetch parameters.
///
/// `min_id` and `max_id` are always exclusive: inclusive requests are already
/// widened by one on each present side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRange {
    pub direction: Direction,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    pub limit: Limit,
    pub inclusive: bool,
    pub notes: Vec<RangeNote>,
}

impl FetchRange {
    /// Whether the platform should yield records oldest-first.
    pub fn reverse(&self) -> bool {
        self.direction == Direction::Forward
    }

    pub fn has_bounds(&self) -> bool {
        self.min_id.is_some() || self.max_id.is_some()
    }

    /// Maximum number of records to yield, `None` when unbounded.
    pub fn max_items(&self) -> Option<usize> {
        match self.limit {
            Limit::Count(n) => Some(n as usize),
            Limit::Unbounded => None,
        }
    }

    /// Emit the resolution notes through tracing.
    pub fn log_notes(&self) {
        for note in &self.notes {
            match note {
                RangeNote::DefaultLimit(n) => {
                    info!("No --limit specified. Using default limit {}.", n)
                }
                RangeNote::Unbounded => {
                    info!("--limit 0 specified. Fetching without limit (may take a long time).")
                }
                RangeNote::DirectionOverridden {
                    requested,
                    inferred,
                } => warn!(
                    "Direction overridden by range: using {} instead of {} due to --from-id/--to-id order.",
                    inferred, requested
                ),
            }
        }
    }
}

/// Resolve partially specified range inputs into fetch parameters.
///
/// Total: contradictions degrade to a defined result plus a note.
pub fn resolve(request: &RangeRequest) -> FetchRange {
    let mut notes = Vec::new();

    let limit = match request.limit {
        None => {
            notes.push(RangeNote::DefaultLimit(DEFAULT_LIMIT));
            Limit::Count(DEFAULT_LIMIT)
        }
        Some(0) => {
            notes.push(RangeNote::Unbounded);
            Limit::Unbounded
        }
        Some(n) => Limit::Count(n),
    };

    let requested = if request.forward {
        Direction::Forward
    } else if request.backward {
        Direction::Backward
    } else {
        Direction::Default
    };

    let direction = match (request.from_id, request.to_id) {
        (Some(from), Some(to)) if from != to => {
            let inferred = if to > from {
                Direction::Forward
            } else {
                Direction::Backward
            };
            if requested != Direction::Default && requested != inferred {
                notes.push(RangeNote::DirectionOverridden {
                    requested,
                    inferred,
                });
            }
            inferred
        }
        _ => requested,
    };

    let widen_down = |id: i64| {
        if request.inclusive {
            id.saturating_sub(1).max(0)
        } else {
            id
        }
    };
    // Only the lower side is clamped.
    let widen_up = |id: i64| {
        if request.inclusive {
            id.saturating_add(1)
        } else {
            id
        }
    };

    let (min_id, max_id) = if direction == Direction::Forward {
        (
            request.from_id.map(widen_down),
            request.to_id.map(widen_up),
        )
    } else {
        (
            request.to_id.map(widen_down),
            request.from_id.map(widen_up),
        )
    };

    FetchRange {
        direction,
        min_id,
        max_id,
        limit,
        inclusive: request.inclusive,
        notes,
    }
}
