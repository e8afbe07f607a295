use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::detection::Point;
use crate::error::ConfigError;
use crate::track::TrackSnapshot;

/// True when `a`, `b`, `c` turn counter-clockwise. Collinear points are not.
#[inline]
fn ccw(a: Point, b: Point, c: Point) -> bool {
    (c.y - a.y) * (b.x - a.x) > (b.y - a.y) * (c.x - a.x)
}

/// Whether segment `a`-`b` crosses segment `c`-`d`.
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    ccw(a, c, d) != ccw(b, c, d) && ccw(a, b, c) != ccw(a, b, d)
}

/// The virtual line people are counted across.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CountingLine {
    pub start: Point,
    pub end: Point,
}

impl CountingLine {
    pub fn new(start: Point, end: Point) -> Result<Self, ConfigError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(ConfigError::NonFiniteLine);
        }
        if start == end {
            return Err(ConfigError::DegenerateLine {
                x: start.x,
                y: start.y,
            });
        }
        Ok(Self { start, end })
    }

    /// Whether moving from `from` to `to` crosses the line.
    pub fn is_crossed_by(&self, from: Point, to: Point) -> bool {
        segments_intersect(from, to, self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub from: Point,
    pub to: Point,
    /// Running count including this event
    pub count: u64,
}

/// Counts confirmed tracks whose centroid crosses the counting line between
/// consecutive observations.
///
/// History is double-buffered: `previous` holds last frame's centroids and is
/// only read during a frame, `current` is only written, then the two swap.
#[derive(Debug, Clone)]
pub struct LineCounter {
    line: CountingLine,
    previous: HashMap<u64, Point>,
    current: HashMap<u64, Point>,
    count: u64,
}

impl LineCounter {
    pub fn new(line: CountingLine) -> Self {
        Self {
            line,
            previous: HashMap::new(),
            current: HashMap::new(),
            count: 0,
        }
    }

    pub fn line(&self) -> &CountingLine {
        &self.line
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Last observed centroid of a live identity.
    pub fn previous_position(&self, id: u64) -> Option<Point> {
        self.previous.get(&id).copied()
    }

    pub fn history_len(&self) -> usize {
        self.previous.len()
    }

    /// Test every confirmed track observed this frame against its prior
    /// centroid, then roll the history forward.
    ///
    /// `tracks` must be every confirmed live track; identities missing from it
    /// are dropped from history. Coasting tracks keep their last observed
    /// centroid.
    pub fn observe(&mut self, tracks: &[TrackSnapshot]) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        self.current.clear();

        for track in tracks {
            let prior = self.previous.get(&track.id).copied();
            if !track.matched {
                if let Some(prior) = prior {
                    self.current.insert(track.id, prior);
                }
                continue;
            }

            let centroid = track.centroid();
            if let Some(prior) = prior {
                if self.line.is_crossed_by(prior, centroid) {
                    self.count += 1;
                    info!("track {} crossed the line, count = {}", track.id, self.count);
                    events.push(CrossingEvent {
                        track_id: track.id,
                        from: prior,
                        to: centroid,
                        count: self.count,
                    });
                }
            }
            self.current.insert(track.id, centroid);
        }

        std::mem::swap(&mut self.previous, &mut self.current);
        events
    }

    pub fn reset(&mut self) {
        self.previous.clear();
        self.current.clear();
        self.count = 0;
    }
}
