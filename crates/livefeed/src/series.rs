//! Bounded per-stream history of forwarded points.

use std::collections::{HashMap, VecDeque};

use crate::{client::StreamId, point::Point, runtime::StreamPoint};

/// How much history a [`SeriesWindow`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Retention {
    /// Keeps points within `1.5 * window` of the newest key, so a chart
    /// spanning `window` always has data up to its left edge.
    TimeWindow(f64),
    /// Keeps the newest `n` points.
    Count(usize),
    #[default]
    Unbounded,
}

/// Points of one stream in arrival order, trimmed from the front.
#[derive(Debug, Clone, Default)]
pub struct SeriesWindow {
    points: VecDeque<Point>,
    retention: Retention,
}

impl SeriesWindow {
    #[must_use]
    pub fn new(retention: Retention) -> Self {
        Self {
            points: VecDeque::new(),
            retention,
        }
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = Point>) {
        self.points.extend(points);
        self.trim();
    }

    pub fn push(&mut self, point: Point) {
        self.extend([point]);
    }

    /// Discards the current history and starts over with `points`.
    pub fn replace(&mut self, points: impl IntoIterator<Item = Point>) {
        self.points.clear();
        self.extend(points);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    fn trim(&mut self) {
        match self.retention {
            Retention::TimeWindow(window) => {
                let Some(newest) = self.points.back().map(|p| p.x) else {
                    return;
                };
                let span = 1.5 * window;
                while self
                    .points
                    .front()
                    .is_some_and(|oldest| newest - oldest.x > span)
                {
                    self.points.pop_front();
                }
            }
            Retention::Count(limit) => {
                let excess = self.points.len().saturating_sub(limit);
                self.points.drain(..excess);
            }
            Retention::Unbounded => {}
        }
    }
}

/// Windows for many streams, created on first use with a shared retention.
#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    windows: HashMap<StreamId, SeriesWindow>,
    retention: Retention,
}

impl SeriesStore {
    #[must_use]
    pub fn new(retention: Retention) -> Self {
        Self {
            windows: HashMap::new(),
            retention,
        }
    }

    /// Overrides the retention for one stream, trimming its history.
    pub fn set_retention(&mut self, stream: StreamId, retention: Retention) {
        let window = self.window_mut(stream);
        window.retention = retention;
        window.trim();
    }

    pub fn insert(&mut self, point: StreamPoint) {
        self.window_mut(point.stream).push(point.point);
    }

    pub fn replace(&mut self, stream: StreamId, points: impl IntoIterator<Item = Point>) {
        self.window_mut(stream).replace(points);
    }

    #[must_use]
    pub fn get(&self, stream: &StreamId) -> Option<&SeriesWindow> {
        self.windows.get(stream)
    }

    pub fn remove(&mut self, stream: &StreamId) -> Option<SeriesWindow> {
        self.windows.remove(stream)
    }

    fn window_mut(&mut self, stream: StreamId) -> &mut SeriesWindow {
        let retention = self.retention;
        self.windows
            .entry(stream)
            .or_insert_with(|| SeriesWindow::new(retention))
    }
}
