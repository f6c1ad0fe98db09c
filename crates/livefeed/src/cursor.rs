//! Resume cursors carried in the reconnect URL.
//!
//! Backends disagree on how a reconnect resumes: some take a key (`since`),
//! others a replay count (`n_min`, `recent`). Both are modelled as a
//! [`ResumeCursor`] that owns exactly one query parameter.

use url::Url;

use crate::{options::ResumePolicy, point::Point};

pub const SINCE_PARAM: &str = "since";

pub trait ResumeCursor: core::fmt::Debug + Send {
    /// Name of the query parameter this cursor controls.
    fn param(&self) -> &str;

    /// Current query value.
    fn value(&self) -> String;

    /// Records that `point` was delivered.
    fn advance(&mut self, point: &Point);

    /// Returns `url` with this cursor's parameter set to the current value.
    /// Every other parameter is kept in place.
    fn apply_to(&self, url: &Url) -> Url {
        with_query_param(url, self.param(), &self.value())
    }
}

/// Time-based resumption: replay everything with key `>= since`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinceCursor {
    since: f64,
}

impl SinceCursor {
    #[must_use]
    pub fn new(since: f64) -> Self {
        Self { since }
    }

    /// Seeds the cursor with `now_ms - lookback_ms`.
    #[must_use]
    pub fn seeded(now_ms: f64, lookback_ms: f64) -> Self {
        Self::new(now_ms - lookback_ms)
    }

    #[must_use]
    pub fn since(&self) -> f64 {
        self.since
    }
}

impl ResumeCursor for SinceCursor {
    fn param(&self) -> &str {
        SINCE_PARAM
    }

    fn value(&self) -> String {
        self.since.to_string()
    }

    /// Moves past `point.x` by the smallest representable step. Never moves
    /// backwards; non-finite keys are ignored.
    fn advance(&mut self, point: &Point) {
        if !point.x.is_finite() {
            return;
        }
        let next = next_up(point.x);
        if next > self.since {
            self.since = next;
        }
    }
}

/// Count-based resumption: ask for the `count` most recent points.
///
/// The requested count never changes; replayed duplicates are dropped by the
/// stream client's key check instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountCursor {
    param: String,
    count: usize,
}

impl CountCursor {
    #[must_use]
    pub fn new(param: impl Into<String>, count: usize) -> Self {
        Self {
            param: param.into(),
            count,
        }
    }
}

impl ResumeCursor for CountCursor {
    fn param(&self) -> &str {
        &self.param
    }

    fn value(&self) -> String {
        self.count.to_string()
    }

    fn advance(&mut self, _point: &Point) {}
}

impl ResumePolicy {
    /// Builds the cursor for a subscription starting at `now_ms`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cursor(&self, now_ms: f64) -> Box<dyn ResumeCursor> {
        match self {
            Self::Since { lookback } => Box::new(SinceCursor::seeded(
                now_ms,
                lookback.as_millis() as f64,
            )),
            Self::Count { param, count } => Box::new(CountCursor::new(param.clone(), *count)),
        }
    }
}

/// Replaces (or appends) `key` in the query string of `url`.
#[must_use]
pub fn with_query_param(url: &Url, key: &str, value: &str) -> Url {
    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(k, v)| {
            if k != key {
                return Some((k.into_owned(), v.into_owned()));
            }
            if replaced {
                return None;
            }
            replaced = true;
            Some((k.into_owned(), value.to_owned()))
        })
        .collect();
    if !replaced {
        pairs.push((key.to_owned(), value.to_owned()));
    }

    let mut url = url.clone();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url
}

/// The smallest `f64` strictly greater than `x`, for finite `x`.
fn next_up(x: f64) -> f64 {
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use rstest::rstest;

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn since_moves_strictly_past_the_point() {
        let mut cursor = SinceCursor::new(1000.0);
        cursor.advance(&Point::new(1005.0, "v"));
        assert!(cursor.since() > 1005.0);

        let applied = cursor.apply_to(&url("http://feed.test/data?since=1000"));
        let since: f64 = applied
            .query_pairs()
            .find(|(k, _)| k == SINCE_PARAM)
            .unwrap()
            .1
            .parse()
            .unwrap();
        assert!(since > 1005.0);
    }

    #[test]
    fn since_never_moves_backwards() {
        let mut cursor = SinceCursor::new(2000.0);
        cursor.advance(&Point::new(1500.0, 1.0));
        cursor.advance(&Point::new(f64::NAN, 1.0));
        cursor.advance(&Point::new(f64::INFINITY, 1.0));
        assert!((cursor.since() - 2000.0).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.0)]
    #[case(-1.0)]
    #[case(1.0)]
    #[case(1.7e12)]
    #[case(f64::MIN_POSITIVE)]
    fn next_up_is_the_adjacent_value(#[case] x: f64) {
        let next = next_up(x);
        assert!(next > x);
        assert!((x + next) / 2.0 == x || (x + next) / 2.0 == next);
    }

    #[test]
    fn count_cursor_is_fixed() {
        let mut cursor = CountCursor::new("n_min", 50);
        cursor.advance(&Point::new(1.0, 1.0));
        assert_eq!(cursor.value(), "50");
        assert_eq!(
            cursor.apply_to(&url("http://feed.test/data")).as_str(),
            "http://feed.test/data?n_min=50"
        );
    }

    #[rstest]
    #[case("http://h/p", "http://h/p?since=5")]
    #[case("http://h/p?a=1", "http://h/p?a=1&since=5")]
    #[case("http://h/p?since=1&a=2", "http://h/p?since=5&a=2")]
    #[case("http://h/p?since=1&since=2", "http://h/p?since=5")]
    fn query_param_is_replaced_in_place(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(with_query_param(&url(input), "since", "5").as_str(), expected);
    }

    #[test]
    fn policy_seeds_from_lookback() {
        let policy = ResumePolicy::Since {
            lookback: Duration::from_secs(60),
        };
        assert_eq!(policy.cursor(100_000.0).value(), "40000");

        let policy = ResumePolicy::Count {
            param: "recent".into(),
            count: 10,
        };
        let cursor = policy.cursor(100_000.0);
        assert_eq!((cursor.param(), cursor.value().as_str()), ("recent", "10"));
    }
}
