use core::time::Duration;

/// Configuration for [`ParserBuffer`](crate::ParserBuffer) memory
/// compaction.
///
/// # Default
///
/// `shift_length` defaults to `2048`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BufferOptions {
    /// Number of consumed bytes after which the consumed prefix is physically
    /// dropped from the buffer.
    ///
    /// Compaction never changes the result of any position-relative
    /// operation. `0` disables compaction entirely.
    pub shift_length: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self { shift_length: 2048 }
    }
}

/// Reconnect backoff parameters for a
/// [`PersistentConnection`](crate::PersistentConnection).
///
/// After each failure the reconnect is scheduled after the current delay, and
/// the delay for the next failure becomes `ceil(coefficient * delay)`
/// milliseconds, optionally clamped to `max_delay`. A successful connection
/// restores `delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReconnectOptions {
    /// Base delay before the first reconnect attempt.
    ///
    /// # Default
    ///
    /// 2000ms
    #[cfg_attr(feature = "serde", serde(with = "duration_ms", rename = "delay_ms"))]
    pub delay: Duration,

    /// Growth multiplier applied after every scheduled reconnect. Values
    /// below `1.0` are treated as `1.0`.
    ///
    /// # Default
    ///
    /// `1.1`
    pub coefficient: f64,

    /// Upper bound for the delay. `None` lets the delay grow without bound.
    ///
    /// # Default
    ///
    /// `None`
    #[cfg_attr(
        feature = "serde",
        serde(with = "option_duration_ms", rename = "max_delay_ms")
    )]
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            coefficient: 1.1,
            max_delay: None,
        }
    }
}

/// Framing applied by the transport on top of the payload units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Framing {
    /// The body carries `Transfer-Encoding: chunked` frames that still have to
    /// be stripped.
    #[default]
    Chunked,
    /// The body is the bare unit stream.
    Raw,
}

/// How a reconnect resumes the stream.
///
/// The backend variants disagree on whether resumption is time-based or
/// count-based, so both are supported and neither is assumed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResumePolicy {
    /// `since=<key>`, seeded with "now minus `lookback`" and advanced past
    /// every decoded point.
    Since {
        #[cfg_attr(feature = "serde", serde(with = "duration_ms", rename = "lookback_ms"))]
        lookback: Duration,
    },
    /// `<param>=<count>` (`n_min`, `recent`): ask the backend to replay at
    /// least `count` of the most recent points.
    Count { param: String, count: usize },
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self::Since {
            lookback: Duration::ZERO,
        }
    }
}

/// Options for one stream subscription.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StreamOptions {
    pub framing: Framing,
    pub resume: ResumePolicy,
    pub reconnect: ReconnectOptions,
    pub buffer: BufferOptions,

    /// Separator between payload units. It must never appear unescaped
    /// inside a unit.
    ///
    /// # Default
    ///
    /// `"\n"`
    pub separator: String,

    /// Establish replacement connections before tearing down the active one
    /// (see [`PersistentConnectionPair`](crate::PersistentConnectionPair)).
    ///
    /// # Default
    ///
    /// `false`
    pub gap_free: bool,

    /// Ignore whitespace-only records instead of treating them as invalid
    /// JSON.
    ///
    /// # Default
    ///
    /// `false`
    pub skip_blank_records: bool,

    /// Drop points whose key does not advance past the last forwarded key.
    ///
    /// # Default
    ///
    /// `true`
    pub dedupe: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            resume: ResumePolicy::default(),
            reconnect: ReconnectOptions::default(),
            buffer: BufferOptions::default(),
            separator: "\n".into(),
            gap_free: false,
            skip_blank_records: false,
            dedupe: true,
        }
    }
}

#[cfg(feature = "serde")]
mod duration_ms {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(feature = "serde")]
mod option_duration_ms {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option, clippy::cast_possible_truncation)]
    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => s.serialize_some(&(value.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn stream_options_from_partial_json() {
        let options: StreamOptions = serde_json::from_str(
            r#"{
                "framing": "raw",
                "resume": { "count": { "param": "n_min", "count": 50 } },
                "reconnect": { "delay_ms": 500, "max_delay_ms": 8000 }
            }"#,
        )
        .unwrap();

        assert_eq!(options.framing, Framing::Raw);
        assert_eq!(
            options.resume,
            ResumePolicy::Count {
                param: "n_min".into(),
                count: 50
            }
        );
        assert_eq!(options.reconnect.delay, Duration::from_millis(500));
        assert_eq!(options.reconnect.max_delay, Some(Duration::from_secs(8)));
        assert!((options.reconnect.coefficient - 1.1).abs() < f64::EPSILON);
        assert_eq!(options.separator, "\n");
        assert!(options.dedupe);
        assert!(!options.skip_blank_records);
    }
}
