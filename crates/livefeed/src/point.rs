use serde_json::{Map, Value};

/// Key under which batched payloads carry their sample array.
const BATCH_KEY: &str = "value0";
/// Key under which single wrapped points are carried.
const WRAPPED_KEY: &str = "point";

/// One time-series sample. `x` is the ordering key, usually a timestamp in
/// milliseconds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    pub x: f64,
    pub y: PointValue,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum PointValue {
    Number(f64),
    Text(String),
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: impl Into<PointValue>) -> Self {
        Self { x, y: y.into() }
    }

    /// Reads a bare `{ "x": number, "y": number | string }` object. Extra
    /// fields are ignored.
    #[must_use]
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let x = object.get("x")?.as_f64()?;
        let y = match object.get("y")? {
            Value::Number(n) => PointValue::Number(n.as_f64()?),
            Value::String(s) => PointValue::Text(s.clone()),
            _ => return None,
        };
        Some(Self { x, y })
    }
}

impl From<f64> for PointValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PointValue {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl From<String> for PointValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The payload shapes seen on the wire.
enum Payload<'v> {
    Bare(&'v Map<String, Value>),
    Wrapped(&'v Map<String, Value>),
    Batch(&'v [Value]),
    Unknown,
}

impl<'v> Payload<'v> {
    fn classify(value: &'v Value) -> Self {
        match value {
            Value::Array(items) => Self::Batch(items),
            Value::Object(object) if object.contains_key("x") => Self::Bare(object),
            Value::Object(object) => {
                if let Some(Value::Object(inner)) = object.get(WRAPPED_KEY) {
                    return Self::Wrapped(inner);
                }
                match object
                    .get(BATCH_KEY)
                    .and_then(|series| series.get("data"))
                {
                    Some(Value::Array(items)) => Self::Batch(items),
                    _ => Self::Unknown,
                }
            }
            _ => Self::Unknown,
        }
    }
}

/// Normalizes one decoded payload unit into its points, in wire order.
///
/// Accepts a bare point, a point wrapped under `"point"`, a batch under
/// `"value0": { "data": [...] }` and a top-level array of bare points.
/// Anything else, including malformed entries inside a batch, yields no
/// points for that entry.
#[must_use]
pub fn decode_points(value: &Value) -> Vec<Point> {
    match Payload::classify(value) {
        Payload::Bare(object) | Payload::Wrapped(object) => {
            Point::from_object(object).into_iter().collect()
        }
        Payload::Batch(items) => items
            .iter()
            .filter_map(|item| item.as_object().and_then(Point::from_object))
            .collect(),
        Payload::Unknown => {
            tracing::debug!(payload = %value, "payload carries no points");
            Vec::new()
        }
    }
}
