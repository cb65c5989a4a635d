//! The nImO value model.
//!
//! Every piece of data that crosses the wire is a [`Value`]: a closed tagged
//! union of scalars plus two owning containers (`Array`, `Map`). Containers own
//! their children, so a value is always a tree.
//!
//! Narrowing accessors (`as_integer`, `as_str`, ...) return `None` on a variant
//! mismatch instead of failing; command handlers turn a miss into an
//! "invalid arguments" reply.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{Datelike, Local, NaiveDate, NaiveTime, Timelike};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Ordered, unique-key map used by [`Value::Map`].
pub type ValueMap = BTreeMap<Value, Value>;

const MILLIS_PER_SECOND: u32 = 1_000;
const MILLIS_PER_MINUTE: u32 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u32 = 60 * MILLIS_PER_MINUTE;

/// Largest year representable in packed date ticks (23 bits).
const MAX_PACKED_YEAR: i32 = (1 << 23) - 1;

// ============================================================================
// Date / Time
// ============================================================================

/// Whether a [`DateTime`] holds a calendar date or a time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DateTimeKind {
    Date,
    Time,
}

/// A 32-bit date or time-of-day value.
///
/// Date ticks pack `year << 9 | month << 5 | day`; time ticks count
/// milliseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateTime {
    kind: DateTimeKind,
    ticks: u32,
}

impl DateTime {
    /// Wraps raw ticks without validation (used by the decoder).
    pub const fn from_ticks(kind: DateTimeKind, ticks: u32) -> Self {
        Self { kind, ticks }
    }

    /// Creates a date, returning `None` for an impossible calendar day.
    pub fn date(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Self::from_naive_date(date)
    }

    /// Creates a time of day, returning `None` when a field is out of range.
    pub fn time(hour: u32, minute: u32, second: u32, millis: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 || second >= 60 || millis >= MILLIS_PER_SECOND {
            return None;
        }
        let ticks = hour * MILLIS_PER_HOUR
            + minute * MILLIS_PER_MINUTE
            + second * MILLIS_PER_SECOND
            + millis;
        Some(Self::from_ticks(DateTimeKind::Time, ticks))
    }

    pub fn from_naive_date(date: NaiveDate) -> Option<Self> {
        let year = date.year();
        if !(0..=MAX_PACKED_YEAR).contains(&year) {
            return None;
        }
        let ticks = ((year as u32) << 9) | (date.month() << 5) | date.day();
        Some(Self::from_ticks(DateTimeKind::Date, ticks))
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        // Leap seconds are folded into the last millisecond of the minute.
        let millis = (time.nanosecond() / 1_000_000).min(MILLIS_PER_SECOND - 1);
        let ticks = time.hour() * MILLIS_PER_HOUR
            + time.minute() * MILLIS_PER_MINUTE
            + time.second() * MILLIS_PER_SECOND
            + millis;
        Self::from_ticks(DateTimeKind::Time, ticks)
    }

    /// The current local date.
    pub fn today() -> Option<Self> {
        Self::from_naive_date(Local::now().date_naive())
    }

    /// The current local time of day.
    pub fn now() -> Self {
        Self::from_naive_time(Local::now().time())
    }

    pub fn kind(&self) -> DateTimeKind {
        self.kind
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn is_date(&self) -> bool {
        self.kind == DateTimeKind::Date
    }

    /// Unpacks date ticks; `None` for a time value or corrupt ticks.
    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        if self.kind != DateTimeKind::Date {
            return None;
        }
        let year = (self.ticks >> 9) as i32;
        let month = (self.ticks >> 5) & 0x0F;
        let day = self.ticks & 0x1F;
        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Unpacks time ticks; `None` for a date value or corrupt ticks.
    pub fn to_naive_time(&self) -> Option<NaiveTime> {
        if self.kind != DateTimeKind::Time {
            return None;
        }
        let hour = self.ticks / MILLIS_PER_HOUR;
        let minute = (self.ticks % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE;
        let second = (self.ticks % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND;
        let millis = self.ticks % MILLIS_PER_SECOND;
        NaiveTime::from_hms_milli_opt(hour, minute, second, millis)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DateTimeKind::Date => match self.to_naive_date() {
                Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                None => write!(f, "date#{}", self.ticks),
            },
            DateTimeKind::Time => match self.to_naive_time() {
                Some(time) => write!(f, "{}", time.format("%H:%M:%S%.3f")),
                None => write!(f, "time#{}", self.ticks),
            },
        }
    }
}

// ============================================================================
// Value
// ============================================================================

/// A polymorphic wire value.
///
/// Values are totally ordered (variant first, then content; doubles use
/// `f64::total_cmp`) so that any value may serve as a map key. Equality
/// agrees with that order.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Invalid,
    Logical(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Address(Ipv4Addr),
    DateTime(DateTime),
    Array(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// Builds an array from anything that yields values.
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// An empty map.
    pub fn map() -> Self {
        Self::Map(ValueMap::new())
    }

    /// Short name of the variant, used in log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Logical(_) => "logical",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Address(_) => "address",
            Self::DateTime(dt) if dt.is_date() => "date",
            Self::DateTime(_) => "time",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub fn as_logical(&self) -> Option<bool> {
        match self {
            Self::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Narrows to a double; integers widen.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Narrows to an IPv4 address; a non-negative integer that fits in 32
    /// bits is accepted as the packed form.
    pub fn as_address(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Address(a) => Some(*a),
            Self::Integer(i) => u32::try_from(*i).ok().map(Ipv4Addr::from),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<DateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Consumes the value, returning the array contents if it is one.
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Indexes into an array value.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.as_array().and_then(|items| items.get(index))
    }

    /// Looks up a key in a map value.
    pub fn lookup(&self, key: &Value) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Appends to an array. Returns `false` if this is not an array.
    pub fn push(&mut self, item: impl Into<Value>) -> bool {
        match self.as_array_mut() {
            Some(items) => {
                items.push(item.into());
                true
            }
            None => false,
        }
    }

    /// Inserts into a map, replacing any existing entry for an equal key.
    /// Returns `false` if this is not a map.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> bool {
        match self.as_map_mut() {
            Some(map) => {
                map.insert(key.into(), value.into());
                true
            }
            None => false,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Logical(_) => 1,
            Self::Integer(_) => 2,
            Self::Double(_) => 3,
            Self::String(_) => 4,
            Self::Address(_) => 5,
            Self::DateTime(_) => 6,
            Self::Array(_) => 7,
            Self::Map(_) => 8,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Invalid, Self::Invalid) => Ordering::Equal,
            (Self::Logical(a), Self::Logical(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Address(a), Self::Address(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Logical(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u8> for Value {
    fn from(i: u8) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Self::Integer(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<Ipv4Addr> for Value {
    fn from(a: Ipv4Addr) -> Self {
        Self::Address(a)
    }
}

impl From<DateTime> for Value {
    fn from(dt: DateTime) -> Self {
        Self::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Map(map)
    }
}

// ============================================================================
// Display / Serialize
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "<invalid>"),
            Self::Logical(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Address(a) => write!(f, "@{a}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// JSON rendering for operator output. Addresses and dates become strings;
/// non-string map keys are rendered with `Display`.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Invalid => serializer.serialize_unit(),
            Self::Logical(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Double(d) => serializer.serialize_f64(*d),
            Self::String(s) => serializer.serialize_str(s),
            Self::Address(a) => serializer.collect_str(a),
            Self::DateTime(dt) => serializer.collect_str(dt),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    match k {
                        Self::String(s) => out.serialize_entry(s, v)?,
                        other => out.serialize_entry(&other.to_string(), v)?,
                    }
                }
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrowing_miss_returns_none() {
        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_integer(), None);
        assert_eq!(v.as_logical(), None);
        assert!(v.as_array().is_none());
        assert!(Value::Invalid.as_map().is_none());
    }

    #[test]
    fn test_integer_widens_to_double_and_address() {
        assert_eq!(Value::Integer(3).as_double(), Some(3.0));
        assert_eq!(
            Value::Integer(0x7F00_0001).as_address(),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
        assert_eq!(Value::Integer(-1).as_address(), None);
    }

    #[test]
    fn test_map_reinsert_replaces() {
        let mut map = Value::map();
        assert!(map.insert("key", 1));
        assert!(map.insert("key", 2));
        assert!(map.insert(7, "seven"));
        let inner = map.as_map().unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(map.lookup(&Value::from("key")), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_push_only_on_arrays() {
        let mut arr = Value::array([1, 2]);
        assert!(arr.push(3));
        assert_eq!(arr.as_array().map(<[Value]>::len), Some(3));

        let mut not_arr = Value::Integer(1);
        assert!(!not_arr.push(3));
    }

    #[test]
    fn test_ordering_across_variants() {
        assert!(Value::Invalid < Value::Logical(false));
        assert!(Value::Integer(100) < Value::Double(-1.0));
        assert!(Value::from("a") < Value::from("b"));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Integer(1), Value::Double(1.0));
    }

    #[test]
    fn test_date_packing() {
        let dt = DateTime::date(2024, 2, 29).unwrap();
        assert_eq!(dt.ticks(), (2024 << 9) | (2 << 5) | 29);
        assert_eq!(dt.to_string(), "2024-02-29");
        assert!(DateTime::date(2023, 2, 29).is_none());
    }

    #[test]
    fn test_time_packing() {
        let t = DateTime::time(13, 45, 7, 250).unwrap();
        assert_eq!(t.ticks(), 13 * 3_600_000 + 45 * 60_000 + 7_000 + 250);
        assert_eq!(t.to_string(), "13:45:07.250");
        assert!(t.to_naive_date().is_none());
        assert!(DateTime::time(24, 0, 0, 0).is_none());
    }

    #[test]
    fn test_display_nested() {
        let mut map = Value::map();
        map.insert("a", Value::array([true, false]));
        assert_eq!(map.to_string(), "{\"a\": [true, false]}");
        assert_eq!(Value::Address(Ipv4Addr::LOCALHOST).to_string(), "@127.0.0.1");
    }

    #[test]
    fn test_serialize_json() {
        let mut map = Value::map();
        map.insert("n", 3);
        map.insert(1, Value::Address(Ipv4Addr::new(10, 0, 0, 1)));
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"1":"10.0.0.1","n":3}"#);
    }
}
