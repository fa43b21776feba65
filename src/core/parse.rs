//! Response parsing helpers
//!
//! GCS answers have the shape `item1 [item2 [item3]] = val1 val2 ...` with
//! one line per item, or are a single bare value. These helpers turn such
//! answers into ordered maps whose iteration order is the order of the
//! requested items, or the order the controller sent them in.

use super::command::Dialect;
use super::error::GcsError;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Dictionary key: an item such as an axis name or a channel number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Numeric item
    Int(i64),
    /// Textual item
    Str(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

/// How to convert an item token read from the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyConv {
    /// Keep as string
    #[default]
    Str,
    /// Parse as integer
    Int,
}

/// A converted answer value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Boolean ("1"/"True" or "0"/"False")
    Bool(bool),
    /// Unconverted text
    Str(String),
}

impl Value {
    /// Numeric value as float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => f.write_str(if *v { "True" } else { "False" }),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// How to convert a value token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueConv {
    /// Keep as (trimmed) string
    #[default]
    Str,
    /// Integer, base guessed from a `0x`/`0o`/`0b` prefix
    Int,
    /// Floating point
    Float,
    /// Only "1"/"True" and "0"/"False" are accepted
    Bool,
    /// Integer if possible, else float, else string
    Auto,
}

/// Values of one item: a scalar if every item carried a single value
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Single value
    One(Value),
    /// Several values
    Many(Vec<Value>),
}

impl Entry {
    /// The scalar, if this is a single value
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(_) => None,
        }
    }

    /// All values as a slice
    pub fn values(&self) -> &[Value] {
        match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(v) => v,
        }
    }
}

/// Item columns and value lists of an answer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplitAnswer {
    /// One list per item dimension, `None` for answers without `=`
    pub items: Option<Vec<Vec<String>>>,
    /// Value tokens, one list per line
    pub values: Vec<Vec<String>>,
}

/// Split `answer` into item columns and value lists.
///
/// The number of item dimensions is taken from the first line. An answer
/// whose first line has no `=` is returned as a single value list holding
/// every trimmed line.
pub fn split_to_items_and_values(answer: &str) -> SplitAnswer {
    let lines: Vec<&str> = answer.split('\n').collect();
    let first = lines.first().copied().unwrap_or_default();
    let Some((left, _)) = first.split_once('=') else {
        return SplitAnswer {
            items: None,
            values: vec![lines.iter().map(|l| l.trim().to_string()).collect()],
        };
    };

    let dims = left.split_whitespace().count();
    let mut items = vec![Vec::new(); dims];
    let mut values = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (left, right) = line.split_once('=').unwrap_or((line, ""));
        let mut tokens = left.split_whitespace();
        for column in items.iter_mut() {
            column.push(tokens.next().unwrap_or_default().to_string());
        }
        values.push(right.split_whitespace().map(str::to_string).collect());
    }
    SplitAnswer {
        items: Some(items),
        values,
    }
}

/// Convert `token` to an integer if it has no decimal point (hex if it
/// contains "0x"), else to a float, else leave it as string. Never fails.
pub fn convert_to_number(token: &str) -> Value {
    if !token.contains('.') {
        let lower = token.to_ascii_lowercase();
        let parsed = if let Some(pos) = lower.find("0x") {
            let (sign, digits) = (&lower[..pos], &lower[pos + 2..]);
            i64::from_str_radix(digits, 16)
                .ok()
                .and_then(|v| match sign {
                    "" | "+" => Some(v),
                    "-" => Some(-v),
                    _ => None,
                })
        } else {
            token.parse::<i64>().ok()
        };
        return parsed.map_or_else(|| Value::Str(token.to_string()), Value::Int);
    }
    token
        .parse::<f64>()
        .map_or_else(|_| Value::Str(token.to_string()), Value::Float)
}

fn parse_int(token: &str) -> Option<i64> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let lower = body.to_ascii_lowercase();
    let value = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Convert a (whitespace padded) `token` as requested by `conv`.
pub fn convert_value(token: &str, conv: ValueConv) -> Result<Value, GcsError> {
    let token = token.trim();
    match conv {
        ValueConv::Str => Ok(Value::Str(token.to_string())),
        ValueConv::Auto => Ok(convert_to_number(token)),
        ValueConv::Bool => match token {
            "1" | "True" => Ok(Value::Bool(true)),
            "0" | "False" => Ok(Value::Bool(false)),
            _ => Err(GcsError::Conversion(format!(
                "unexpected response {token:?} for bool conversion"
            ))),
        },
        ValueConv::Int => parse_int(token)
            .map(Value::Int)
            .ok_or_else(|| GcsError::Conversion(format!("invalid integer {token:?}"))),
        ValueConv::Float => token
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| GcsError::Conversion(format!("invalid float {token:?}"))),
    }
}

fn convert_key(token: &str, conv: KeyConv) -> Result<Key, GcsError> {
    match conv {
        KeyConv::Str => Ok(Key::Str(token.trim().to_string())),
        KeyConv::Int => parse_int(token.trim())
            .map(Key::Int)
            .ok_or_else(|| GcsError::Conversion(format!("invalid integer item {token:?}"))),
    }
}

/// Converter for value column `column`; the last converter repeats.
fn conv_for(valueconv: &[ValueConv], column: usize) -> ValueConv {
    valueconv
        .get(column)
        .or_else(|| valueconv.last())
        .copied()
        .unwrap_or_default()
}

/// Convert one row of value tokens; returns the values and whether the
/// row had more than one.
fn convert_row(tokens: &[String], valueconv: &[ValueConv]) -> Result<(Vec<Value>, bool), GcsError> {
    let mut values = Vec::with_capacity(tokens.len());
    let mut multival = false;
    for (column, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            continue;
        }
        values.push(convert_value(token, conv_for(valueconv, column))?);
        multival |= column > 0;
    }
    Ok((values, multival))
}

fn collapse(values: Vec<Value>, multival: bool) -> Entry {
    if multival {
        Entry::Many(values)
    } else {
        Entry::One(
            values
                .into_iter()
                .next()
                .unwrap_or_else(|| Value::Str(String::new())),
        )
    }
}

fn row_values<'a>(split: &'a SplitAnswer, row: usize) -> Result<&'a [String], GcsError> {
    split.values.get(row).map(Vec::as_slice).ok_or_else(|| {
        GcsError::UnexpectedResponse(format!(
            "answer has {} lines, item {} requested",
            split.values.len(),
            row + 1
        ))
    })
}

/// Item keys for one dimension: the requested items padded with their last
/// element to the answer's length, or the items read from the answer.
fn item_keys(
    requested: Option<&[Key]>,
    read: Option<&Vec<String>>,
    conv: KeyConv,
    pad: bool,
) -> Result<Option<Vec<Key>>, GcsError> {
    match requested {
        Some(items) if !items.is_empty() => {
            let mut keys = items.to_vec();
            if pad {
                if let (Some(last), Some(read)) = (items.last(), read) {
                    while keys.len() < read.len() {
                        keys.push(last.clone());
                    }
                }
            }
            Ok(Some(keys))
        }
        _ => match read {
            Some(read) => read
                .iter()
                .map(|token| convert_key(token, conv))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            None => Ok(None),
        },
    }
}

/// Parse `item = val1 val2 ...` lines into `{item: values}`.
///
/// With `items` given, keys are taken from `items` in order and `itemconv`
/// is ignored; otherwise the echoed items are converted with `itemconv`.
pub fn one_item_dict(
    answer: &str,
    items: Option<&[Key]>,
    itemconv: KeyConv,
    valueconv: &[ValueConv],
) -> Result<IndexMap<Key, Entry>, GcsError> {
    let split = split_to_items_and_values(answer);
    let read = split.items.as_ref().and_then(|i| i.first());
    let keys = match items {
        Some(items) => items.to_vec(),
        None => match item_keys(None, read, itemconv, false)? {
            Some(keys) => keys,
            None => return Ok(IndexMap::new()),
        },
    };

    let mut rows = Vec::with_capacity(keys.len());
    let mut multival = false;
    for (row, key) in keys.into_iter().enumerate() {
        let (values, multi) = convert_row(row_values(&split, row)?, valueconv)?;
        multival |= multi;
        rows.push((key, values));
    }

    Ok(rows
        .into_iter()
        .map(|(key, values)| (key, collapse(values, multival)))
        .collect())
}

/// Parse `item1 item2 = values` lines into `{item1: {item2: values}}`.
///
/// With `list_to_string`, every value list is joined into one string.
pub fn two_item_dict(
    answer: &str,
    items1: Option<&[Key]>,
    items2: Option<&[Key]>,
    itemconv: [KeyConv; 2],
    valueconv: &[ValueConv],
    list_to_string: bool,
) -> Result<IndexMap<Key, IndexMap<Key, Entry>>, GcsError> {
    let split = split_to_items_and_values(answer);
    let read = split.items.as_ref();
    let Some(keys1) = item_keys(items1, read.and_then(|i| i.first()), itemconv[0], true)? else {
        return Ok(IndexMap::new());
    };
    let Some(keys2) = item_keys(items2, read.and_then(|i| i.get(1)), itemconv[1], false)? else {
        return Ok(IndexMap::new());
    };

    let mut rows = Vec::with_capacity(keys1.len());
    let mut multival = false;
    for (row, key1) in keys1.into_iter().enumerate() {
        let key2 = keys2.get(row).cloned().ok_or_else(|| {
            GcsError::ParameterType(format!("no second item for row {}", row + 1))
        })?;
        let (values, multi) = convert_row(row_values(&split, row)?, valueconv)?;
        multival |= multi;
        rows.push((key1, key2, values));
    }

    let mut dict: IndexMap<Key, IndexMap<Key, Entry>> = IndexMap::new();
    for (key1, key2, values) in rows {
        let entry = if list_to_string {
            let joined: Vec<String> = values.iter().map(ToString::to_string).collect();
            Entry::One(Value::Str(joined.join(" ")))
        } else {
            collapse(values, multival)
        };
        dict.entry(key1).or_default().insert(key2, entry);
    }
    Ok(dict)
}

/// Parse `item1 item2 item3 = values` lines into
/// `{(item1, item2): {item3: values}}`.
pub fn three_item_dict(
    answer: &str,
    items1: Option<&[Key]>,
    items2: Option<&[Key]>,
    items3: Option<&[Key]>,
    itemconv: [KeyConv; 3],
    valueconv: &[ValueConv],
) -> Result<IndexMap<(Key, Key), IndexMap<Key, Entry>>, GcsError> {
    let split = split_to_items_and_values(answer);
    let read = split.items.as_ref();
    let Some(keys1) = item_keys(items1, read.and_then(|i| i.first()), itemconv[0], true)? else {
        return Ok(IndexMap::new());
    };
    let Some(keys2) = item_keys(items2, read.and_then(|i| i.get(1)), itemconv[1], true)? else {
        return Ok(IndexMap::new());
    };
    let Some(keys3) = item_keys(items3, read.and_then(|i| i.get(2)), itemconv[2], true)? else {
        return Ok(IndexMap::new());
    };

    let mut rows = Vec::with_capacity(keys1.len());
    let mut multival = false;
    for (row, key1) in keys1.into_iter().enumerate() {
        let (Some(key2), Some(key3)) = (keys2.get(row), keys3.get(row)) else {
            return Err(GcsError::ParameterType(format!(
                "missing items for row {}",
                row + 1
            )));
        };
        let (values, multi) = convert_row(row_values(&split, row)?, valueconv)?;
        multival |= multi;
        rows.push(((key1, key2.clone()), key3.clone(), values));
    }

    let mut dict: IndexMap<(Key, Key), IndexMap<Key, Entry>> = IndexMap::new();
    for (pair, key3, values) in rows {
        dict.entry(pair)
            .or_default()
            .insert(key3, collapse(values, multival));
    }
    Ok(dict)
}

/// Map items to the state of their bit in `value` (LSB is the first item).
///
/// Without `all_items`, items are numbered from 1 up to the bit width of
/// `value` or the largest requested item. Only `items` are returned, or
/// every item if `items` is `None`.
pub fn bitmask_dict(
    value: u64,
    all_items: Option<&[Key]>,
    items: Option<&[Key]>,
) -> Result<IndexMap<Key, bool>, GcsError> {
    let width = (u64::BITS - value.leading_zeros()).max(1) as usize;
    let generated;
    let all_items = match all_items {
        Some(all) => all,
        None => {
            let mut max_item = 0usize;
            for item in items.unwrap_or_default() {
                let n = match item {
                    Key::Int(n) => usize::try_from(*n).ok(),
                    Key::Str(s) => s.trim().parse::<usize>().ok(),
                }
                .ok_or_else(|| GcsError::ParameterType(format!("item {item} is not a number")))?;
                max_item = max_item.max(n);
            }
            generated = (1..=width.max(max_item))
                .map(|n| Key::Int(n as i64))
                .collect::<Vec<_>>();
            generated.as_slice()
        }
    };
    let items = match items {
        Some(items) if !items.is_empty() => items,
        _ => all_items,
    };

    let mut dict = IndexMap::new();
    for (bit, candidate) in all_items.iter().enumerate() {
        let label = candidate.to_string();
        if let Some(item) = items.iter().find(|item| item.to_string() == label) {
            let set = bit < 64 && value >> bit & 1 == 1;
            dict.insert(item.clone(), set);
        }
    }
    Ok(dict)
}

/// Split a parameter answer. GCS 2 separates parameters by whitespace,
/// GCS 1 answers carry one parameter per character.
pub fn split_params(answer: &str, dialect: Dialect) -> Vec<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Vec::new();
    }
    match dialect {
        Dialect::Gcs2 => answer.split_whitespace().map(str::to_string).collect(),
        Dialect::Gcs1 => answer
            .chars()
            .map(|c| c.to_string().trim().to_string())
            .collect(),
    }
}

/// Split a parameter answer at `separator`.
pub fn split_params_by(answer: &str, separator: &str) -> Vec<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Vec::new();
    }
    answer
        .split(separator)
        .map(|s| s.trim().to_string())
        .collect()
}

fn header_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#*\s*([^=]*?)\s*=\s*([^=]*?)\s*$").ok())
        .as_ref()
}

/// Parse the `# key = value` lines of a bulk header. Values are converted
/// with [`convert_to_number`].
pub fn gcs_header(header: &str) -> IndexMap<String, Value> {
    let Some(re) = header_line() else {
        return IndexMap::new();
    };
    header
        .split('\n')
        .filter_map(|line| {
            let caps = re.captures(line.trim_end())?;
            let key = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str();
            Some((key.to_string(), convert_to_number(value)))
        })
        .collect()
}

/// Command names listed in a `HLP?` answer, upper case. With `strip`, the
/// first and the last line are skipped.
pub fn supported_commands(qhlp: &str, strip: bool) -> Vec<String> {
    let lines: Vec<&str> = qhlp.lines().collect();
    let lines = if strip && lines.len() >= 2 {
        &lines[1..lines.len() - 1]
    } else if strip {
        &[][..]
    } else {
        &lines[..]
    };
    lines
        .iter()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_ascii_uppercase)
        .collect()
}

/// Render parameter ids, given in decimal or hexadecimal, as `[0x1, 0x2a]`.
pub fn hex_ids(ids: &[&str]) -> Result<String, GcsError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        let value = id
            .parse::<u64>()
            .ok()
            .or_else(|| {
                let digits = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")).unwrap_or(id);
                u64::from_str_radix(digits, 16).ok()
            })
            .ok_or_else(|| GcsError::ParameterType(format!("invalid parameter id {id:?}")))?;
        out.push(format!("0x{value:x}"));
    }
    Ok(format!("[{}]", out.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> Vec<Key> {
        items.iter().map(|s| Key::from(*s)).collect()
    }

    #[test]
    fn test_split_to_items_and_values() {
        let split = split_to_items_and_values("1 2=0.1 0.2 \n3 4=0.3\n");
        assert_eq!(
            split.items,
            Some(vec![vec!["1".into(), "3".into()], vec!["2".into(), "4".into()]])
        );
        assert_eq!(split.values[1], vec!["0.3".to_string()]);

        let bare = split_to_items_and_values("42\n");
        assert!(bare.items.is_none());
        assert_eq!(bare.values, vec![vec!["42".to_string(), String::new()]]);
    }

    #[test]
    fn test_one_item_dict_requested_items() {
        // Trailing space marks a continuation line on the wire
        let dict = one_item_dict("1 = 5.0 \n", Some(&keys(&["1"])), KeyConv::Str, &[ValueConv::Float])
            .unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict[&Key::from("1")], Entry::One(Value::Float(5.0)));
    }

    #[test]
    fn test_one_item_dict_echoed_items() {
        let dict = one_item_dict("2=1 \n1=0\n", None, KeyConv::Int, &[ValueConv::Bool]).unwrap();
        let order: Vec<&Key> = dict.keys().collect();
        assert_eq!(order, vec![&Key::Int(2), &Key::Int(1)]);
        assert_eq!(dict[&Key::Int(1)], Entry::One(Value::Bool(false)));
    }

    #[test]
    fn test_one_item_dict_multiple_values() {
        let dict = one_item_dict(
            "A=1 0.5 x \nB=2 1.5 y\n",
            None,
            KeyConv::Str,
            &[ValueConv::Int, ValueConv::Float, ValueConv::Str],
        )
        .unwrap();
        assert_eq!(
            dict[&Key::from("B")],
            Entry::Many(vec![Value::Int(2), Value::Float(1.5), Value::Str("y".into())])
        );
    }

    #[test]
    fn test_one_item_dict_round_trip() {
        let cases: Vec<Vec<(String, f64)>> = vec![
            vec![("1".into(), 5.0)],
            vec![("X".into(), -0.125), ("Y".into(), 1e-9), ("Z".into(), 123456.789)],
            (1..=9).map(|i| (i.to_string(), f64::from(i) / 3.0)).collect(),
        ];
        for case in cases {
            let reply = case
                .iter()
                .map(|(item, value)| format!("{item}={value}"))
                .collect::<Vec<_>>()
                .join(" \n")
                + "\n";
            let items: Vec<Key> = case.iter().map(|(item, _)| Key::from(item.as_str())).collect();
            let dict = one_item_dict(&reply, Some(&items), KeyConv::Str, &[ValueConv::Float]).unwrap();
            let expected: IndexMap<Key, Entry> = case
                .iter()
                .map(|(item, value)| (Key::from(item.as_str()), Entry::One(Value::Float(*value))))
                .collect();
            assert_eq!(dict, expected);
        }
    }

    #[test]
    fn test_one_item_dict_missing_line() {
        let err = one_item_dict("1=1\n", Some(&keys(&["1", "2"])), KeyConv::Str, &[ValueConv::Int])
            .unwrap_err();
        assert!(matches!(err, GcsError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_empty_value_becomes_empty_string() {
        let dict = one_item_dict("1=\n", None, KeyConv::Str, &[ValueConv::Float]).unwrap();
        assert_eq!(dict[&Key::from("1")], Entry::One(Value::Str(String::new())));
    }

    #[test]
    fn test_two_item_dict() {
        let answer = "1 0x1=10 \n1 0x2=20 \n2 0x1=30\n";
        let dict = two_item_dict(answer, None, None, [KeyConv::Int, KeyConv::Int], &[ValueConv::Auto], false)
            .unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict[&Key::Int(1)][&Key::Int(2)], Entry::One(Value::Int(20)));
        assert_eq!(dict[&Key::Int(2)][&Key::Int(1)], Entry::One(Value::Int(30)));

        // A single requested first item is repeated for every line
        let dict = two_item_dict(
            "1 1=a b \n1 2=c d\n",
            Some(&keys(&["1"])),
            None,
            [KeyConv::Str, KeyConv::Str],
            &[ValueConv::Str],
            true,
        )
        .unwrap();
        assert_eq!(dict[&Key::from("1")][&Key::from("2")], Entry::One(Value::Str("c d".into())));
    }

    #[test]
    fn test_three_item_dict() {
        let answer = "1 2 3=4.5 \n1 2 4=5.5\n";
        let dict = three_item_dict(
            answer,
            None,
            None,
            None,
            [KeyConv::Int, KeyConv::Int, KeyConv::Int],
            &[ValueConv::Float],
        )
        .unwrap();
        let inner = &dict[&(Key::Int(1), Key::Int(2))];
        assert_eq!(inner[&Key::Int(4)], Entry::One(Value::Float(5.5)));
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(convert_value("1", ValueConv::Bool).unwrap(), Value::Bool(true));
        assert_eq!(convert_value(" True ", ValueConv::Bool).unwrap(), Value::Bool(true));
        assert_eq!(convert_value("0", ValueConv::Bool).unwrap(), Value::Bool(false));
        assert_eq!(convert_value("False", ValueConv::Bool).unwrap(), Value::Bool(false));
        assert!(matches!(
            convert_value("2", ValueConv::Bool),
            Err(GcsError::Conversion(_))
        ));
    }

    #[test]
    fn test_int_conversion_guesses_base() {
        assert_eq!(convert_value("0x1F", ValueConv::Int).unwrap(), Value::Int(31));
        assert_eq!(convert_value("-12", ValueConv::Int).unwrap(), Value::Int(-12));
        assert!(convert_value("1.5", ValueConv::Int).is_err());
    }

    #[test]
    fn test_convert_to_number() {
        assert_eq!(convert_to_number("42"), Value::Int(42));
        assert_eq!(convert_to_number("0x10"), Value::Int(16));
        assert_eq!(convert_to_number("2.5"), Value::Float(2.5));
        assert_eq!(convert_to_number("M-111.1DG"), Value::Str("M-111.1DG".into()));
        assert_eq!(convert_to_number("abc"), Value::Str("abc".into()));
    }

    #[test]
    fn test_bitmask_dict() {
        let all = keys(&["A", "B", "C"]);
        let dict = bitmask_dict(0b101, Some(&all), None).unwrap();
        assert_eq!(
            dict.into_iter().collect::<Vec<_>>(),
            vec![(Key::from("A"), true), (Key::from("B"), false), (Key::from("C"), true)]
        );

        let dict = bitmask_dict(0b10, None, Some(&[Key::Int(2), Key::Int(5)])).unwrap();
        assert_eq!(dict[&Key::Int(2)], true);
        assert_eq!(dict[&Key::Int(5)], false);
    }

    #[test]
    fn test_split_params() {
        assert_eq!(split_params("1 2 3\n", Dialect::Gcs2), vec!["1", "2", "3"]);
        assert_eq!(split_params("ABC\n", Dialect::Gcs1), vec!["A", "B", "C"]);
        assert_eq!(split_params_by("a;b ; c", ";"), vec!["a", "b", "c"]);
        assert!(split_params("  \n", Dialect::Gcs2).is_empty());
    }

    #[test]
    fn test_gcs_header() {
        let header = gcs_header("# DIM = 2 \n# NDATA = 3 \n# SAMPLE_TIME = 0.0001 \n# NAME0 = Target\n# END_HEADER \n");
        assert_eq!(header["DIM"], Value::Int(2));
        assert_eq!(header["SAMPLE_TIME"], Value::Float(0.0001));
        assert_eq!(header["NAME0"], Value::Str("Target".into()));
        assert!(!header.contains_key("END_HEADER"));
        assert_eq!(header.get_index(0).map(|(k, _)| k.as_str()), Some("DIM"));
    }

    #[test]
    fn test_supported_commands() {
        let qhlp = "The following commands are valid: \n#4 Request Status Register \nMOV {<AxisID> <Position>} \nPOS? [{<AxisID>}] \nend of help\n";
        assert_eq!(supported_commands(qhlp, true), vec!["#4", "MOV", "POS?"]);
    }

    #[test]
    fn test_hex_ids() {
        assert_eq!(hex_ids(&["1", "0x2a", "ff"]).unwrap(), "[0x1, 0x2a, 0xff]");
        assert!(hex_ids(&["xyz"]).is_err());
    }
}
