//! Wire formats emitted by the press controller.
//!
//! Two line shapes are understood:
//!
//! * a JSON object per line, e.g.
//!   `{"timestamp_ms":1200,"temperatura_C":181.5,"pressao_volts":1.93,"IR_pao":true}`
//! * a bracketed record, e.g. `[2025-01-01 12:12:00] [PRESSAO] [VALUE: 110]`
//!
//! Bracketed values are already in engineering units; only the JSON
//! `pressao_volts`/`pressao_un` fields carry raw transducer readings.
//!
//! Anything else (boot banners, blank lines) yields no samples.
use crate::error::ParseError;
use crate::reading::SensorKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static BRACKET_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]").expect("static regex"));

static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:[.,]\d*)?|[.,]\d+)(?:[eE][+-]?\d+)?")
        .expect("static regex")
});

/// One channel value extracted from a line, before calibration and filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    /// Channel the value belongs to.
    pub sensor: SensorKind,
    /// Value as reported by the device.
    pub value: f64,
    /// The value is in raw transducer units and still needs calibration.
    pub raw: bool,
}

impl ParsedSample {
    fn engineering(sensor: SensorKind, value: f64) -> Self {
        Self {
            sensor,
            value,
            raw: false,
        }
    }

    fn raw(sensor: SensorKind, value: f64) -> Self {
        Self {
            sensor,
            value,
            raw: true,
        }
    }
}

/// JSON field → (sensor, raw) mapping. Earlier entries win when a record
/// carries several spellings of the same channel.
const JSON_FIELDS: &[(&str, SensorKind, bool)] = &[
    ("temperatura_C", SensorKind::Temperature, false),
    ("temperature", SensorKind::Temperature, false),
    ("pressao_volts", SensorKind::Pressure, true),
    ("pressao_un", SensorKind::Pressure, true),
    ("pressao_kPa", SensorKind::Pressure, false),
    ("pressure", SensorKind::Pressure, false),
    ("distancia_mm", SensorKind::Distance, false),
    ("distance", SensorKind::Distance, false),
    ("umidade", SensorKind::Humidity, false),
    ("humidity", SensorKind::Humidity, false),
    ("IR_pao", SensorKind::IrBread, false),
    ("ir_bread", SensorKind::IrBread, false),
    ("IR_mao", SensorKind::IrHand, false),
    ("ir_hand", SensorKind::IrHand, false),
];

/// Parse one device line into zero or more samples.
pub fn parse_line(line: &str) -> Result<Vec<ParsedSample>, ParseError> {
    let line = line.trim();
    if line.starts_with('{') {
        parse_json(line)
    } else if line.starts_with('[') {
        parse_bracketed(line).map(|s| vec![s])
    } else {
        Ok(Vec::new())
    }
}

fn parse_json(line: &str) -> Result<Vec<ParsedSample>, ParseError> {
    let value: Value = serde_json::from_str(line).map_err(|e| ParseError::Json(e.to_string()))?;
    let Value::Object(record) = value else {
        return Err(ParseError::Json("expected an object".to_string()));
    };
    samples_from_record(&record)
}

/// Extract every known channel from a decoded JSON record.
fn samples_from_record(record: &Map<String, Value>) -> Result<Vec<ParsedSample>, ParseError> {
    let mut samples: Vec<ParsedSample> = Vec::new();
    for (field, sensor, raw) in JSON_FIELDS {
        if samples.iter().any(|s| &s.sensor == sensor) {
            continue;
        }
        let Some(value) = record.get(*field) else {
            continue;
        };
        let number = coerce_json(value).ok_or_else(|| ParseError::NotNumeric {
            field: (*field).to_string(),
            value: value.to_string(),
        })?;
        samples.push(if *raw {
            ParsedSample::raw(sensor.clone(), number)
        } else {
            ParsedSample::engineering(sensor.clone(), number)
        });
    }
    Ok(samples)
}

fn parse_bracketed(line: &str) -> Result<ParsedSample, ParseError> {
    let fields: Vec<&str> = BRACKET_FIELD
        .captures_iter(line)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();
    if fields.len() < 3 {
        return Err(ParseError::BracketFields {
            found: fields.len(),
        });
    }
    let name = fields[1];
    let payload = strip_value_label(fields[2]);
    let value = leading_number(payload).ok_or_else(|| ParseError::NotNumeric {
        field: name.to_string(),
        value: fields[2].to_string(),
    })?;

    Ok(ParsedSample::engineering(SensorKind::from_alias(name), value))
}

fn strip_value_label(field: &str) -> &str {
    match field.split_once(':') {
        Some((label, rest)) if label.trim().eq_ignore_ascii_case("value") => rest.trim(),
        _ => field,
    }
}

/// Numeric value of a JSON scalar: numbers as-is, booleans as 1/0, `null` as
/// NaN and numeric strings via [`leading_number`].
pub fn coerce_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(f64::NAN),
        Value::String(s) => coerce_str(s),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Numeric value of a text cell. Empty cells and `nan` are NaN; `true`/`false`
/// map to 1/0.
pub fn coerce_str(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") || text.eq_ignore_ascii_case("null") {
        return Some(f64::NAN);
    }
    if text.eq_ignore_ascii_case("true") {
        return Some(1.0);
    }
    if text.eq_ignore_ascii_case("false") {
        return Some(0.0);
    }
    leading_number(text)
}

/// Parse the leading numeric prefix of `text`, accepting a comma as decimal
/// separator: `"2,35 V"` → 2.35.
pub fn leading_number(text: &str) -> Option<f64> {
    let m = NUMERIC_PREFIX.find(text.trim())?;
    m.as_str().replace(',', ".").parse().ok()
}
