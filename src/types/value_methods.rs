//! Parsing et formatage des valeurs d'état.
//!
//! Le parsing est strictement indépendant de la locale : le séparateur
//! décimal est `.` et les dates suivent les variantes ISO-8601 de la
//! spécification UPnP.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;
use uuid::Uuid;

use crate::types::{StateValue, StateValueError, StateVarType};

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";
const TIME_FMT: &str = "%H:%M:%S";

impl StateVarType {
    /// Parse une valeur textuelle selon ce datatype.
    pub fn parse(&self, raw: &str) -> Result<StateValue, StateValueError> {
        let err = || StateValueError::ParseError {
            var_type: *self,
            input: raw.to_string(),
        };
        let raw = raw.trim();

        let value = match self {
            StateVarType::UI1 => StateValue::UI1(raw.parse().map_err(|_| err())?),
            StateVarType::UI2 => StateValue::UI2(raw.parse().map_err(|_| err())?),
            StateVarType::UI4 => StateValue::UI4(raw.parse().map_err(|_| err())?),
            StateVarType::I1 => StateValue::I1(raw.parse().map_err(|_| err())?),
            StateVarType::I2 => StateValue::I2(raw.parse().map_err(|_| err())?),
            StateVarType::I4 => StateValue::I4(raw.parse().map_err(|_| err())?),
            StateVarType::Int => StateValue::Int(raw.parse().map_err(|_| err())?),
            StateVarType::R4 => StateValue::R4(parse_float(raw).map_err(|_| err())? as f32),
            StateVarType::R8 => StateValue::R8(parse_float(raw).map_err(|_| err())?),
            StateVarType::Number => StateValue::Number(parse_float(raw).map_err(|_| err())?),
            StateVarType::Fixed14_4 => {
                StateValue::Fixed14_4(parse_float(raw).map_err(|_| err())?)
            }
            StateVarType::Char => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => StateValue::Char(c),
                    _ => return Err(err()),
                }
            }
            StateVarType::String => StateValue::String(raw.to_string()),
            StateVarType::Boolean => StateValue::Boolean(parse_boolean(raw).ok_or_else(err)?),
            StateVarType::BinBase64 => {
                StateValue::BinBase64(BASE64.decode(raw).map_err(|_| err())?)
            }
            StateVarType::BinHex => StateValue::BinHex(hex_decode(raw).ok_or_else(err)?),
            StateVarType::Date => {
                StateValue::Date(NaiveDate::parse_from_str(raw, DATE_FMT).map_err(|_| err())?)
            }
            StateVarType::DateTime => StateValue::DateTime(
                NaiveDateTime::parse_from_str(raw, DATETIME_FMT).map_err(|_| err())?,
            ),
            StateVarType::DateTimeTZ => {
                StateValue::DateTimeTZ(DateTime::parse_from_rfc3339(raw).map_err(|_| err())?)
            }
            StateVarType::Time => {
                StateValue::Time(NaiveTime::parse_from_str(raw, TIME_FMT).map_err(|_| err())?)
            }
            StateVarType::TimeTZ => {
                // Heure avec fuseau : on parse par une date pivot pour garder l'offset.
                let pivot = format!("1970-01-01T{raw}");
                StateValue::TimeTZ(
                    DateTime::parse_from_str(&pivot, "%Y-%m-%dT%H:%M:%S%:z")
                        .map_err(|_| err())?,
                )
            }
            StateVarType::UUID => {
                let bare = raw.strip_prefix("uuid:").unwrap_or(raw);
                StateValue::UUID(Uuid::parse_str(bare).map_err(|_| err())?)
            }
            StateVarType::URI => StateValue::URI(Url::parse(raw).map_err(|_| err())?),
        };
        Ok(value)
    }
}

impl StateValue {
    /// Datatype de cette valeur.
    pub fn var_type(&self) -> StateVarType {
        match self {
            StateValue::UI1(_) => StateVarType::UI1,
            StateValue::UI2(_) => StateVarType::UI2,
            StateValue::UI4(_) => StateVarType::UI4,
            StateValue::I1(_) => StateVarType::I1,
            StateValue::I2(_) => StateVarType::I2,
            StateValue::I4(_) => StateVarType::I4,
            StateValue::Int(_) => StateVarType::Int,
            StateValue::R4(_) => StateVarType::R4,
            StateValue::R8(_) => StateVarType::R8,
            StateValue::Number(_) => StateVarType::Number,
            StateValue::Fixed14_4(_) => StateVarType::Fixed14_4,
            StateValue::Char(_) => StateVarType::Char,
            StateValue::String(_) => StateVarType::String,
            StateValue::Boolean(_) => StateVarType::Boolean,
            StateValue::BinBase64(_) => StateVarType::BinBase64,
            StateValue::BinHex(_) => StateVarType::BinHex,
            StateValue::Date(_) => StateVarType::Date,
            StateValue::DateTime(_) => StateVarType::DateTime,
            StateValue::DateTimeTZ(_) => StateVarType::DateTimeTZ,
            StateValue::Time(_) => StateVarType::Time,
            StateValue::TimeTZ(_) => StateVarType::TimeTZ,
            StateValue::UUID(_) => StateVarType::UUID,
            StateValue::URI(_) => StateVarType::URI,
        }
    }

    /// Représentation fil/descripteur de la valeur.
    pub fn format(&self) -> String {
        match self {
            StateValue::UI1(v) => v.to_string(),
            StateValue::UI2(v) => v.to_string(),
            StateValue::UI4(v) => v.to_string(),
            StateValue::I1(v) => v.to_string(),
            StateValue::I2(v) => v.to_string(),
            StateValue::I4(v) => v.to_string(),
            StateValue::Int(v) => v.to_string(),
            StateValue::R4(v) => format_float(*v as f64),
            StateValue::R8(v) => format_float(*v),
            StateValue::Number(v) => format_float(*v),
            StateValue::Fixed14_4(v) => format!("{v:.4}"),
            StateValue::Char(c) => c.to_string(),
            StateValue::String(s) => s.clone(),
            StateValue::Boolean(b) => (if *b { "1" } else { "0" }).to_string(),
            StateValue::BinBase64(bytes) => BASE64.encode(bytes),
            StateValue::BinHex(bytes) => hex_encode(bytes),
            StateValue::Date(d) => d.format(DATE_FMT).to_string(),
            StateValue::DateTime(dt) => dt.format(DATETIME_FMT).to_string(),
            StateValue::DateTimeTZ(dt) => dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            StateValue::Time(t) => t.format(TIME_FMT).to_string(),
            StateValue::TimeTZ(dt) => dt.format("%H:%M:%S%:z").to_string(),
            StateValue::UUID(u) => u.to_string(),
            StateValue::URI(u) => u.to_string(),
        }
    }

    /// Vue entière de la valeur, pour les plages et le delta d'événement.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::UI1(v) => Some(*v as i64),
            StateValue::UI2(v) => Some(*v as i64),
            StateValue::UI4(v) => Some(*v as i64),
            StateValue::I1(v) => Some(*v as i64),
            StateValue::I2(v) => Some(*v as i64),
            StateValue::I4(v) => Some(*v as i64),
            StateValue::Int(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Vue flottante de la valeur, pour les comparaisons de plage.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::R4(v) => Some(*v as f64),
            StateValue::R8(v) | StateValue::Number(v) | StateValue::Fixed14_4(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

fn parse_float(raw: &str) -> Result<f64, std::num::ParseFloatError> {
    // f64::from_str est indépendant de la locale, mais refuse les formes
    // que UPnP interdit de toute façon (virgule, espaces).
    raw.parse::<f64>()
}

fn format_float(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn hex_decode(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(raw.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_round_trip() {
        let v = StateVarType::UI4.parse("4294967295").unwrap();
        assert_eq!(v, StateValue::UI4(u32::MAX));
        assert_eq!(v.format(), "4294967295");
        assert!(StateVarType::UI1.parse("256").is_err());
        assert!(StateVarType::I2.parse("abc").is_err());
    }

    #[test]
    fn test_boolean_forms() {
        assert_eq!(
            StateVarType::Boolean.parse("yes").unwrap(),
            StateValue::Boolean(true)
        );
        assert_eq!(
            StateVarType::Boolean.parse("0").unwrap(),
            StateValue::Boolean(false)
        );
        assert_eq!(StateValue::Boolean(true).format(), "1");
        assert!(StateVarType::Boolean.parse("oui").is_err());
    }

    #[test]
    fn test_fixed_14_4_format() {
        let v = StateVarType::Fixed14_4.parse("3.5").unwrap();
        assert_eq!(v.format(), "3.5000");
    }

    #[test]
    fn test_float_is_locale_independent() {
        assert!(StateVarType::R8.parse("3,14").is_err());
        let v = StateVarType::R8.parse("3.14").unwrap();
        assert_eq!(v.as_f64(), Some(3.14));
    }

    #[test]
    fn test_char_rejects_multiple() {
        assert!(StateVarType::Char.parse("ab").is_err());
        assert_eq!(
            StateVarType::Char.parse("é").unwrap(),
            StateValue::Char('é')
        );
    }

    #[test]
    fn test_binary_round_trip() {
        let v = StateVarType::BinHex.parse("deadbeef").unwrap();
        assert_eq!(v, StateValue::BinHex(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(v.format(), "deadbeef");

        let b = StateVarType::BinBase64.parse("aGVsbG8=").unwrap();
        assert_eq!(b, StateValue::BinBase64(b"hello".to_vec()));
        assert_eq!(b.format(), "aGVsbG8=");
    }

    #[test]
    fn test_dates() {
        let d = StateVarType::Date.parse("2024-02-29").unwrap();
        assert_eq!(d.format(), "2024-02-29");

        let dt = StateVarType::DateTime.parse("2024-02-29T12:30:00").unwrap();
        assert_eq!(dt.format(), "2024-02-29T12:30:00");

        let tz = StateVarType::DateTimeTZ
            .parse("2024-02-29T12:30:00+02:00")
            .unwrap();
        assert_eq!(tz.format(), "2024-02-29T12:30:00+02:00");

        let t = StateVarType::TimeTZ.parse("12:30:00+02:00").unwrap();
        assert_eq!(t.format(), "12:30:00+02:00");
    }

    #[test]
    fn test_uuid_accepts_prefix() {
        let u = StateVarType::UUID
            .parse("uuid:6bd88f5f-bd03-4431-a1ef-f1113e2a3d6e")
            .unwrap();
        assert_eq!(u.format(), "6bd88f5f-bd03-4431-a1ef-f1113e2a3d6e");
    }

    #[test]
    fn test_uri() {
        let u = StateVarType::URI.parse("http://10.0.0.2:8080/desc.xml").unwrap();
        assert_eq!(u.format(), "http://10.0.0.2:8080/desc.xml");
        assert!(StateVarType::URI.parse("not a uri").is_err());
    }
}
