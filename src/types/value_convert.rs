//! Conversions depuis les types hôtes vers [`StateValue`].
//!
//! Permet au binder et aux implémentations de service de produire des
//! valeurs sans passer par le parsing textuel.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;
use uuid::Uuid;

use crate::types::StateValue;

impl From<u8> for StateValue {
    fn from(v: u8) -> Self {
        StateValue::UI1(v)
    }
}

impl From<u16> for StateValue {
    fn from(v: u16) -> Self {
        StateValue::UI2(v)
    }
}

impl From<u32> for StateValue {
    fn from(v: u32) -> Self {
        StateValue::UI4(v)
    }
}

impl From<i8> for StateValue {
    fn from(v: i8) -> Self {
        StateValue::I1(v)
    }
}

impl From<i16> for StateValue {
    fn from(v: i16) -> Self {
        StateValue::I2(v)
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::I4(v)
    }
}

impl From<f32> for StateValue {
    fn from(v: f32) -> Self {
        StateValue::R4(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::R8(v)
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Boolean(v)
    }
}

impl From<char> for StateValue {
    fn from(v: char) -> Self {
        StateValue::Char(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::String(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::String(v)
    }
}

impl From<NaiveDate> for StateValue {
    fn from(v: NaiveDate) -> Self {
        StateValue::Date(v)
    }
}

impl From<NaiveDateTime> for StateValue {
    fn from(v: NaiveDateTime) -> Self {
        StateValue::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for StateValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        StateValue::DateTimeTZ(v)
    }
}

impl From<NaiveTime> for StateValue {
    fn from(v: NaiveTime) -> Self {
        StateValue::Time(v)
    }
}

impl From<Uuid> for StateValue {
    fn from(v: Uuid) -> Self {
        StateValue::UUID(v)
    }
}

impl From<Url> for StateValue {
    fn from(v: Url) -> Self {
        StateValue::URI(v)
    }
}

impl From<Vec<u8>> for StateValue {
    fn from(v: Vec<u8>) -> Self {
        StateValue::BinBase64(v)
    }
}
