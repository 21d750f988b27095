//! Prédicats et noms de descripteur pour [`StateVarType`].

use crate::types::StateVarType;

impl StateVarType {
    /// Nom du datatype tel qu'il apparaît dans un SCPD.
    pub fn descriptor_name(&self) -> &'static str {
        match self {
            StateVarType::UI1 => "ui1",
            StateVarType::UI2 => "ui2",
            StateVarType::UI4 => "ui4",
            StateVarType::I1 => "i1",
            StateVarType::I2 => "i2",
            StateVarType::I4 => "i4",
            StateVarType::Int => "int",
            StateVarType::R4 => "r4",
            StateVarType::R8 => "r8",
            StateVarType::Number => "number",
            StateVarType::Fixed14_4 => "fixed.14.4",
            StateVarType::Char => "char",
            StateVarType::String => "string",
            StateVarType::Boolean => "boolean",
            StateVarType::BinBase64 => "bin.base64",
            StateVarType::BinHex => "bin.hex",
            StateVarType::Date => "date",
            StateVarType::DateTime => "dateTime",
            StateVarType::DateTimeTZ => "dateTime.tz",
            StateVarType::Time => "time",
            StateVarType::TimeTZ => "time.tz",
            StateVarType::UUID => "uuid",
            StateVarType::URI => "uri",
        }
    }

    /// Résout un nom de datatype lu dans un SCPD.
    ///
    /// Accepte aussi `float`, synonyme historique de `r4`.
    pub fn from_descriptor_name(name: &str) -> Option<StateVarType> {
        let t = match name.trim() {
            "ui1" => StateVarType::UI1,
            "ui2" => StateVarType::UI2,
            "ui4" => StateVarType::UI4,
            "i1" => StateVarType::I1,
            "i2" => StateVarType::I2,
            "i4" => StateVarType::I4,
            "int" => StateVarType::Int,
            "r4" | "float" => StateVarType::R4,
            "r8" => StateVarType::R8,
            "number" => StateVarType::Number,
            "fixed.14.4" => StateVarType::Fixed14_4,
            "char" => StateVarType::Char,
            "string" => StateVarType::String,
            "boolean" => StateVarType::Boolean,
            "bin.base64" => StateVarType::BinBase64,
            "bin.hex" => StateVarType::BinHex,
            "date" => StateVarType::Date,
            "dateTime" => StateVarType::DateTime,
            "dateTime.tz" => StateVarType::DateTimeTZ,
            "time" => StateVarType::Time,
            "time.tz" => StateVarType::TimeTZ,
            "uuid" => StateVarType::UUID,
            "uri" => StateVarType::URI,
            _ => return None,
        };
        Some(t)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            StateVarType::UI1
                | StateVarType::UI2
                | StateVarType::UI4
                | StateVarType::I1
                | StateVarType::I2
                | StateVarType::I4
                | StateVarType::Int
                | StateVarType::R4
                | StateVarType::R8
                | StateVarType::Number
                | StateVarType::Fixed14_4
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            StateVarType::UI1
                | StateVarType::UI2
                | StateVarType::UI4
                | StateVarType::I1
                | StateVarType::I2
                | StateVarType::I4
                | StateVarType::Int
        )
    }

    pub fn is_unsigned_int(&self) -> bool {
        matches!(
            self,
            StateVarType::UI1 | StateVarType::UI2 | StateVarType::UI4
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            StateVarType::R4 | StateVarType::R8 | StateVarType::Number | StateVarType::Fixed14_4
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, StateVarType::String)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, StateVarType::BinBase64 | StateVarType::BinHex)
    }
}
