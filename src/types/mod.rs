//! # Types de valeurs UPnP
//!
//! Ce module implémente le système de types UPnP : les datatypes déclarés
//! dans les SCPD, le parsing/formatage des valeurs sur le fil, et le
//! compteur non signé 4 octets utilisé par GENA et LastChange.
//!
//! ## Fonctionnalités
//!
//! - ✅ Tous les datatypes builtin UPnP (i1..ui4, float, string, dates, bin, uri, uuid)
//! - ✅ Parsing indépendant de la locale (séparateur décimal `.`)
//! - ✅ Formatage canonique pour les descripteurs et les événements
//! - ✅ Compteur `ui4` avec le wrap GENA (2³²−1 → 1)

mod errors;
mod type_methods;
mod unsigned;
mod value_convert;
mod value_methods;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;
use uuid::Uuid;

pub use errors::StateValueError;
pub use unsigned::UnsignedIntegerFourBytes;

/// Datatype UPnP tel que déclaré dans un SCPD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateVarType {
    UI1,        // Entier non signé 8 bits
    UI2,        // Entier non signé 16 bits
    UI4,        // Entier non signé 32 bits
    I1,         // Entier signé 8 bits
    I2,         // Entier signé 16 bits
    I4,         // Entier signé 32 bits
    Int,        // Synonyme de i4
    R4,         // Flottant 32 bits
    R8,         // Flottant 64 bits
    Number,     // Synonyme de r8
    Fixed14_4,  // Décimal à virgule fixe
    Char,       // Caractère Unicode unique
    String,     // Chaîne de caractères
    Boolean,    // Booléen
    BinBase64,  // Binaire encodé en base64
    BinHex,     // Binaire encodé en hexadécimal
    Date,       // Date (YYYY-MM-DD)
    DateTime,   // Date et heure sans fuseau
    DateTimeTZ, // Date et heure avec fuseau
    Time,       // Heure sans fuseau
    TimeTZ,     // Heure avec fuseau
    UUID,       // Identifiant unique universel
    URI,        // Uniform Resource Identifier
}

/// Valeur typée d'une variable d'état.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    UI1(u8),
    UI2(u16),
    UI4(u32),
    I1(i8),
    I2(i16),
    I4(i32),
    Int(i32),
    R4(f32),
    R8(f64),
    Number(f64),
    Fixed14_4(f64),
    Char(char),
    String(String),
    Boolean(bool),
    BinBase64(Vec<u8>),
    BinHex(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTZ(DateTime<FixedOffset>),
    Time(NaiveTime),
    TimeTZ(DateTime<FixedOffset>),
    UUID(Uuid),
    URI(Url),
}
