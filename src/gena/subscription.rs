//! Comptabilité des abonnements : SID, bail et numéros de séquence.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use url::Url;
use uuid::Uuid;

use crate::types::UnsignedIntegerFourBytes;

/// Identifiant d'abonnement, forme canonique `uuid:<UUID>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid(String);

impl Sid {
    pub fn random() -> Self {
        Self(format!("uuid:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sid {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(());
        }
        Ok(Self(s.to_string()))
    }
}

/// Durée de bail demandée ou accordée (`TIMEOUT: Second-n` ou `infinite`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Seconds(u32),
    Infinite,
}

impl Timeout {
    /// Parse la valeur d'un en-tête `TIMEOUT`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("infinite") {
            return Some(Timeout::Infinite);
        }
        let seconds = value
            .strip_prefix("Second-")
            .or_else(|| value.strip_prefix("second-"))?;
        seconds.parse().ok().map(Timeout::Seconds)
    }

    /// Borne le bail dans `[min, max]` ; `infinite` est ramené à `max`.
    pub fn clamp_seconds(&self, min: u32, max: u32) -> u32 {
        match self {
            Timeout::Infinite => max,
            Timeout::Seconds(s) => (*s).clamp(min, max),
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Seconds(s) => write!(f, "Second-{s}"),
            Timeout::Infinite => f.write_str("infinite"),
        }
    }
}

/// Compteur de séquence GENA d'un abonnement.
///
/// L'événement initial porte `SEQ: 0` ; ensuite le compteur est
/// strictement croissant et suit le wrap `ui4` (2³²−1 → 1, jamais 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSequence(UnsignedIntegerFourBytes);

impl EventSequence {
    pub fn initial() -> Self {
        Self(UnsignedIntegerFourBytes::ZERO)
    }

    pub fn current(&self) -> u32 {
        self.0.value()
    }

    /// Valeur à émettre pour le prochain événement, puis avance.
    pub fn next(&mut self) -> u32 {
        let value = self.0.value();
        self.0 = self.0.increment_wrapped();
        value
    }

    /// Successeur attendu d'un numéro reçu (côté client).
    pub fn successor(seq: u32) -> u32 {
        UnsignedIntegerFourBytes::new(seq).increment_wrapped().value()
    }
}

/// Abonnement côté device : callbacks du souscripteur et bail.
#[derive(Debug, Clone)]
pub struct LocalSubscription {
    pub sid: Sid,
    pub callbacks: Vec<Url>,
    pub expires_at: Instant,
    pub sequence: EventSequence,
}

impl LocalSubscription {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Extrait les URLs d'un en-tête `CALLBACK: <url1><url2>`.
pub(crate) fn parse_callback_header(value: &str) -> Vec<Url> {
    let mut urls = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        if let Ok(url) = Url::parse(rest[start + 1..start + end].trim()) {
            urls.push(url);
        }
        rest = &rest[start + end + 1..];
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_parse_and_format() {
        assert_eq!(Timeout::parse("Second-1800"), Some(Timeout::Seconds(1800)));
        assert_eq!(Timeout::parse("infinite"), Some(Timeout::Infinite));
        assert_eq!(Timeout::parse("minutes-3"), None);
        assert_eq!(Timeout::Seconds(300).to_string(), "Second-300");
    }

    #[test]
    fn test_timeout_clamp() {
        assert_eq!(Timeout::Seconds(5).clamp_seconds(60, 1800), 60);
        assert_eq!(Timeout::Seconds(7200).clamp_seconds(60, 1800), 1800);
        assert_eq!(Timeout::Infinite.clamp_seconds(60, 1800), 1800);
        assert_eq!(Timeout::Seconds(300).clamp_seconds(60, 1800), 300);
    }

    #[test]
    fn test_sequence_starts_at_zero_and_wraps() {
        let mut seq = EventSequence::initial();
        assert_eq!(seq.next(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);

        let mut near_wrap = EventSequence(UnsignedIntegerFourBytes::new(u32::MAX));
        assert_eq!(near_wrap.next(), u32::MAX);
        // Le 0 est réservé à l'événement initial : on repart à 1.
        assert_eq!(near_wrap.next(), 1);

        assert_eq!(EventSequence::successor(u32::MAX), 1);
        assert_eq!(EventSequence::successor(7), 8);
    }

    #[test]
    fn test_callback_header() {
        let urls = parse_callback_header("<http://10.0.0.2:9090/cb><http://10.0.0.3:9090/cb>");
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].as_str(), "http://10.0.0.2:9090/cb");

        assert!(parse_callback_header("garbage").is_empty());
    }
}
