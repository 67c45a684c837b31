//! Fixed-point risk codes.
//!
//! A risk value packs a severity estimate and a confidence into one `u32`:
//! severity maps `[-1.0, 1.0]` onto `[0, 2*PX]` in the high half-word,
//! confidence maps `[0.0, 1.0]` onto `[0, PX]` in the low half-word.
//!
//! Two risks are compared as *ranges*, not points: each value covers the
//! severity interval `sev ± (1 - confidence)`, so a low-confidence estimate
//! is a wide interval that intersects many others, while a confidence of
//! `1.0` collapses to a point. This is what lets a verdict with known
//! confidence subsume one with lower confidence.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{ProtoError, Result};
use crate::types::Comparison;

/// Fixed-point precision: buckets per unit interval.
pub const PX: u32 = 1000;

/// A packed (severity, confidence) risk code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Risk(u32);

impl Risk {
    /// Neutral risk: severity 0.0, confidence 0.0.
    pub const NONE: Risk = Risk(PX << 16);

    /// Pack a severity in `[-1.0, 1.0]` and a confidence in `[0.0, 1.0]`.
    /// Out-of-range inputs are clamped.
    pub fn make(severity: f64, confidence: f64) -> Risk {
        let sev = ((severity.clamp(-1.0, 1.0) + 1.0) * PX as f64).round() as u32;
        let conf = (confidence.clamp(0.0, 1.0) * PX as f64).round() as u32;
        Risk((sev.min(2 * PX) << 16) | conf.min(PX))
    }

    /// Rebuild from a raw packed word, clamping out-of-range buckets.
    pub fn from_bits(bits: u32) -> Risk {
        let sev = (bits >> 16).min(2 * PX);
        let conf = (bits & 0xffff).min(PX);
        Risk((sev << 16) | conf)
    }

    /// The raw packed word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Severity in `[-1.0, 1.0]`.
    pub fn severity(self) -> f64 {
        (self.0 >> 16) as f64 / PX as f64 - 1.0
    }

    /// Confidence in `[0.0, 1.0]`.
    pub fn confidence(self) -> f64 {
        (self.0 & 0xffff) as f64 / PX as f64
    }

    /// Parse a `"[-]S.SSS/C.CCC"` literal. The `"1"` and `"0"` border
    /// shortcuts are accepted on either side (`"1/0.5"`, `"-0.2/1"`).
    pub fn parse(text: &str) -> Result<Risk> {
        let bad = || ProtoError::InvalidRisk(text.to_string());
        let (sev_text, conf_text) = text.split_once('/').ok_or_else(bad)?;
        let severity: f64 = sev_text.trim().parse().map_err(|_| bad())?;
        let confidence: f64 = conf_text.trim().parse().map_err(|_| bad())?;
        if !(-1.0..=1.0).contains(&severity) || !(0.0..=1.0).contains(&confidence) {
            return Err(bad());
        }
        Ok(Risk::make(severity, confidence))
    }

    /// Render as a parseable literal. Round-trips through [`Risk::parse`]
    /// within fixed-point precision.
    pub fn put(self) -> String {
        format!("{:.3}/{:.3}", self.severity(), self.confidence())
    }

    /// Compare two risks: ordering by severity bucket (confidence breaks
    /// ties), plus range intersection. A risk always intersects itself.
    pub fn compare(self, other: Risk) -> Comparison {
        let order = (self.0 >> 16)
            .cmp(&(other.0 >> 16))
            .then((self.0 & 0xffff).cmp(&(other.0 & 0xffff)));

        let spread = (1.0 - self.confidence()) + (1.0 - other.confidence());
        let distance = (self.severity() - other.severity()).abs();
        // A small epsilon keeps touching ranges (and x vs x at full
        // confidence) on the intersecting side of fixed-point rounding.
        let intersects = distance <= spread + 1e-9;

        Comparison { order, intersects }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.put())
    }
}

impl Default for Risk {
    fn default() -> Self {
        Risk::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_inverse() {
        let r = Risk::make(0.5, 0.25);
        assert!((r.severity() - 0.5).abs() < 1.0 / PX as f64);
        assert!((r.confidence() - 0.25).abs() < 1.0 / PX as f64);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(Risk::make(5.0, 2.0), Risk::make(1.0, 1.0));
        assert_eq!(Risk::make(-5.0, -1.0), Risk::make(-1.0, 0.0));
    }

    #[test]
    fn test_parse_put_roundtrip() {
        for text in ["0.500/0.250", "-1.000/1.000", "0.000/0.000", "1.000/0.333"] {
            let r = Risk::parse(text).unwrap();
            assert_eq!(Risk::parse(&r.put()).unwrap(), r);
        }
    }

    #[test]
    fn test_parse_shortcuts() {
        assert_eq!(Risk::parse("1/0.5").unwrap(), Risk::make(1.0, 0.5));
        assert_eq!(Risk::parse("-1/1").unwrap(), Risk::make(-1.0, 1.0));
        assert_eq!(Risk::parse("0/0").unwrap(), Risk::NONE);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(Risk::parse("").is_err());
        assert!(Risk::parse("0.5").is_err());
        assert!(Risk::parse("2.0/0.5").is_err());
        assert!(Risk::parse("0.5/1.5").is_err());
        assert!(Risk::parse("x/y").is_err());
    }

    #[test]
    fn test_compare_monotone_in_severity() {
        let lo = Risk::make(-0.5, 1.0);
        let hi = Risk::make(0.5, 1.0);
        assert_eq!(lo.compare(hi).order, Ordering::Less);
        assert_eq!(hi.compare(lo).order, Ordering::Greater);
    }

    #[test]
    fn test_compare_self_is_equal_intersect() {
        for r in [Risk::NONE, Risk::make(0.7, 1.0), Risk::make(-1.0, 0.0)] {
            let c = r.compare(r);
            assert_eq!(c.order, Ordering::Equal);
            assert!(c.intersects);
        }
    }

    #[test]
    fn test_low_confidence_intersects() {
        // Wide ranges: 0.8 ± 0.9 overlaps -0.8 ± 0.9
        let a = Risk::make(0.8, 0.1);
        let b = Risk::make(-0.8, 0.1);
        assert!(a.compare(b).intersects);

        // Full confidence: points at different severities are disjoint
        let a = Risk::make(0.8, 1.0);
        let b = Risk::make(-0.8, 1.0);
        assert!(!a.compare(b).intersects);
    }
}
