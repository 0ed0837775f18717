//! Key patterns
//!
//! A key pattern is a template where each position is either a literal
//! character or a wildcard class in brackets, e.g. `[0-9A-F][0-9A-F]-00`.
//! A class lists characters and ranges (`a-z`). Key `n` of a pattern is found
//! by reading `n` as a mixed-radix number whose rightmost digit belongs to the
//! rightmost wildcard.

use crate::capability::KeyIterator;
use crate::error::{CapabilityError, CapabilityResult};
use crate::keyspace::{KeyRange, KeySpace};
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How a generated key string becomes key bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    /// Hex digits decoded pairwise, `-` separators skipped
    #[default]
    Hex,

    /// Raw bytes of the key string
    Ascii,
}

impl KeyEncoding {
    /// Encode a rendered key into bytes, appending to `out`
    pub fn encode_into(&self, key: &[u8], out: &mut Vec<u8>) -> CapabilityResult<()> {
        out.clear();
        match self {
            KeyEncoding::Ascii => {
                out.extend_from_slice(key);
                Ok(())
            }
            KeyEncoding::Hex => {
                let mut high: Option<u8> = None;
                for &c in key {
                    if c == b'-' {
                        continue;
                    }
                    let nibble = hex_value(c).ok_or_else(|| CapabilityError::KeyEncoding {
                        key: String::from_utf8_lossy(key).into_owned(),
                        reason: format!("'{}' is not a hex digit", c as char),
                    })?;
                    match high.take() {
                        Some(h) => out.push((h << 4) | nibble),
                        None => high = Some(nibble),
                    }
                }
                if high.is_some() {
                    return Err(CapabilityError::KeyEncoding {
                        key: String::from_utf8_lossy(key).into_owned(),
                        reason: "odd number of hex digits".into(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Encode a rendered key into a fresh buffer
    pub fn encode(&self, key: &str) -> CapabilityResult<Vec<u8>> {
        let mut out = Vec::with_capacity(key.len());
        self.encode_into(key.as_bytes(), &mut out)?;
        Ok(out)
    }
}

impl fmt::Display for KeyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEncoding::Hex => write!(f, "hex"),
            KeyEncoding::Ascii => write!(f, "ascii"),
        }
    }
}

pub(crate) fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Literal(u8),
    Class(Vec<u8>),
}

/// A parsed key pattern bound to a key encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    source: String,
    encoding: KeyEncoding,
    positions: Vec<Position>,
    size: BigUint,
}

fn is_special(c: u8) -> bool {
    matches!(c, b'[' | b']' | b'-' | b'*')
}

impl KeyPattern {
    /// Parse and validate `pattern` for use with `encoding`
    pub fn new(pattern: &str, encoding: KeyEncoding) -> CapabilityResult<Self> {
        let invalid = |reason: &str| CapabilityError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if !pattern.is_ascii() {
            return Err(invalid("only ASCII characters are supported"));
        }

        let bytes = pattern.as_bytes();
        let mut positions = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'[' => {
                    let close = bytes[i + 1..]
                        .iter()
                        .position(|&c| c == b']')
                        .map(|p| i + 1 + p)
                        .ok_or_else(|| invalid("unterminated wildcard class"))?;
                    let members = parse_class(&bytes[i + 1..close]).map_err(|r| invalid(&r))?;
                    positions.push(Position::Class(members));
                    i = close + 1;
                }
                b']' => return Err(invalid("unexpected ']'")),
                b'*' => return Err(invalid("'*' is not a valid key character")),
                c => {
                    positions.push(Position::Literal(c));
                    i += 1;
                }
            }
        }

        let size = positions.iter().fold(BigUint::one(), |acc, p| match p {
            Position::Class(members) => acc * members.len(),
            Position::Literal(_) => acc,
        });

        let parsed = Self {
            source: pattern.to_string(),
            encoding,
            positions,
            size,
        };
        parsed.check_encoding()?;
        Ok(parsed)
    }

    /// Every key rendered from this pattern must be encodable
    fn check_encoding(&self) -> CapabilityResult<()> {
        if self.encoding == KeyEncoding::Ascii {
            return Ok(());
        }
        let mut digits = 0usize;
        for position in &self.positions {
            let chars: &[u8] = match position {
                Position::Literal(b'-') => continue,
                Position::Literal(c) => std::slice::from_ref(c),
                Position::Class(members) => members,
            };
            if let Some(&bad) = chars.iter().find(|&&c| hex_value(c).is_none()) {
                return Err(CapabilityError::KeyEncoding {
                    key: self.source.clone(),
                    reason: format!("'{}' is not a hex digit", bad as char),
                });
            }
            digits += 1;
        }
        if digits % 2 != 0 {
            return Err(CapabilityError::KeyEncoding {
                key: self.source.clone(),
                reason: "odd number of hex digits".into(),
            });
        }
        Ok(())
    }

    /// The pattern text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }

    /// Number of wildcard positions
    pub fn wildcard_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| matches!(p, Position::Class(_)))
            .count()
    }

    /// Number of keys the pattern describes
    pub fn key_count(&self) -> &BigUint {
        &self.size
    }

    /// Render key number `index`, or `None` when out of range
    pub fn key_at(&self, index: &BigUint) -> Option<String> {
        if index >= &self.size {
            return None;
        }
        let digits = self.digits_of(index);
        let mut out = Vec::with_capacity(self.positions.len());
        self.render(&digits, &mut out);
        String::from_utf8(out).ok()
    }

    /// Wildcard digits of `index`, leftmost wildcard first
    fn digits_of(&self, index: &BigUint) -> Vec<usize> {
        let radixes = self.radixes();
        let mut digits = vec![0usize; radixes.len()];
        let mut rest = index.clone();
        for (slot, radix) in digits.iter_mut().zip(radixes.iter()).rev() {
            let r = BigUint::from(*radix);
            // digit < radix, so it always fits
            *slot = (&rest % &r).to_usize().unwrap_or(0);
            rest /= r;
        }
        digits
    }

    fn radixes(&self) -> Vec<usize> {
        self.positions
            .iter()
            .filter_map(|p| match p {
                Position::Class(members) => Some(members.len()),
                Position::Literal(_) => None,
            })
            .collect()
    }

    fn render(&self, digits: &[usize], out: &mut Vec<u8>) {
        out.clear();
        let mut wildcard = 0;
        for position in &self.positions {
            match position {
                Position::Literal(c) => out.push(*c),
                Position::Class(members) => {
                    out.push(members[digits[wildcard]]);
                    wildcard += 1;
                }
            }
        }
    }
}

fn parse_class(body: &[u8]) -> Result<Vec<u8>, String> {
    if body.is_empty() {
        return Err("empty wildcard class".into());
    }
    let mut members = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let c = body[i];
        if is_special(c) {
            return Err(format!("'{}' cannot be used inside a wildcard class", c as char));
        }
        if body.get(i + 1) == Some(&b'-') {
            let end = *body
                .get(i + 2)
                .ok_or_else(|| format!("range starting at '{}' has no end", c as char))?;
            if is_special(end) {
                return Err(format!("'{}' cannot end a range", end as char));
            }
            if end < c {
                return Err(format!("range '{}-{}' is reversed", c as char, end as char));
            }
            members.extend(c..=end);
            i += 3;
        } else {
            members.push(c);
            i += 1;
        }
    }
    let mut seen = [false; 128];
    members.retain(|&c| !std::mem::replace(&mut seen[c as usize], true));
    Ok(members)
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl KeySpace for KeyPattern {
    fn size(&self) -> BigUint {
        self.size.clone()
    }

    fn key_iterator(&self) -> Box<dyn KeyIterator> {
        Box::new(PatternKeyIterator::new(Arc::new(self.clone())))
    }
}

/// Iterates the keys of a [`KeyPattern`] within one [`KeyRange`]
///
/// Advances a mixed-radix counter instead of converting every index, so
/// the per-key cost does not depend on the size of the key space.
pub struct PatternKeyIterator {
    pattern: Arc<KeyPattern>,
    radixes: Vec<usize>,
    digits: Vec<usize>,
    text: Vec<u8>,
    key: Vec<u8>,
    remaining: u64,
    yielded: u64,
    started: bool,
}

impl PatternKeyIterator {
    pub fn new(pattern: Arc<KeyPattern>) -> Self {
        let radixes = pattern.radixes();
        Self {
            digits: vec![0; radixes.len()],
            radixes,
            pattern,
            text: Vec::new(),
            key: Vec::new(),
            remaining: 0,
            yielded: 0,
            started: false,
        }
    }

    /// The rendered key string of the current position
    pub fn key_text(&self) -> &str {
        std::str::from_utf8(&self.text).unwrap_or_default()
    }

    fn increment(&mut self) {
        for (digit, radix) in self.digits.iter_mut().zip(self.radixes.iter()).rev() {
            *digit += 1;
            if *digit < *radix {
                return;
            }
            *digit = 0;
        }
    }
}

impl KeyIterator for PatternKeyIterator {
    fn set_keys(&mut self, range: &KeyRange) -> CapabilityResult<()> {
        let size = self.pattern.key_count();
        if &range.end() > size {
            return Err(CapabilityError::RangeOutOfSpace {
                start: range.start.clone(),
                len: range.len,
                size: size.clone(),
            });
        }
        self.digits = if range.start.is_zero() {
            vec![0; self.radixes.len()]
        } else {
            self.pattern.digits_of(&range.start)
        };
        self.remaining = range.len;
        self.yielded = 0;
        self.started = false;
        Ok(())
    }

    fn next_key(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        if self.started {
            self.increment();
        }
        self.started = true;
        self.remaining -= 1;
        self.yielded += 1;

        self.pattern.render(&self.digits, &mut self.text);
        // Encodability is checked when the pattern is built
        if self.pattern.encoding.encode_into(&self.text, &mut self.key).is_err() {
            self.key.clear();
        }
        true
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn progress(&self) -> u64 {
        self.yielded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(iter: &mut dyn KeyIterator) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        while iter.next_key() {
            keys.push(iter.key().to_vec());
        }
        keys
    }

    #[test]
    fn test_pattern_size() {
        let p = KeyPattern::new("[0-9A-F][0-9A-F]", KeyEncoding::Hex).unwrap();
        assert_eq!(p.key_count(), &BigUint::from(256u32));
        assert_eq!(p.wildcard_count(), 2);

        let p = KeyPattern::new("AB-[0-3]1", KeyEncoding::Hex).unwrap();
        assert_eq!(p.key_count(), &BigUint::from(4u32));
    }

    #[test]
    fn test_rightmost_wildcard_least_significant() {
        let p = KeyPattern::new("[ab][xyz]", KeyEncoding::Ascii).unwrap();
        assert_eq!(p.key_at(&BigUint::from(0u32)).unwrap(), "ax");
        assert_eq!(p.key_at(&BigUint::from(1u32)).unwrap(), "ay");
        assert_eq!(p.key_at(&BigUint::from(3u32)).unwrap(), "bx");
        assert_eq!(p.key_at(&BigUint::from(5u32)).unwrap(), "bz");
        assert!(p.key_at(&BigUint::from(6u32)).is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        for bad in ["", "   ", "[ab", "[]", "[a-]", "[*]", "x]", "a*", "[z-a]"] {
            assert!(
                KeyPattern::new(bad, KeyEncoding::Ascii).is_err(),
                "pattern {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_hex_encoding_checks() {
        assert!(KeyPattern::new("[0-9A-F]", KeyEncoding::Hex).is_err());
        assert!(KeyPattern::new("[0-9A-G]0", KeyEncoding::Hex).is_err());
        assert!(KeyPattern::new("[0-9A-G]0", KeyEncoding::Ascii).is_ok());

        assert_eq!(KeyEncoding::Hex.encode("0A-ff").unwrap(), vec![0x0A, 0xFF]);
        assert!(KeyEncoding::Hex.encode("0A-f").is_err());
        assert_eq!(KeyEncoding::Ascii.encode("k-1").unwrap(), b"k-1".to_vec());
    }

    #[test]
    fn test_iterator_full_space() {
        let p = KeyPattern::new("[0-9A-F][0-9A-F]", KeyEncoding::Hex).unwrap();
        let mut iter = p.key_iterator();
        iter.set_keys(&KeyRange::new(BigUint::zero(), 256)).unwrap();
        let keys = collect(iter.as_mut());
        assert_eq!(keys.len(), 256);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(key, &vec![i as u8]);
        }
        assert_eq!(iter.progress(), 256);
    }

    #[test]
    fn test_iterator_sub_range_matches_key_at() {
        let p = KeyPattern::new("[a-c]-[0-4][xy]", KeyEncoding::Ascii).unwrap();
        let mut iter = p.key_iterator();
        iter.set_keys(&KeyRange::new(BigUint::from(7u32), 9)).unwrap();
        let keys = collect(iter.as_mut());
        assert_eq!(keys.len(), 9);
        for (offset, key) in keys.iter().enumerate() {
            let expected = p.key_at(&BigUint::from(7 + offset)).unwrap();
            assert_eq!(key, expected.as_bytes());
        }
    }

    #[test]
    fn test_iterator_rejects_range_outside_space() {
        let p = KeyPattern::new("[ab]", KeyEncoding::Ascii).unwrap();
        let mut iter = p.key_iterator();
        assert!(iter.set_keys(&KeyRange::new(BigUint::from(1u32), 2)).is_err());
    }

    #[test]
    fn test_iterator_rebinds() {
        let p = KeyPattern::new("[0-9]", KeyEncoding::Ascii).unwrap();
        let mut iter = p.key_iterator();
        iter.set_keys(&KeyRange::new(BigUint::from(8u32), 2)).unwrap();
        assert_eq!(collect(iter.as_mut()), vec![b"8".to_vec(), b"9".to_vec()]);

        iter.set_keys(&KeyRange::new(BigUint::zero(), 1)).unwrap();
        assert_eq!(collect(iter.as_mut()), vec![b"0".to_vec()]);
        assert_eq!(iter.progress(), 1);
    }

    #[test]
    fn test_literal_only_pattern() {
        let p = KeyPattern::new("00-11", KeyEncoding::Hex).unwrap();
        assert_eq!(p.key_count(), &BigUint::one());
        let mut iter = p.key_iterator();
        iter.set_keys(&KeyRange::new(BigUint::zero(), 1)).unwrap();
        assert_eq!(collect(iter.as_mut()), vec![vec![0x00, 0x11]]);
    }
}
