//! Keyspace calculator (C2): base and effective keyspace for the four
//! attack shapes, mask cardinality, and streaming line counts.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::errors::MathError;

/// Attack mode, named after hashcat's own numbering (see GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AttackMode {
    Wordlist = 0,
    Combinator = 1,
    Mask = 3,
    HybridWordlistMask = 6,
    HybridMaskWordlist = 7,
}

/// Cardinality of hashcat's built-in charsets.
fn builtin_charset_size(token: char) -> Option<u64> {
    match token {
        'l' => Some(26),
        'u' => Some(26),
        'd' => Some(10),
        's' => Some(33),
        'a' => Some(95),
        'b' => Some(256),
        _ => None,
    }
}

/// A mask with optional custom charsets `?1..?4` substituted in by the
/// caller (hashcat `-1/-2/-3/-4` flags).
#[derive(Debug, Clone)]
pub struct Mask {
    pub pattern: String,
    pub custom_charsets: [Option<u64>; 4],
}

impl Mask {
    pub fn new(pattern: impl Into<String>) -> Self {
        Mask {
            pattern: pattern.into(),
            custom_charsets: [None; 4],
        }
    }

    pub fn with_custom_charset(mut self, slot: usize, size: u64) -> Self {
        self.custom_charsets[slot] = Some(size);
        self
    }

    /// Cardinality of the full mask (product of per-position class sizes).
    pub fn cardinality(&self) -> Result<u64, MathError> {
        let mut total: u64 = 1;
        let mut chars = self.pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '?' {
                // Literal character: exactly one candidate at this position.
                continue;
            }
            let token = chars
                .next()
                .ok_or_else(|| MathError::InvalidMask(self.pattern.clone()))?;
            let size = if let Some(n) = token.to_digit(10) {
                let slot = (n as usize).checked_sub(1).ok_or(MathError::UnknownCustomCharset(token))?;
                self.custom_charsets
                    .get(slot)
                    .copied()
                    .flatten()
                    .ok_or(MathError::UnknownCustomCharset(token))?
            } else {
                builtin_charset_size(token).ok_or(MathError::UnknownCustomCharset(token))?
            };
            total = total.saturating_mul(size);
        }
        Ok(total)
    }

    /// Split an increment mask into its per-length prefixes, e.g. a mask
    /// of length 6 with `increment_min=4, increment_max=6` yields three
    /// masks of length 4, 5 and 6 (spec.md §8 scenario S3).
    pub fn increment_layers(&self, increment_min: usize, increment_max: usize) -> Vec<Mask> {
        let tokens = mask_tokens(&self.pattern);
        (increment_min..=increment_max.min(tokens.len()))
            .map(|len| Mask {
                pattern: tokens[..len].concat(),
                custom_charsets: self.custom_charsets,
            })
            .collect()
    }
}

/// Split a mask pattern into its position tokens (`?l`, `?1`, or a literal
/// character), preserving source order.
fn mask_tokens(pattern: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '?' {
            if let Some(next) = chars.next() {
                tokens.push(format!("?{next}"));
                continue;
            }
        }
        tokens.push(c.to_string());
    }
    tokens
}

/// Stream-count newlines in a file without loading it into memory; callers
/// must not assume O(1) (spec.md §4.2).
#[tracing::instrument(fields(path = %path.as_ref().display()))]
pub fn count_lines(path: impl AsRef<Path> + std::fmt::Debug) -> Result<u64, MathError> {
    let file = std::fs::File::open(&path).map_err(|e| MathError::Io {
        path: path.as_ref().display().to_string(),
        source: e,
    })?;
    count_lines_reader(file).map_err(|e| MathError::Io {
        path: path.as_ref().display().to_string(),
        source: e,
    })
}

fn count_lines_reader<R: Read>(reader: R) -> std::io::Result<u64> {
    let mut reader = BufReader::with_capacity(64 * 1024, reader);
    let mut count = 0u64;
    let mut buf = Vec::with_capacity(64 * 1024);
    loop {
        buf.clear();
        let bytes = reader.read_until(b'\n', &mut buf)?;
        if bytes == 0 {
            break;
        }
        if !buf.is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Base keyspace for the four attack shapes (spec.md §4.2).
#[derive(Debug, Clone)]
pub enum AttackInput {
    Wordlist { line_counts: Vec<u64> },
    Mask { masks: Vec<Mask> },
    Combinator { left_count: u64, right_count: u64 },
    Hybrid { wordlist_count: u64, mask: Mask },
}

pub fn base_keyspace(input: &AttackInput) -> Result<u64, MathError> {
    match input {
        AttackInput::Wordlist { line_counts } => Ok(line_counts.iter().sum()),
        AttackInput::Mask { masks } => {
            let mut total = 0u64;
            for m in masks {
                total = total.saturating_add(m.cardinality()?);
            }
            Ok(total)
        }
        AttackInput::Combinator { left_count, right_count } => {
            Ok(left_count.saturating_mul(*right_count))
        }
        AttackInput::Hybrid { wordlist_count, mask } => {
            Ok(wordlist_count.saturating_mul(mask.cardinality()?))
        }
    }
}

/// Effective keyspace: base times the sum of rule-file line counts, or
/// equal to base when no rules are configured.
pub fn effective_keyspace(base: u64, rule_line_counts: &[u64]) -> u64 {
    if rule_line_counts.is_empty() {
        return base;
    }
    let total_rules: u64 = rule_line_counts.iter().sum();
    base.saturating_mul(total_rules.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_cardinality_builtin() {
        let m = Mask::new("?l?l?l?l");
        assert_eq!(m.cardinality().unwrap(), 26u64.pow(4));
    }

    #[test]
    fn mask_cardinality_custom_charset() {
        let m = Mask::new("?1?1").with_custom_charset(0, 5);
        assert_eq!(m.cardinality().unwrap(), 25);
    }

    #[test]
    fn mask_cardinality_literal_chars_do_not_multiply() {
        let m = Mask::new("abc?d");
        assert_eq!(m.cardinality().unwrap(), 10);
    }

    #[test]
    fn s3_increment_layers_sum_matches_spec() {
        let m = Mask::new("?l?l?l?l?l?l");
        let layers = m.increment_layers(4, 6);
        let sizes: Vec<u64> = layers.iter().map(|l| l.cardinality().unwrap()).collect();
        assert_eq!(sizes, vec![456_976, 11_881_376, 308_915_776]);
        let total: u64 = sizes.iter().sum();
        assert_eq!(total, 321_254_128);
    }

    #[test]
    fn effective_keyspace_no_rules_equals_base() {
        assert_eq!(effective_keyspace(1_000_000, &[]), 1_000_000);
    }

    #[test]
    fn s2_effective_keyspace_with_rules() {
        assert_eq!(effective_keyspace(10, &[50_000]), 500_000);
    }

    #[test]
    fn count_lines_counts_trailing_unterminated_line() {
        let data = b"one\ntwo\nthree";
        let n = count_lines_reader(&data[..]).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn count_lines_empty_file_is_zero() {
        let n = count_lines_reader(&b""[..]).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn count_lines_reads_actual_file_from_disk() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "password1").unwrap();
        writeln!(file, "password2").unwrap();
        writeln!(file, "password3").unwrap();
        assert_eq!(count_lines(file.path()).unwrap(), 3);
    }

    #[test]
    fn count_lines_missing_file_is_io_error() {
        let result = count_lines("/nonexistent/path/does-not-exist.txt");
        assert!(matches!(result, Err(MathError::Io { .. })));
    }

    proptest::proptest! {
        /// Cardinality is monotonic non-decreasing as an all-`?d` mask
        /// grows longer: every extra position multiplies by >=1.
        #[test]
        fn mask_cardinality_grows_with_length(len in 1usize..8) {
            let shorter = Mask::new("?d".repeat(len)).cardinality().unwrap();
            let longer = Mask::new("?d".repeat(len + 1)).cardinality().unwrap();
            proptest::prop_assert!(longer >= shorter);
            proptest::prop_assert_eq!(longer, shorter * 10);
        }

        /// Effective keyspace is always >= base keyspace (spec.md §4.2:
        /// rules only ever multiply the base, never shrink it).
        #[test]
        fn effective_keyspace_never_shrinks_base(base in 0u64..1_000_000, rules in 0u64..10_000) {
            let eff = effective_keyspace(base, &[rules]);
            proptest::prop_assert!(eff >= base);
        }
    }
}
