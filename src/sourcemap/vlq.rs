//! Base64-VLQ decoding and `mappings` validation.
//!
//! The `mappings` field of a source map is a `;`-delimited list of lines,
//! each a `,`-delimited list of segments, each segment a run of base64-VLQ
//! digits encoding 1, 4 or 5 signed deltas. Validation replays the delta
//! accumulators and enforces the field-count, overflow, sign and bounds
//! rules without building an in-memory mapping table.

use serde::Serialize;
use std::fmt;
use yansi::Paint;

/// Upper bound on collected diagnostics; a corrupt multi-megabyte mappings
/// string would otherwise produce one diagnostic per segment.
const MAX_DIAGNOSTICS: usize = 100;

const VLQ_BASE_SHIFT: u32 = 5;
const VLQ_BASE_MASK: u32 = (1 << VLQ_BASE_SHIFT) - 1;
const VLQ_CONTINUATION_BIT: u32 = 1 << VLQ_BASE_SHIFT;

#[inline]
fn base64_value(c: u8) -> Option<u32> {
    match c {
        b'A'..=b'Z' => Some((c - b'A') as u32),
        b'a'..=b'z' => Some((c - b'a' + 26) as u32),
        b'0'..=b'9' => Some((c - b'0' + 52) as u32),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Machine-readable code of a mappings diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MappingErrorCode {
    #[serde(rename = "INVALID_VLQ")]
    InvalidVlq,
    #[serde(rename = "INVALID_MAPPING_SEGMENT")]
    InvalidMappingSegment,
    #[serde(rename = "MAPPING_NEGATIVE_VALUE")]
    MappingNegativeValue,
    #[serde(rename = "MAPPING_VALUE_EXCEEDS_32_BITS")]
    MappingValueExceeds32Bits,
    #[serde(rename = "MAPPING_SOURCE_INDEX_OUT_OF_BOUNDS")]
    MappingSourceIndexOutOfBounds,
    #[serde(rename = "MAPPING_NAME_INDEX_OUT_OF_BOUNDS")]
    MappingNameIndexOutOfBounds,
}

impl MappingErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidVlq => "INVALID_VLQ",
            Self::InvalidMappingSegment => "INVALID_MAPPING_SEGMENT",
            Self::MappingNegativeValue => "MAPPING_NEGATIVE_VALUE",
            Self::MappingValueExceeds32Bits => "MAPPING_VALUE_EXCEEDS_32_BITS",
            Self::MappingSourceIndexOutOfBounds => "MAPPING_SOURCE_INDEX_OUT_OF_BOUNDS",
            Self::MappingNameIndexOutOfBounds => "MAPPING_NAME_INDEX_OUT_OF_BOUNDS",
        }
    }
}

impl fmt::Display for MappingErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validation diagnostic, pointing at the offending line/segment.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingDiagnostic {
    pub code: MappingErrorCode,
    pub message: String,
    /// Zero-based generated line (`;`-delimited position).
    pub line: usize,
    /// Zero-based segment within the line (`,`-delimited position).
    pub segment: usize,
}

impl fmt::Display for MappingDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, segment {}: {}",
            Paint::red(self.code.as_str()),
            self.line,
            self.segment,
            self.message
        )
    }
}

/// The outcome of validating a `mappings` string.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingValidation {
    pub valid: bool,
    pub diagnostics: Vec<MappingDiagnostic>,
    /// Total number of decoded segments, valid or not.
    pub segment_count: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum VlqError {
    /// Character outside the base64 alphabet, with its value.
    InvalidChar(char),
    /// The last digit still had the continuation bit set.
    MissingContinuation,
    /// Decoded absolute value does not fit in 32 bits signed.
    Exceeds32Bits,
}

/// Decodes a single base64-VLQ field starting at `bytes[pos]`.
///
/// Returns the decoded value and the number of digits consumed.
fn decode_vlq_field(bytes: &[u8], pos: usize) -> Result<(i64, usize), VlqError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut i = pos;
    loop {
        let Some(&byte) = bytes.get(i) else {
            return Err(VlqError::MissingContinuation);
        };
        let Some(digit) = base64_value(byte) else {
            return Err(VlqError::InvalidChar(byte as char));
        };
        i += 1;
        // 7 digits of 5 bits each already exceed 32 bits of payload
        if shift > 35 {
            return Err(VlqError::Exceeds32Bits);
        }
        result |= ((digit & VLQ_BASE_MASK) as u64) << shift;
        if digit & VLQ_CONTINUATION_BIT == 0 {
            break;
        }
        shift += VLQ_BASE_SHIFT;
    }
    let negative = result & 1 == 1;
    let magnitude = (result >> 1) as i64;
    if magnitude > i32::MAX as i64 {
        return Err(VlqError::Exceeds32Bits);
    }
    let value = if negative { -magnitude } else { magnitude };
    Ok((value, i - pos))
}

/// Decodes all VLQ fields of one segment.
fn decode_segment(segment: &str) -> Result<Vec<i64>, VlqError> {
    let bytes = segment.as_bytes();
    let mut fields = Vec::with_capacity(5);
    let mut pos = 0;
    while pos < bytes.len() {
        let (value, consumed) = decode_vlq_field(bytes, pos)?;
        fields.push(value);
        pos += consumed;
    }
    Ok(fields)
}

/// Replayed accumulator state, carried across lines except for the generated
/// column which resets at every `;`.
#[derive(Debug, Default)]
struct Accumulators {
    column: i64,
    source: i64,
    original_line: i64,
    original_column: i64,
    name: i64,
}

/// Validates a `mappings` string against the given `sources`/`names` table
/// sizes.
///
/// Validation is pure: it never mutates its inputs and is deterministic for
/// identical inputs. An empty mappings string is valid with zero segments.
pub fn validate_mappings(mappings: &str, sources_len: usize, names_len: usize) -> MappingValidation {
    let mut validation = MappingValidation { valid: true, ..Default::default() };
    let mut acc = Accumulators::default();

    let mut push = |validation: &mut MappingValidation,
                    code: MappingErrorCode,
                    message: String,
                    line: usize,
                    segment: usize| {
        validation.valid = false;
        if validation.diagnostics.len() < MAX_DIAGNOSTICS {
            validation.diagnostics.push(MappingDiagnostic { code, message, line, segment });
        }
    };

    for (line_idx, line) in mappings.split(';').enumerate() {
        acc.column = 0;
        if line.is_empty() {
            continue;
        }
        for (seg_idx, segment) in line.split(',').enumerate() {
            validation.segment_count += 1;
            if segment.is_empty() {
                push(
                    &mut validation,
                    MappingErrorCode::InvalidMappingSegment,
                    "empty segment (leading, trailing or consecutive commas)".to_string(),
                    line_idx,
                    seg_idx,
                );
                continue;
            }

            let fields = match decode_segment(segment) {
                Ok(fields) => fields,
                Err(err) => {
                    let (code, message) = match err {
                        VlqError::InvalidChar(c) => (
                            MappingErrorCode::InvalidVlq,
                            format!("invalid base64 character {c:?} in VLQ segment"),
                        ),
                        VlqError::MissingContinuation => (
                            MappingErrorCode::InvalidVlq,
                            "VLQ segment ended with the continuation bit set".to_string(),
                        ),
                        VlqError::Exceeds32Bits => (
                            MappingErrorCode::MappingValueExceeds32Bits,
                            "VLQ field value exceeds 32 bits signed".to_string(),
                        ),
                    };
                    push(&mut validation, code, message, line_idx, seg_idx);
                    continue;
                }
            };

            if !matches!(fields.len(), 1 | 4 | 5) {
                push(
                    &mut validation,
                    MappingErrorCode::InvalidMappingSegment,
                    format!("segment has {} fields, expected 1, 4 or 5", fields.len()),
                    line_idx,
                    seg_idx,
                );
                continue;
            }

            let mut apply = |target: &mut i64, delta: i64, what: &str| -> Option<(MappingErrorCode, String)> {
                let next = *target + delta;
                if next < 0 {
                    return Some((
                        MappingErrorCode::MappingNegativeValue,
                        format!("{what} became negative ({next})"),
                    ));
                }
                if next > i32::MAX as i64 {
                    return Some((
                        MappingErrorCode::MappingValueExceeds32Bits,
                        format!("{what} exceeds 32 bits signed ({next})"),
                    ));
                }
                *target = next;
                None
            };

            let mut failed = false;
            for (field_idx, delta) in fields.iter().copied().enumerate() {
                let error = match field_idx {
                    0 => apply(&mut acc.column, delta, "generated column"),
                    1 => apply(&mut acc.source, delta, "source index"),
                    2 => apply(&mut acc.original_line, delta, "original line"),
                    3 => apply(&mut acc.original_column, delta, "original column"),
                    4 => apply(&mut acc.name, delta, "name index"),
                    _ => unreachable!("field count checked above"),
                };
                if let Some((code, message)) = error {
                    push(&mut validation, code, message, line_idx, seg_idx);
                    failed = true;
                    break;
                }
            }
            if failed {
                continue;
            }

            if fields.len() >= 4 && acc.source as usize >= sources_len {
                push(
                    &mut validation,
                    MappingErrorCode::MappingSourceIndexOutOfBounds,
                    format!("source index {} out of bounds for {} sources", acc.source, sources_len),
                    line_idx,
                    seg_idx,
                );
            }
            if fields.len() == 5 && acc.name as usize >= names_len {
                push(
                    &mut validation,
                    MappingErrorCode::MappingNameIndexOutOfBounds,
                    format!("name index {} out of bounds for {} names", acc.name, names_len),
                    line_idx,
                    seg_idx,
                );
            }
        }
    }

    validation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(validation: &MappingValidation) -> Vec<MappingErrorCode> {
        validation.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn empty_mappings_are_valid() {
        let validation = validate_mappings("", 0, 0);
        assert!(validation.valid);
        assert_eq!(validation.segment_count, 0);
    }

    #[test]
    fn decodes_simple_vlq_values() {
        assert_eq!(decode_segment("A").unwrap(), vec![0]);
        assert_eq!(decode_segment("C").unwrap(), vec![1]);
        assert_eq!(decode_segment("D").unwrap(), vec![-1]);
        assert_eq!(decode_segment("AAAA").unwrap(), vec![0, 0, 0, 0]);
        // 16 encodes as "gB" (continuation)
        assert_eq!(decode_segment("gB").unwrap(), vec![16]);
    }

    #[test]
    fn rejects_two_field_segment() {
        // "AA" decodes to 2 fields, which is not a legal segment shape
        let validation = validate_mappings("AA", 1, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::InvalidMappingSegment]);
        assert!(validation.diagnostics[0].message.contains("2 fields"));
    }

    #[test]
    fn rejects_name_index_out_of_bounds() {
        // "AAAAC" advances the name accumulator to 1 with only 1 name
        let validation = validate_mappings("AAAAC", 1, 1);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::MappingNameIndexOutOfBounds]);
    }

    #[test]
    fn rejects_source_index_out_of_bounds() {
        let validation = validate_mappings("ACAA", 1, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::MappingSourceIndexOutOfBounds]);
    }

    #[test]
    fn rejects_negative_accumulator() {
        // second segment moves the generated column back below zero
        let validation = validate_mappings("A,D", 0, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::MappingNegativeValue]);
    }

    #[test]
    fn rejects_empty_segments_from_stray_commas() {
        let validation = validate_mappings("A,,A", 0, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::InvalidMappingSegment]);
    }

    #[test]
    fn rejects_invalid_base64() {
        let validation = validate_mappings("A!", 0, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::InvalidVlq]);
    }

    #[test]
    fn rejects_dangling_continuation_bit() {
        // 'g' has the continuation bit set and nothing follows
        let validation = validate_mappings("g", 0, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::InvalidVlq]);
    }

    #[test]
    fn rejects_overlong_vlq() {
        let validation = validate_mappings("gggggggggA", 0, 0);
        assert!(!validation.valid);
        assert_eq!(codes(&validation), vec![MappingErrorCode::MappingValueExceeds32Bits]);
    }

    #[test]
    fn column_resets_per_line_other_accumulators_carry() {
        // line 1 advances source to 1 (of 2); line 2 uses delta 0 and stays at 1
        let validation = validate_mappings("ACAA;AAAA", 2, 0);
        assert!(validation.valid, "{:?}", validation.diagnostics);
        assert_eq!(validation.segment_count, 2);
    }

    #[test]
    fn accepts_real_world_mappings() {
        // prefix of a webpack-emitted mapping line
        let validation = validate_mappings("AAAA,SAASA,EAAT,CAAC", 1, 1);
        assert!(validation.valid, "{:?}", validation.diagnostics);
        assert_eq!(validation.segment_count, 4);
    }

    #[test]
    fn diagnostics_are_capped() {
        let mappings = vec!["!"; 500].join(",");
        let validation = validate_mappings(&mappings, 0, 0);
        assert!(!validation.valid);
        assert_eq!(validation.diagnostics.len(), MAX_DIAGNOSTICS);
        assert_eq!(validation.segment_count, 500);
    }
}
