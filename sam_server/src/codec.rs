//! Row-wise run-length compression of boolean masks.
//!
//! Each row becomes a string of `<count><flag>` pairs, e.g. `[T,T,T,F,F,T]`
//! encodes to `"3T2F1T"`. A mask is the ordered list of its encoded rows.

use std::iter::Peekable;
use std::str::CharIndices;

use ndarray::{Array2, ArrayView2};

use crate::error::CodecError;
use crate::shared::CompressedMask;

const TRUE_FLAG: char = 'T';
const FALSE_FLAG: char = 'F';

// Upper bound on up-front allocation from a caller's length hint.
const MAX_PREALLOC: usize = 1 << 20;

/// Encode one row into maximal runs. Empty input yields an empty string.
pub fn encode<'a, I>(row: I) -> String
where
    I: IntoIterator<Item = &'a bool>,
{
    let mut out = String::new();
    let mut current: Option<bool> = None;
    let mut count = 0usize;

    for &v in row {
        match current {
            Some(prev) if prev == v => count += 1,
            Some(prev) => {
                push_run(&mut out, count, prev);
                current = Some(v);
                count = 1;
            }
            None => {
                current = Some(v);
                count = 1;
            }
        }
    }
    if let Some(prev) = current {
        push_run(&mut out, count, prev);
    }
    out
}

fn push_run(out: &mut String, count: usize, value: bool) {
    out.push_str(&count.to_string());
    out.push(if value { TRUE_FLAG } else { FALSE_FLAG });
}

/// Parses `<count><flag>` pairs, yielding `(offset, count, value)`.
struct Runs<'a> {
    len: usize,
    chars: Peekable<CharIndices<'a>>,
}

fn runs(compressed: &str) -> Runs<'_> {
    Runs {
        len: compressed.len(),
        chars: compressed.char_indices().peekable(),
    }
}

impl Iterator for Runs<'_> {
    type Item = Result<(usize, usize, bool), CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        let &(start, _) = self.chars.peek()?;
        let mut count = 0usize;
        let mut digits = 0usize;
        while let Some(&(_, c)) = self.chars.peek() {
            let Some(d) = c.to_digit(10) else { break };
            let Some(n) = count.checked_mul(10).and_then(|n| n.checked_add(d as usize)) else {
                return Some(Err(CodecError::MalformedInput {
                    offset: start,
                    reason: "run length overflows",
                }));
            };
            count = n;
            digits += 1;
            self.chars.next();
        }

        let Some((flag_at, flag)) = self.chars.next() else {
            return Some(Err(CodecError::MalformedInput {
                offset: self.len,
                reason: "run length without a trailing flag",
            }));
        };
        if digits == 0 {
            return Some(Err(CodecError::MalformedInput {
                offset: flag_at,
                reason: "flag without a preceding run length",
            }));
        }
        Some(Ok((start, count, flag == TRUE_FLAG)))
    }
}

/// Decode one compressed row.
///
/// `expected_length` only sizes the output buffer; it is not checked here.
/// Any flag other than `T` decodes as `false`. Runs need not be maximal.
pub fn decode(compressed: &str, expected_length: usize) -> Result<Vec<bool>, CodecError> {
    let mut out = Vec::with_capacity(expected_length.min(MAX_PREALLOC));
    for run in runs(compressed) {
        let (offset, count, value) = run?;
        out.try_reserve(count)
            .map_err(|_| CodecError::MalformedInput {
                offset,
                reason: "run length too large to allocate",
            })?;
        out.resize(out.len() + count, value);
    }
    Ok(out)
}

/// Total element count of `compressed`, without materialising it.
fn decoded_len(compressed: &CompressedMask) -> Result<usize, CodecError> {
    let mut total = 0usize;
    for row in compressed.rows() {
        for run in runs(row) {
            let (_, count, _) = run?;
            total = total.saturating_add(count);
        }
    }
    Ok(total)
}

/// Encode every row of `mask`, in row order.
pub fn encode_mask(mask: ArrayView2<'_, bool>) -> CompressedMask {
    CompressedMask(mask.rows().into_iter().map(|row| encode(row)).collect())
}

/// Decode a compressed mask into a `(rows, cols)` array.
///
/// Decoding stops as soon as the rows hold more elements than the shape
/// allows, so an oversized run is never expanded.
pub fn decode_mask(
    compressed: &CompressedMask,
    shape: (usize, usize),
) -> Result<Array2<bool>, CodecError> {
    let (rows, cols) = shape;
    let Some(expected) = rows.checked_mul(cols) else {
        return Err(CodecError::ShapeMismatch {
            expected: usize::MAX,
            actual: decoded_len(compressed)?,
        });
    };

    let mut flat = Vec::with_capacity(expected.min(MAX_PREALLOC));
    for row in compressed.rows() {
        for run in runs(row) {
            let (_, count, value) = run?;
            let len = flat.len().saturating_add(count);
            if len > expected {
                return Err(CodecError::ShapeMismatch {
                    expected,
                    actual: decoded_len(compressed)?,
                });
            }
            flat.resize(len, value);
        }
    }
    if flat.len() != expected {
        return Err(CodecError::ShapeMismatch {
            expected,
            actual: flat.len(),
        });
    }
    Array2::from_shape_vec(shape, flat).map_err(|_| CodecError::ShapeMismatch {
        expected,
        actual: expected,
    })
}

/// Number of `true` pixels.
pub fn area(mask: ArrayView2<'_, bool>) -> u64 {
    mask.iter().filter(|&&v| v).count() as u64
}

/// `[x, y, w, h]` box around the `true` pixels, `[0, 0, 0, 0]` if none.
///
/// Width and height are `max - min` of the pixel indices, so a single pixel
/// has a zero-sized box.
pub fn bbox(mask: ArrayView2<'_, bool>) -> [u32; 4] {
    let (mut x0, mut y0) = (usize::MAX, usize::MAX);
    let (mut x1, mut y1) = (0usize, 0usize);
    for ((y, x), &v) in mask.indexed_iter() {
        if v {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
    }
    if x0 == usize::MAX {
        return [0, 0, 0, 0];
    }
    [
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_encode_example() {
        assert_eq!(encode(&[true, true, true, false, false, true]), "3T2F1T");
    }

    #[test]
    fn test_decode_example() {
        let row = decode("3T2F1T", 6).unwrap();
        assert_eq!(row, vec![true, true, true, false, false, true]);
    }

    #[test]
    fn test_empty_row() {
        let empty: [bool; 0] = [];
        assert_eq!(encode(&empty), "");
        assert_eq!(decode("", 0).unwrap(), Vec::<bool>::new());
    }

    #[test]
    fn test_multi_digit_counts() {
        let row: Vec<bool> = std::iter::repeat(false)
            .take(640)
            .chain(std::iter::repeat(true).take(12))
            .collect();
        let enc = encode(&row);
        assert_eq!(enc, "640F12T");
        assert_eq!(decode(&enc, row.len()).unwrap(), row);
    }

    #[test]
    fn test_decode_non_maximal_runs() {
        let row = decode("2T1T0F3F", 6).unwrap();
        assert_eq!(row, vec![true, true, true, false, false, false]);
    }

    #[test]
    fn test_decode_unknown_flag_is_false() {
        assert_eq!(decode("2X1T", 3).unwrap(), vec![false, false, true]);
    }

    #[test]
    fn test_decode_truncated_count() {
        assert!(matches!(
            decode("3", 1),
            Err(CodecError::MalformedInput { offset: 1, .. })
        ));
        assert!(matches!(
            decode("2T14", 16),
            Err(CodecError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_decode_missing_count() {
        assert!(matches!(
            decode("T", 1),
            Err(CodecError::MalformedInput { offset: 0, .. })
        ));
        assert!(matches!(
            decode("1TT", 2),
            Err(CodecError::MalformedInput { offset: 2, .. })
        ));
    }

    #[test]
    fn test_decode_overflowing_count() {
        assert!(matches!(
            decode("99999999999999999999999T", 1),
            Err(CodecError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_decode_ignores_huge_length_hint() {
        assert_eq!(decode("1T", usize::MAX).unwrap(), vec![true]);
    }

    #[test]
    fn test_decode_unallocatable_run() {
        assert!(matches!(
            decode(&format!("2F{}T", usize::MAX), 2),
            Err(CodecError::MalformedInput { offset: 2, .. })
        ));
    }

    #[test]
    fn test_mask_roundtrip() {
        let mask = array![
            [false, true, true, false],
            [true, true, true, true],
            [false, false, false, false]
        ];
        let enc = encode_mask(mask.view());
        assert_eq!(enc.rows(), &["1F2T1F", "4T", "4F"]);
        let dec = decode_mask(&enc, (3, 4)).unwrap();
        assert_eq!(dec, mask);
    }

    #[test]
    fn test_decode_mask_shape_mismatch() {
        let enc = CompressedMask(vec!["4T".into(), "3F".into()]);
        assert_eq!(
            decode_mask(&enc, (2, 4)),
            Err(CodecError::ShapeMismatch {
                expected: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn test_decode_mask_overflowing_shape() {
        let enc = CompressedMask(vec!["1T".into()]);
        assert_eq!(
            decode_mask(&enc, (usize::MAX, 2)),
            Err(CodecError::ShapeMismatch {
                expected: usize::MAX,
                actual: 1
            })
        );
    }

    #[test]
    fn test_decode_mask_rejects_oversized_run() {
        let enc = CompressedMask(vec!["2T".into(), "999999999T".into()]);
        assert_eq!(
            decode_mask(&enc, (2, 2)),
            Err(CodecError::ShapeMismatch {
                expected: 4,
                actual: 1000000001
            })
        );
    }

    #[test]
    fn test_decode_mask_propagates_malformed_rows() {
        let enc = CompressedMask(vec!["4T".into(), "F".into()]);
        assert!(matches!(
            decode_mask(&enc, (2, 4)),
            Err(CodecError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_area_and_bbox() {
        let mask = array![
            [false, false, false, false],
            [false, true, true, false],
            [false, false, true, false]
        ];
        assert_eq!(area(mask.view()), 3);
        assert_eq!(bbox(mask.view()), [1, 1, 1, 1]);
        let single = array![[false, false], [false, true]];
        assert_eq!(bbox(single.view()), [1, 1, 0, 0]);
        assert_eq!(bbox(Array2::<bool>::from_elem((2, 2), false).view()), [0, 0, 0, 0]);
    }
}
