//! Sub-range views over `persisted ++ pending`.
//!
//! The logical sequence of a handle is the registry's persisted records
//! (prefix) followed by the handle's pending records (suffix). Views are
//! assembled from the two parts without materializing the concatenation.

/// Resolves a possibly negative index against `len`, clamping into `[0, len]`.
fn resolve(index: i64, len: usize) -> usize {
    let len_i = len as i64;
    let index = if index < 0 { index + len_i } else { index };
    index.clamp(0, len_i) as usize
}

/// Returns the records in `[start, end)` of `prefix ++ suffix`.
///
/// Indices follow slice semantics of dynamic languages:
/// - a negative index counts from the end (`-1` is the last record)
/// - `end` of `None` or `Some(0)` means "up to the end"
/// - bounds beyond the sequence are clamped, never an error
pub fn compose<T: Clone>(prefix: &[T], suffix: &[T], start: i64, end: Option<i64>) -> Vec<T> {
    let len = prefix.len() + suffix.len();
    let start = resolve(start, len);
    let end = match end {
        None | Some(0) => len,
        Some(e) => resolve(e, len),
    };

    if start >= end {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(end - start);

    // Overlap with the prefix region [0, prefix.len())
    let split = prefix.len();
    if start < split {
        out.extend_from_slice(&prefix[start..end.min(split)]);
    }

    // Overlap with the suffix, shifted by the prefix length
    if end > split {
        out.extend_from_slice(&suffix[start.saturating_sub(split)..end - split]);
    }

    out
}
