//! Lightweight metrics helpers.

/// Fraction of the weave the sync record covers.
pub fn coverage_ratio(synced: u64, weave_size: u64) -> Option<f64> {
    if weave_size == 0 {
        return None;
    }
    Some(synced as f64 / weave_size as f64)
}

/// Bytes of the weave not yet claimed locally.
pub fn lag_bytes(weave_size: u64, synced: u64) -> u64 {
    weave_size.saturating_sub(synced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_handles_empty_weave() {
        assert_eq!(coverage_ratio(10, 0), None);
        let ratio = coverage_ratio(25, 100).expect("ratio");
        assert!((ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn lag_saturates() {
        assert_eq!(lag_bytes(100, 30), 70);
        assert_eq!(lag_bytes(30, 100), 0);
    }
}
