//! The sector-acceptance entropy floor: a cheap filter against
//! upload-grief, not a security guarantee.

/// Byte-level Shannon entropy of `data`, normalized to `[0, 1]` (divided
/// by `log2(256) = 8`).
pub fn normalized_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let len = data.len() as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum();
    entropy / 8.0
}

pub fn passes_entropy_floor(data: &[u8], threshold: f64) -> bool {
    normalized_entropy(data) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_data_has_zero_entropy() {
        let data = vec![0u8; 4096];
        assert_eq!(normalized_entropy(&data), 0.0);
    }

    #[test]
    fn uniform_random_bytes_have_near_maximal_entropy() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        assert!(normalized_entropy(&data) > 0.99);
    }

    #[test]
    fn entropy_floor_rejects_low_entropy_payloads() {
        let data = vec![7u8; 4096];
        assert!(!passes_entropy_floor(&data, 0.5));
    }

    #[test]
    fn entropy_floor_accepts_high_entropy_payloads() {
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        assert!(passes_entropy_floor(&data, 0.9));
    }
}
