//! Normalized edit-distance similarity.
//! `(max_len - levenshtein(a, b)) / max_len`, measured in chars. Two empty
//! strings are identical (1.0).

/// Levenshtein distance over Unicode scalar values, two-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(a, b);
    (max_len - distance) as f64 / max_len as f64
}

/// Case-insensitive variant used for relevance ranking.
pub fn similarity_ci(a: &str, b: &str) -> f64 {
    similarity(&a.to_lowercase(), &b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("سلام", "سلام"), 0);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("Hello", "Hello"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        let s = similarity("Hello there", "Hello there!");
        assert!(s > 0.9 && s < 1.0);
    }

    #[test]
    fn case_insensitive_ranking() {
        assert_eq!(similarity_ci("HELLO", "hello"), 1.0);
        assert!(similarity("HELLO", "hello") < 0.5);
    }
}
