//! Damerau-Levenshtein edit distance (optimal string alignment variant).
//!
//! Substitution, insertion, deletion and transposition of two adjacent
//! characters all cost one. Used to match predicted archive names against
//! what the server actually publishes.

pub fn damerau_levenshtein(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let (short, long) = if a.len() > b.len() { (&b, &a) } else { (&a, &b) };

    // Three rolling rows: two back (transpositions), previous, current.
    let mut before: Vec<usize> = (0..=long.len()).collect();
    let mut previous: Vec<usize> = (0..=long.len()).collect();
    let mut current: Vec<usize> = vec![0; long.len() + 1];

    for i in 0..short.len() {
        current[0] = i + 1;
        for j in 0..long.len() {
            let mut cost = previous[j];
            if short[i] != long[j] {
                cost += 1;
                cost = cost.min(current[j] + 1);
                cost = cost.min(previous[j + 1] + 1);
                if i > 0 && j > 0 && short[i] == long[j - 1] && short[i - 1] == long[j] {
                    cost = cost.min(before[j - 1] + 1);
                }
            }
            current[j + 1] = cost;
        }
        std::mem::swap(&mut before, &mut previous);
        std::mem::swap(&mut previous, &mut current);
    }

    previous[long.len()]
}

/// Closest candidate to `target`, ties broken by name.
pub fn closest_match<'a, I>(target: &str, candidates: I) -> Option<(usize, &'a str)>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|candidate| (damerau_levenshtein(target, candidate), candidate))
        .min()
}
