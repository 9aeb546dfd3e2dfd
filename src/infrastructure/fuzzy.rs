// src/infrastructure/fuzzy.rs
//
// Fuzzy string scoring
//
// All scores are integers in 0..=100. Ranking is deterministic: candidates
// are sorted by (score desc, index asc) and the first one wins.

use std::collections::BTreeSet;

use crate::domain::normalize_text;

/// Indel-distance ratio: 200 * LCS / (len(a) + len(b))
pub fn ratio(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }

    let lcs = lcs_len(&a, &b);
    ((200 * lcs) / total) as u32
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Ratio over normalized text
pub fn normalized_ratio(a: &str, b: &str) -> u32 {
    ratio(&normalize_text(a), &normalize_text(b))
}

/// Token-set score: compares the shared tokens against each side's
/// remainder, so word order and extra words on one side cost little.
pub fn token_set_ratio(a: &str, b: &str) -> u32 {
    let na = normalize_text(a);
    let nb = normalize_text(b);

    let set_a: BTreeSet<&str> = na.split_whitespace().collect();
    let set_b: BTreeSet<&str> = nb.split_whitespace().collect();

    if set_a.is_empty() || set_b.is_empty() {
        return 0;
    }

    let intersection: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let diff_ab: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let diff_ba: Vec<&str> = set_b.difference(&set_a).copied().collect();

    let sorted_inter = intersection.join(" ");
    let join = |rest: &[&str]| {
        if rest.is_empty() {
            sorted_inter.clone()
        } else if sorted_inter.is_empty() {
            rest.join(" ")
        } else {
            format!("{} {}", sorted_inter, rest.join(" "))
        }
    };
    let combined_a = join(&diff_ab);
    let combined_b = join(&diff_ba);

    if sorted_inter.is_empty() {
        return ratio(&combined_a, &combined_b);
    }

    ratio(&sorted_inter, &combined_a)
        .max(ratio(&sorted_inter, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

/// Length difference between the query and the best-aligned window of the
/// candidate with the same token count.
///
/// A short quote typed from the start of a long cue aligns with that start,
/// so only the words the requester actually typed are measured.
pub fn aligned_length_diff(query: &str, candidate: &str) -> usize {
    let q = normalize_text(query);
    let c = normalize_text(candidate);

    let q_tokens: Vec<&str> = q.split_whitespace().collect();
    let c_tokens: Vec<&str> = c.split_whitespace().collect();

    if c_tokens.len() <= q_tokens.len() || q_tokens.is_empty() {
        return q.chars().count().abs_diff(c.chars().count());
    }

    let mut best: Option<(u32, usize)> = None;
    for window in c_tokens.windows(q_tokens.len()) {
        let joined = window.join(" ");
        let score = ratio(&q, &joined);
        let diff = q.chars().count().abs_diff(joined.chars().count());
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, diff));
        }
    }

    best.map(|(_, diff)| diff).unwrap_or(usize::MAX)
}

/// Score every choice and sort by (score desc, index asc).
pub fn rank<F>(choices: &[String], scorer: F) -> Vec<(usize, u32)>
where
    F: Fn(&str) -> u32,
{
    let mut scored: Vec<(usize, u32)> = choices
        .iter()
        .enumerate()
        .map(|(i, choice)| (i, scorer(choice)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
}
