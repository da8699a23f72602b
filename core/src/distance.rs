/// Longest operand, in characters, that [`bounded_distance`] compares.
/// Longer strings are rejected to keep suggestion scans cheap.
pub const MAX_DISTANCE_TERM_LENGTH: usize = 50;

/// Edit distance counting insertion, deletion, substitution and swapping
/// two adjacent characters as one operation each.
pub fn edit_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Rows i-2, i-1 and i of the DP matrix.
    let mut before: Vec<usize> = vec![0; b.len() + 1];
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);

            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                curr[j] = curr[j].min(before[j - 2] + 1);
            }
        }
        std::mem::swap(&mut before, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// [`edit_distance`], or `None` when either side is longer than
/// [`MAX_DISTANCE_TERM_LENGTH`].
pub fn bounded_distance(s1: &str, s2: &str) -> Option<usize> {
    if s1.chars().count() > MAX_DISTANCE_TERM_LENGTH
        || s2.chars().count() > MAX_DISTANCE_TERM_LENGTH
    {
        return None;
    }
    Some(edit_distance(s1, s2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_edits() {
        assert_eq!(edit_distance("rust", "rust"), 0);
        assert_eq!(edit_distance("rust", "just"), 1);
        assert_eq!(edit_distance("rust", "rusts"), 1);
        assert_eq!(edit_distance("rusts", "rust"), 1);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "test"), 4);
        assert_eq!(edit_distance("test", ""), 4);
    }

    #[test]
    fn adjacent_swap_costs_one() {
        assert_eq!(edit_distance("form", "from"), 1);
        assert_eq!(edit_distance("abcd", "badc"), 2);
        assert_eq!(edit_distance("ca", "abc"), 3);
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(edit_distance("café", "cafe"), 1);
        assert_eq!(edit_distance("北京", "京北"), 1);
    }

    #[test]
    fn overlong_operands_rejected() {
        let long = "a".repeat(MAX_DISTANCE_TERM_LENGTH + 1);
        assert_eq!(bounded_distance(&long, "a"), None);
        assert_eq!(bounded_distance("a", &long), None);
        assert_eq!(bounded_distance(&long[1..], &long[1..]), Some(0));
    }
}
