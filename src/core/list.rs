//! Ordered list differences
//!
//! Parameter and task lists are small (tens of entries), so these are plain
//! nested scans rather than anything index-backed.

/// Return the entries of `left` that are not matched by an entry of `right`.
///
/// Each entry of `right` matches at most one equal entry of `left`, earliest
/// first, so duplicates are counted independently: `["a", "b", "a"]` minus
/// `["a"]` is `["b", "a"]`, and an entry that appears twice in `left` and
/// never in `right` appears twice in the result. The order of `left` is kept.
pub fn diff_left<L, R>(left: &[L], right: &[R]) -> Vec<String>
where
    L: AsRef<str>,
    R: AsRef<str>,
{
    let mut matched = vec![false; right.len()];
    let mut extra = Vec::new();

    for l in left {
        let hit = right
            .iter()
            .enumerate()
            .position(|(i, r)| !matched[i] && r.as_ref() == l.as_ref());

        match hit {
            Some(i) => matched[i] = true,
            None => extra.push(l.as_ref().to_string()),
        }
    }

    extra
}

/// Compare two lists and return `(only_in_left, only_in_right)`.
pub fn diff<L, R>(left: &[L], right: &[R]) -> (Vec<String>, Vec<String>)
where
    L: AsRef<str>,
    R: AsRef<str>,
{
    (diff_left(left, right), diff_left(right, left))
}
