//! Counterbalanced condition ordering.
//!
//! Permutations are enumerated in lexicographic order over input positions, so
//! participant `n` gets permutation `(n - 1) mod k!` of the configured labels.

/// Participant number used for counterbalancing: the first run of ASCII digits
/// in `participant`. Absent, zero or overflowing runs give 1.
pub fn participant_number(participant: &str) -> u64 {
    let digits: String = participant
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    match digits.parse::<u64>() {
        Ok(n) if n > 0 => n,
        _ => 1,
    }
}

/// `n!`, or `None` if it does not fit in a `u64`.
pub fn factorial(n: usize) -> Option<u64> {
    (2..=n).try_fold(1u64, |acc, k| acc.checked_mul(u64::try_from(k).ok()?))
}

/// The `index`-th permutation of `items` (lexicographic over positions).
///
/// Indices past `items.len()!` wrap around.
pub fn nth_permutation<T: Clone>(items: &[T], index: u64) -> Vec<T> {
    let mut pool: Vec<T> = items.to_vec();
    let mut k = match factorial(pool.len()) {
        Some(count) => index % count,
        None => index,
    };
    let mut out = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let block = factorial(pool.len() - 1);
        let pick = match block {
            Some(b) => {
                let digit = k / b;
                k %= b;
                usize::try_from(digit).unwrap_or(0).min(pool.len() - 1)
            }
            // (m-1)! exceeds any u64, so k is inside the first block
            None => 0,
        };
        out.push(pool.remove(pick));
    }
    out
}

/// Condition order for `participant`.
///
/// Deterministic and total: equal inputs always give equal output, and every
/// input yields a permutation of `conditions`.
pub fn order_for(participant: &str, conditions: &[String]) -> Vec<String> {
    if conditions.len() < 2 {
        return conditions.to_vec();
    }
    let n = participant_number(participant);
    let order = nth_permutation(conditions, n - 1);
    if order.len() == conditions.len() {
        order
    } else {
        tracing::warn!(participant, "counterbalancing failed; using configured order");
        conditions.to_vec()
    }
}
