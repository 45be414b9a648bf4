use std::collections::BTreeSet;

use proptest::prelude::*;
use rstest::rstest;
use trialrig_core::scheduler::{order_for, participant_number};

fn labels(s: &[&str]) -> Vec<String> {
    s.iter().map(|x| (*x).to_string()).collect()
}

#[rstest]
#[case("7", 7)]
#[case("P07", 7)]
#[case("sub-12-b3", 12)]
#[case("abc", 1)]
#[case("", 1)]
#[case("P0", 1)]
#[case("99999999999999999999999", 1)]
fn participant_digits(#[case] id: &str, #[case] want: u64) {
    assert_eq!(participant_number(id), want);
}

#[test]
fn ids_one_and_seven_share_an_order_for_three_conditions() {
    let c = labels(&["A", "B", "C"]);
    assert_eq!(order_for("1", &c), order_for("7", &c));
    assert_eq!(order_for("1", &c), c);
}

#[test]
fn first_six_ids_visit_every_permutation_once() {
    let c = labels(&["A", "B", "C"]);
    let seen: BTreeSet<Vec<String>> = (1..=6).map(|n| order_for(&n.to_string(), &c)).collect();
    assert_eq!(seen.len(), 6);
}

#[test]
fn two_conditions_participant_seven() {
    let c = labels(&["A", "B"]);
    // (7 - 1) mod 2 = 0 -> configured order
    assert_eq!(order_for("7", &c), c);
    assert_eq!(order_for("8", &c), labels(&["B", "A"]));
}

#[test]
fn large_condition_sets_do_not_overflow() {
    let c: Vec<String> = (0..25).map(|i| format!("C{i}")).collect();
    let order = order_for("18446744073709551615", &c);
    let mut sorted = order.clone();
    sorted.sort();
    let mut expected = c.clone();
    expected.sort();
    assert_eq!(sorted, expected);
}

proptest! {
    #[test]
    fn order_is_a_stable_permutation(
        n in 1usize..7,
        id in "[a-zA-Z]{0,3}[0-9]{0,6}[a-z]{0,2}",
    ) {
        let c: Vec<String> = (0..n).map(|i| format!("V{i}")).collect();
        let a = order_for(&id, &c);
        let b = order_for(&id, &c);
        prop_assert_eq!(&a, &b);
        let mut sorted = a.clone();
        sorted.sort();
        prop_assert_eq!(sorted, c);
    }

    #[test]
    fn period_equals_permutation_count(k in 1u64..500) {
        let c: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| (*s).to_string()).collect();
        prop_assert_eq!(order_for(&k.to_string(), &c), order_for(&(k + 24).to_string(), &c));
    }
}
