//! Element pairing strategies shared by the structured comparators.

use rverify_common::VerifyError;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Matched(usize, usize),
    ExpectedOnly(usize),
    ActualOnly(usize),
}

/// Pair by index; the longer side's tail is unmatched.
pub fn positional(expected: usize, actual: usize) -> Vec<Pairing> {
    let mut out: Vec<Pairing> = (0..expected.min(actual))
        .map(|i| Pairing::Matched(i, i))
        .collect();
    out.extend((actual..expected).map(Pairing::ExpectedOnly));
    out.extend((expected..actual).map(Pairing::ActualOnly));
    out
}

/// Pair elements with equal keys, first come first served. Elements without a
/// key are paired by position among the keyless ones.
pub fn by_key(expected: &[Option<String>], actual: &[Option<String>]) -> Vec<Pairing> {
    let mut by_value: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut keyless_actual = Vec::new();
    for (j, key) in actual.iter().enumerate() {
        match key {
            Some(key) => by_value.entry(key.as_str()).or_default().push(j),
            None => keyless_actual.push(j),
        }
    }
    for slots in by_value.values_mut() {
        slots.reverse();
    }

    let mut used = vec![false; actual.len()];
    let mut keyless = keyless_actual.into_iter();
    let mut out = Vec::with_capacity(expected.len());
    for (i, key) in expected.iter().enumerate() {
        let partner = match key {
            Some(key) => by_value.get_mut(key.as_str()).and_then(|slots| slots.pop()),
            None => keyless.next(),
        };
        match partner {
            Some(j) => {
                used[j] = true;
                out.push(Pairing::Matched(i, j));
            }
            None => out.push(Pairing::ExpectedOnly(i)),
        }
    }
    out.extend(
        used.iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(j, _)| Pairing::ActualOnly(j)),
    );
    out
}

/// Multiset pairing: each expected element takes the first unused actual element
/// it is equivalent to.
pub fn unordered<F>(expected: usize, actual: usize, mut equivalent: F) -> Result<Vec<Pairing>, VerifyError>
where
    F: FnMut(usize, usize) -> Result<bool, VerifyError>,
{
    let mut used = vec![false; actual];
    let mut out = Vec::with_capacity(expected.max(actual));
    for i in 0..expected {
        let mut partner = None;
        for (j, taken) in used.iter().enumerate() {
            if !taken && equivalent(i, j)? {
                partner = Some(j);
                break;
            }
        }
        match partner {
            Some(j) => {
                used[j] = true;
                out.push(Pairing::Matched(i, j));
            }
            None => out.push(Pairing::ExpectedOnly(i)),
        }
    }
    out.extend(
        used.iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(j, _)| Pairing::ActualOnly(j)),
    );
    Ok(out)
}

/// Pair the unmatched expected elements with the unmatched actual ones in order.
pub fn pair_leftovers(pairings: Vec<Pairing>) -> Vec<Pairing> {
    let mut actual_only: Vec<usize> = pairings
        .iter()
        .filter_map(|p| match p {
            Pairing::ActualOnly(j) => Some(*j),
            _ => None,
        })
        .collect();
    actual_only.reverse();

    let mut out = Vec::with_capacity(pairings.len());
    for pairing in pairings {
        match pairing {
            Pairing::ExpectedOnly(i) => match actual_only.pop() {
                Some(j) => out.push(Pairing::Matched(i, j)),
                None => out.push(Pairing::ExpectedOnly(i)),
            },
            Pairing::ActualOnly(_) => {}
            matched => out.push(matched),
        }
    }
    actual_only.reverse();
    out.extend(actual_only.into_iter().map(Pairing::ActualOnly));
    out
}
