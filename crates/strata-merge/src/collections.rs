//! Membership merges for sets, sequences and keyed maps.
//!
//! All three follow the same law: an element present in the common
//! ancestor survives only if both sides still have it, and an element the
//! ancestor lacked is kept if either side added it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use strata_types::Value;

use crate::error::MergeResult;
use crate::merger::{merge_at, ABSENT};
use crate::mode::MergeMode;
use crate::path::{Path, Segment};

pub(crate) fn merge_set(
    common: Option<&BTreeSet<Value>>,
    left: &BTreeSet<Value>,
    right: &BTreeSet<Value>,
) -> BTreeSet<Value> {
    let in_common = |v: &Value| common.is_some_and(|c| c.contains(v));

    let mut merged: BTreeSet<Value> = left
        .iter()
        .filter(|v| !in_common(*v) || right.contains(*v))
        .cloned()
        .collect();
    merged.extend(right.iter().filter(|v| !in_common(*v)).cloned());
    merged
}

pub(crate) fn merge_sequence(
    common: Option<&[Value]>,
    left: &[Value],
    right: &[Value],
) -> Vec<Value> {
    let common = common.unwrap_or_default();
    let in_common: HashSet<&Value> = common.iter().collect();
    let in_left: HashSet<&Value> = left.iter().collect();
    let in_right: HashSet<&Value> = right.iter().collect();

    let mut merged: Vec<Value> = common
        .iter()
        .filter(|v| in_left.contains(v) && in_right.contains(v))
        .cloned()
        .collect();

    insert_positional(&mut merged, left, |v| !in_common.contains(v));
    insert_positional(&mut merged, right, |v| {
        !in_common.contains(v) && !in_left.contains(v)
    });
    merged
}

/// Insert the selected elements of `side` at the index they hold in `side`,
/// appending once that index runs past the end of `merged`.
fn insert_positional<F>(merged: &mut Vec<Value>, side: &[Value], mut select: F)
where
    F: FnMut(&Value) -> bool,
{
    let last = side.len().saturating_sub(1);
    for (index, value) in side.iter().enumerate() {
        if !select(value) {
            continue;
        }
        if index == last || index >= merged.len() {
            merged.push(value.clone());
        } else {
            merged.insert(index, value.clone());
        }
    }
}

pub(crate) fn merge_keyed<'a>(
    mode: MergeMode,
    common: Option<&'a BTreeMap<String, Value>>,
    left: &'a BTreeMap<String, Value>,
    right: &'a BTreeMap<String, Value>,
    path: &mut Path<'a>,
) -> MergeResult<BTreeMap<String, Value>> {
    let mut keys: Vec<&'a String> = left.keys().chain(right.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut merged = BTreeMap::new();
    for key in keys {
        let c = common.and_then(|c| c.get(key));
        let l = left.get(key);
        let r = right.get(key);

        // Removed on either side.
        if c.is_some() && (l.is_none() || r.is_none()) {
            continue;
        }

        path.push(Segment::Key(key));
        let value = merge_at(
            mode,
            c.unwrap_or(&ABSENT),
            l.unwrap_or(&ABSENT),
            r.unwrap_or(&ABSENT),
            path,
        )?;
        path.pop();

        if value.is_present() {
            merged.insert(key.clone(), value);
        }
    }
    Ok(merged)
}
