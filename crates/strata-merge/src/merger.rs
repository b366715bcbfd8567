use std::collections::BTreeMap;

use strata_types::{Scalar, Shape, Value};
use tracing::trace;

use crate::collections::{merge_keyed, merge_sequence, merge_set};
use crate::error::{MergeError, MergeResult};
use crate::mode::MergeMode;
use crate::path::{Path, Segment};

pub(crate) static ABSENT: Value = Value::Absent;

/// Merge three versions of a value tree into one.
///
/// `common` is the ancestor both branches diverged from, `left` the local
/// edit and `right` the other side (in [`MergeMode::ThreeWay`], the latest
/// value read back from the store). Presence is resolved first:
///
/// | common  | left    | right   | ThreeWay            | Apply               |
/// |---------|---------|---------|---------------------|---------------------|
/// | present | absent  | any     | absent              | absent              |
/// | absent  | absent  | any     | `right`             | `right`             |
/// | present | present | absent  | absent              | `left`              |
/// | absent  | present | absent  | `left`              | `left`              |
/// | absent  | present | present | merge, empty common | merge, empty common |
/// | present | present | present | merge               | merge               |
///
/// Present values are then merged by shape. Values whose shapes differ
/// produce [`MergeError::ShapeMismatch`]; nothing is ever coerced.
pub fn merge(mode: MergeMode, common: &Value, left: &Value, right: &Value) -> MergeResult<Value> {
    let mut path = Path::default();
    merge_at(mode, common, left, right, &mut path)
}

/// Fold several concurrent versions that all diverged from `base`.
///
/// Each version in `rights` is merged (three-way) into the running result,
/// which starts as `first`. An absent version deletes the entity.
pub fn merge_all<'a, I>(base: &Value, first: &Value, rights: I) -> MergeResult<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut result = first.clone();
    for right in rights {
        if right.is_absent() {
            result = Value::Absent;
            continue;
        }
        result = merge(MergeMode::ThreeWay, base, &result, right)?;
    }
    Ok(result)
}

/// Layer `what` onto `onto`, relative to the `base` that `what` was edited from.
///
/// Shorthand for `merge(MergeMode::Apply, base, what, onto)`.
pub fn apply(base: &Value, what: &Value, onto: &Value) -> MergeResult<Value> {
    merge(MergeMode::Apply, base, what, onto)
}

/// Fold a series of `(base, what)` edits, in order, starting from nothing.
///
/// Each edit names the value it was based on and the value it wants, and is
/// applied onto whatever the previous edits built. The result equals calling
/// [`apply`] once per edit as it arrives, which is how a log-backed store
/// keeps its entities current while replaying.
pub fn apply_all<'a, I>(edits: I) -> MergeResult<Value>
where
    I: IntoIterator<Item = (&'a Value, &'a Value)>,
{
    let mut result = Value::Absent;
    for (base, what) in edits {
        result = apply(base, what, &result)?;
    }
    Ok(result)
}

pub(crate) fn merge_at<'a>(
    mode: MergeMode,
    common: &'a Value,
    left: &'a Value,
    right: &'a Value,
    path: &mut Path<'a>,
) -> MergeResult<Value> {
    congruent_shape(common, left, right, path)?;

    if left.is_absent() {
        // Local absence dominates, unless the entity never existed in the
        // ancestor and the other side created it.
        return Ok(if common.is_present() {
            Value::Absent
        } else {
            right.clone()
        });
    }

    if right.is_absent() {
        return Ok(match (mode, common.is_present()) {
            (MergeMode::ThreeWay, true) => Value::Absent,
            _ => left.clone(),
        });
    }

    let common = common.present();
    merge_shape(mode, common, left, right, path)
}

/// Check that all present inputs share one shape.
fn congruent_shape(
    common: &Value,
    left: &Value,
    right: &Value,
    path: &Path<'_>,
) -> MergeResult<Option<Shape>> {
    let mut expected: Option<Shape> = None;
    for value in [common, left, right] {
        let Some(shape) = value.shape() else {
            continue;
        };
        match expected {
            None => expected = Some(shape),
            Some(e) if e != shape => {
                return Err(MergeError::ShapeMismatch {
                    path: path.to_string(),
                    expected: e,
                    found: shape,
                });
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}

/// Merge two present values of the same shape. `common` is `None` when
/// both sides created the value independently.
fn merge_shape<'a>(
    mode: MergeMode,
    common: Option<&'a Value>,
    left: &'a Value,
    right: &'a Value,
    path: &mut Path<'a>,
) -> MergeResult<Value> {
    match (left, right) {
        (Value::Scalar(l), Value::Scalar(r)) => {
            let c = common.and_then(Value::as_scalar);
            Ok(Value::Scalar(merge_scalar(mode, c, l, r, path)))
        }
        (Value::Counter(l), Value::Counter(r)) => {
            let c = common.and_then(Value::as_counter).unwrap_or(0);
            merge_counter(c, *l, *r, path).map(Value::Counter)
        }
        (Value::Set(l), Value::Set(r)) => {
            let c = common.and_then(Value::as_set);
            Ok(Value::Set(merge_set(c, l, r)))
        }
        (Value::Sequence(l), Value::Sequence(r)) => {
            let c = common.and_then(Value::as_sequence);
            Ok(Value::Sequence(merge_sequence(c, l, r)))
        }
        (Value::Keyed(l), Value::Keyed(r)) => {
            let c = common.and_then(Value::as_keyed);
            merge_keyed(mode, c, l, r, path).map(Value::Keyed)
        }
        (Value::Record(l), Value::Record(r)) => {
            let c = common.and_then(Value::as_record);
            merge_record(mode, c, l, r, path).map(Value::Record)
        }
        // congruent_shape has already rejected every other combination.
        _ => Err(MergeError::ShapeMismatch {
            path: path.to_string(),
            expected: left.shape().unwrap_or(Shape::Scalar),
            found: right.shape().unwrap_or(Shape::Scalar),
        }),
    }
}

fn merge_scalar(
    mode: MergeMode,
    common: Option<&Scalar>,
    left: &Scalar,
    right: &Scalar,
    path: &Path<'_>,
) -> Scalar {
    let left_changed = common != Some(left);
    let right_changed = common != Some(right);
    match (left_changed, right_changed) {
        (false, true) => right.clone(),
        (true, true) if left != right => {
            let winner = match mode {
                MergeMode::ThreeWay => right,
                MergeMode::Apply => left,
            };
            trace!(%path, %mode, %left, %right, %winner, "scalar conflict");
            winner.clone()
        }
        // Unchanged on both sides (left == common) or only changed
        // locally, or both sides agree.
        _ => left.clone(),
    }
}

/// Sum the independent deltas: `common + (left - common) + (right - common)`.
fn merge_counter(common: i64, left: i64, right: i64, path: &Path<'_>) -> MergeResult<i64> {
    let sum = i128::from(left) + i128::from(right) - i128::from(common);
    i64::try_from(sum).map_err(|_| MergeError::CounterOverflow {
        path: path.to_string(),
    })
}

fn merge_record<'a>(
    mode: MergeMode,
    common: Option<&'a BTreeMap<String, Value>>,
    left: &'a BTreeMap<String, Value>,
    right: &'a BTreeMap<String, Value>,
    path: &mut Path<'a>,
) -> MergeResult<BTreeMap<String, Value>> {
    let mut names: Vec<&'a String> = left.keys().chain(right.keys()).collect();
    if let Some(common) = common {
        names.extend(common.keys());
    }
    names.sort();
    names.dedup();

    let mut merged = BTreeMap::new();
    for name in names {
        let c = common.and_then(|c| c.get(name)).unwrap_or(&ABSENT);
        let l = left.get(name).unwrap_or(&ABSENT);
        let r = right.get(name).unwrap_or(&ABSENT);

        path.push(Segment::Field(name));
        let value = merge_at(mode, c, l, r, path)?;
        path.pop();

        if value.is_present() {
            merged.insert(name.clone(), value);
        }
    }
    Ok(merged)
}
