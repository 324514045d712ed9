//! Overload resolution and argument coercion
//!
//! Given the declared parameter lists of a member's overloads and the
//! arguments a script supplied, pick the first overload, in declaration
//! order, whose parameters accept the arguments after conversion.

use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostType, HostValue};

/// Winning overload and its converted arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Index of the chosen candidate
    pub index: usize,
    /// Arguments converted to the candidate's parameter types
    pub args: Vec<HostValue>,
}

/// Pick an overload for `args`.
///
/// Candidates whose arity equals the argument count are tried first. If the
/// last argument is nil, candidates taking one parameter fewer are tried
/// next with that nil dropped. A candidate is skipped as soon as one of its
/// arguments fails to convert.
pub fn select(
    member: &str,
    candidates: &[&[HostType]],
    args: &[HostValue],
) -> BridgeResult<Selection> {
    if let Some(selection) = first_match(candidates, args) {
        return Ok(selection);
    }

    if let Some((HostValue::Nil, rest)) = args.split_last() {
        if let Some(selection) = first_match(candidates, rest) {
            log::trace!("'{}' matched after dropping trailing nil", member);
            return Ok(selection);
        }
    }

    Err(BridgeError::NoMatchingOverload {
        member: member.to_string(),
        arg_count: args.len(),
    })
}

fn first_match(candidates: &[&[HostType]], args: &[HostValue]) -> Option<Selection> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, params)| params.len() == args.len())
        .find_map(|(index, params)| {
            coerce_all(params, args).map(|args| Selection { index, args })
        })
}

fn coerce_all(params: &[HostType], args: &[HostValue]) -> Option<Vec<HostValue>> {
    params
        .iter()
        .zip(args)
        .map(|(ty, value)| coerce(value, ty))
        .collect()
}

/// Make `value` acceptable as a `ty` parameter.
///
/// Values already of the right type and all values for non-primitive
/// parameters pass through unchanged, as does nil. Other values go through
/// primitive conversion, which may fail.
pub fn coerce(value: &HostValue, ty: &HostType) -> Option<HostValue> {
    if ty.matches(value) || !ty.is_primitive() || value.is_nil() {
        return Some(value.clone());
    }
    convert_primitive(value, ty)
}

fn convert_primitive(value: &HostValue, ty: &HostType) -> Option<HostValue> {
    match (ty, value) {
        (HostType::Int, HostValue::Float(f)) => float_to_int(*f).map(HostValue::Int),
        (HostType::Int, HostValue::Str(s)) => s.trim().parse().ok().map(HostValue::Int),
        (HostType::Float, HostValue::Int(i)) => Some(HostValue::Float(*i as f64)),
        (HostType::Float, HostValue::Str(s)) => s.trim().parse().ok().map(HostValue::Float),
        (HostType::String, HostValue::Int(i)) => Some(HostValue::Str(i.to_string())),
        (HostType::String, HostValue::Float(f)) => {
            Some(HostValue::Str(skein_sdk::format_number(*f)))
        }
        _ => None,
    }
}

/// Narrow a float to an integer, rounding half to even
fn float_to_int(f: f64) -> Option<i64> {
    if !f.is_finite() {
        return None;
    }
    let rounded = f.round_ties_even();
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}
