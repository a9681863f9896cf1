//! Disjoint interval set over weave offsets.
//!
//! Intervals are half-open `[start, end)`, stored keyed by their end offset so
//! that an ordered lookup from any offset lands on the interval (or chunk)
//! covering it in one probe. Membership is left-exclusive and right-inclusive
//! for the same reason: chunk index keys are end offsets.

use alloy_primitives::U256;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use thiserror::Error;

/// End-offset sentinel standing in for +infinity; produced only by
/// [`IntervalSet::inverse`].
pub const UNBOUNDED: u64 = u64::MAX;

/// Width of one offset in the binary wire encoding.
pub const OFFSET_WIRE_LEN: usize = 32;

/// Interval set operation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntervalError {
    /// The requested interior point lies beyond the set's total length.
    #[error("no such interior point")]
    NoSuchPoint,

    /// A serialized record failed validation.
    #[error("invalid interval record")]
    InvalidFormat,
}

/// A set of disjoint, non-touching half-open intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet(BTreeMap<u64, u64>);

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `(end, start)` pairs, fusing as needed.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut set = Self::new();
        for (end, start) in pairs {
            set.add(end, start);
        }
        set
    }

    /// Inserts `[start, end)`, fusing every overlapping or touching interval.
    ///
    /// Requires `end > start`.
    pub fn add(&mut self, end: u64, start: u64) {
        assert!(end > start, "empty interval ({end}, {start})");
        let mut new_start = start;
        let mut new_end = end;
        let mut absorbed = Vec::new();
        // Candidates are every interval with end >= start; they stop
        // overlapping (or touching) once their start exceeds the new end.
        for (&e, &s) in self.0.range(start..) {
            if s > end {
                break;
            }
            absorbed.push(e);
            new_start = new_start.min(s);
            new_end = new_end.max(e);
        }
        for e in absorbed {
            self.0.remove(&e);
        }
        self.0.insert(new_end, new_start);
    }

    /// Subtracts `[start, end)` from the set.
    pub fn delete(&mut self, end: u64, start: u64) {
        if end <= start {
            return;
        }
        let mut touched = Vec::new();
        for (&e, &s) in self.0.range((Excluded(start), Unbounded)) {
            if s >= end {
                break;
            }
            touched.push((e, s));
        }
        for (e, s) in touched {
            self.0.remove(&e);
            if start > s {
                self.0.insert(start.min(e), s);
            }
            if e > end {
                self.0.insert(e, end.max(s));
            }
        }
    }

    /// Truncates the set at `cut`: intervals above are dropped, a straddling
    /// interval keeps its left part.
    pub fn cut(&mut self, cut: u64) {
        let above: Vec<(u64, u64)> = self
            .0
            .range((Excluded(cut), Unbounded))
            .map(|(&e, &s)| (e, s))
            .collect();
        for (e, s) in above {
            self.0.remove(&e);
            if s < cut {
                self.0.insert(cut, s);
            }
        }
    }

    /// Left-exclusive, right-inclusive membership: true iff some interval has
    /// `start < n <= end`.
    pub fn is_inside(&self, n: u64) -> bool {
        match self.0.range(n..).next() {
            Some((_, &start)) => start < n,
            None => false,
        }
    }

    /// Total covered length.
    pub fn sum(&self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |acc, (&e, &s)| acc.saturating_add(e - s))
    }

    pub fn count(&self) -> u64 {
        self.0.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes and returns the interval with the greatest end offset.
    pub fn take_largest(&mut self) -> Option<(u64, u64)> {
        let (&e, &s) = self.0.iter().next_back()?;
        self.0.remove(&e);
        Some((e, s))
    }

    /// Ascending `(end, start)` iteration.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.0.iter().map(|(&e, &s)| (e, s))
    }

    /// Complement over `[0, +inf)`; the topmost interval ends at
    /// [`UNBOUNDED`].
    pub fn inverse(&self) -> IntervalSet {
        let mut out = BTreeMap::new();
        let mut prev_end = 0u64;
        for (&end, &start) in &self.0 {
            if start > prev_end {
                out.insert(start, prev_end);
            }
            prev_end = end;
        }
        if prev_end < UNBOUNDED {
            out.insert(UNBOUNDED, prev_end);
        }
        IntervalSet(out)
    }

    /// Maximal sub-intervals common to both sets, built by a two-pointer walk
    /// in ascending end order.
    pub fn intersection(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = BTreeMap::new();
        let mut left = self.0.iter();
        let mut right = other.0.iter();
        let mut a = left.next();
        let mut b = right.next();
        while let (Some((&ae, &astart)), Some((&be, &bstart))) = (a, b) {
            let lo = astart.max(bstart);
            let hi = ae.min(be);
            if lo < hi {
                out.insert(hi, lo);
            }
            if ae <= be {
                a = left.next();
            } else {
                b = right.next();
            }
        }
        IntervalSet(out)
    }

    /// Bytes covered by `other` but not by `self`.
    pub fn outerjoin(&self, other: &IntervalSet) -> IntervalSet {
        self.inverse().intersection(other)
    }

    /// Locates the `n`-th covered byte (zero-based, ascending end order).
    /// Returns `(start, point, end)` of the containing interval.
    pub fn nth_inner_point(&self, n: u64) -> Result<(u64, u64, u64), IntervalError> {
        let mut acc = 0u64;
        for (&end, &start) in &self.0 {
            let len = end - start;
            if n - acc < len {
                return Ok((start, start + (n - acc), end));
            }
            acc += len;
        }
        Err(IntervalError::NoSuchPoint)
    }

    /// Fuses the closest-spaced neighbours until at most `limit` intervals
    /// remain. Returns the absorbed gaps (now counted as covered) in the
    /// deterministic pick order, smallest first.
    pub fn compact(&mut self, limit: u64) -> Vec<(u64, u64)> {
        if self.count() <= limit {
            return Vec::new();
        }
        // Interior gaps only: the regions below the first interval and above
        // the last are not bounded by stored data on both sides.
        let mut gaps: Vec<(u64, u64)> = Vec::with_capacity(self.0.len() - 1);
        let mut prev_end: Option<u64> = None;
        for (&end, &start) in &self.0 {
            if let Some(e) = prev_end {
                gaps.push((start, e));
            }
            prev_end = Some(end);
        }
        gaps.sort_by_key(|&(end, start)| (end - start, end));
        let k = (self.count() - limit) as usize;
        gaps.truncate(k);
        for &(end, start) in &gaps {
            self.add(end, start);
        }
        gaps
    }

    /// Descending `(end, start)` pairs capped at `limit`, sampling each
    /// interval with probability `limit/count` when the set is over the cap.
    fn pairs_for_share<R: Rng + ?Sized>(&self, limit: u64, rng: &mut R) -> Vec<(u64, u64)> {
        let count = self.count();
        let mut out = Vec::with_capacity(limit.min(count) as usize);
        if count <= limit {
            out.extend(self.0.iter().rev().map(|(&e, &s)| (e, s)));
            return out;
        }
        let keep = limit as f64 / count as f64;
        for (&e, &s) in self.0.iter().rev() {
            if out.len() as u64 == limit {
                break;
            }
            if rng.gen::<f64>() < keep {
                out.push((e, s));
            }
        }
        out
    }

    /// Binary wire encoding: per interval, 32-byte big-endian end followed by
    /// 32-byte big-endian start, descending end order.
    pub fn serialize_bin<R: Rng + ?Sized>(&self, limit: u64, rng: &mut R) -> Vec<u8> {
        let pairs = self.pairs_for_share(limit, rng);
        let mut out = Vec::with_capacity(pairs.len() * 2 * OFFSET_WIRE_LEN);
        for (end, start) in pairs {
            out.extend_from_slice(&U256::from(end).to_be_bytes::<OFFSET_WIRE_LEN>());
            out.extend_from_slice(&U256::from(start).to_be_bytes::<OFFSET_WIRE_LEN>());
        }
        out
    }

    /// JSON wire encoding: `[{"<end>":"<start>"}, ...]`, descending end order,
    /// decimal strings.
    pub fn serialize_json<R: Rng + ?Sized>(&self, limit: u64, rng: &mut R) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = self
            .pairs_for_share(limit, rng)
            .into_iter()
            .map(|(end, start)| {
                let mut object = serde_json::Map::with_capacity(1);
                object.insert(
                    end.to_string(),
                    serde_json::Value::String(start.to_string()),
                );
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(entries)
    }

    /// Parses the binary wire encoding, rejecting misaligned input, empty or
    /// inverted intervals, out-of-order ends, and entries that overlap or
    /// touch after reinsertion.
    pub fn deserialize_bin(bytes: &[u8]) -> Result<IntervalSet, IntervalError> {
        if bytes.len() % (2 * OFFSET_WIRE_LEN) != 0 {
            return Err(IntervalError::InvalidFormat);
        }
        let mut pairs = Vec::with_capacity(bytes.len() / (2 * OFFSET_WIRE_LEN));
        let mut prev_end: Option<u64> = None;
        for entry in bytes.chunks_exact(2 * OFFSET_WIRE_LEN) {
            let end = decode_offset(&entry[..OFFSET_WIRE_LEN])?;
            let start = decode_offset(&entry[OFFSET_WIRE_LEN..])?;
            if end <= start {
                return Err(IntervalError::InvalidFormat);
            }
            if let Some(prev) = prev_end {
                if end >= prev {
                    return Err(IntervalError::InvalidFormat);
                }
            }
            prev_end = Some(end);
            pairs.push((end, start));
        }
        let expected = pairs.len() as u64;
        let set = IntervalSet::from_pairs(pairs);
        if set.count() != expected {
            // Some entries fused: the input was not disjoint.
            return Err(IntervalError::InvalidFormat);
        }
        Ok(set)
    }
}

fn decode_offset(bytes: &[u8]) -> Result<u64, IntervalError> {
    let value = U256::from_be_slice(bytes);
    u64::try_from(value).map_err(|_| IntervalError::InvalidFormat)
}
