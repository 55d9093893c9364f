//! Half-open, closed, and unbounded intervals over ordered values.
//!
//! Tablet row ranges, predicate constraints, and block key ranges are all
//! intervals. Bound comparisons use a "gap position" model: for a value v,
//! position (v, 0) sits just before v and (v, 1) just after it, which makes
//! emptiness, overlap, and adjacency checks uniform across bound kinds.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerBound<T> {
    Unbounded,
    Inclusive(T),
    Exclusive(T),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpperBound<T> {
    Unbounded,
    Inclusive(T),
    Exclusive(T),
}

/// Position of a bound on the gap line.
#[derive(PartialEq, Eq)]
enum Pos<'a, T> {
    NegInf,
    At(&'a T, u8),
    PosInf,
}

impl<'a, T: Ord> PartialOrd for Pos<'a, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, T: Ord> Ord for Pos<'a, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        use Pos::*;
        match (self, other) {
            (NegInf, NegInf) | (PosInf, PosInf) => Ordering::Equal,
            (NegInf, _) | (_, PosInf) => Ordering::Less,
            (_, NegInf) | (PosInf, _) => Ordering::Greater,
            (At(a, sa), At(b, sb)) => a.cmp(b).then(sa.cmp(sb)),
        }
    }
}

impl<T: Ord> LowerBound<T> {
    fn pos(&self) -> Pos<'_, T> {
        match self {
            LowerBound::Unbounded => Pos::NegInf,
            LowerBound::Inclusive(v) => Pos::At(v, 0),
            LowerBound::Exclusive(v) => Pos::At(v, 1),
        }
    }

    pub fn cmp_lower(&self, other: &LowerBound<T>) -> Ordering {
        self.pos().cmp(&other.pos())
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            LowerBound::Unbounded => None,
            LowerBound::Inclusive(v) | LowerBound::Exclusive(v) => Some(v),
        }
    }
}

impl<T: Ord> UpperBound<T> {
    fn pos(&self) -> Pos<'_, T> {
        match self {
            UpperBound::Unbounded => Pos::PosInf,
            UpperBound::Inclusive(v) => Pos::At(v, 1),
            UpperBound::Exclusive(v) => Pos::At(v, 0),
        }
    }

    pub fn cmp_upper(&self, other: &UpperBound<T>) -> Ordering {
        self.pos().cmp(&other.pos())
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            UpperBound::Unbounded => None,
            UpperBound::Inclusive(v) | UpperBound::Exclusive(v) => Some(v),
        }
    }
}

impl<T: Ord + Clone> UpperBound<T> {
    /// The lower bound starting exactly where this upper bound ends.
    /// `None` for an unbounded upper: nothing starts past the end.
    pub fn adjacent_complement(&self) -> Option<LowerBound<T>> {
        match self {
            UpperBound::Unbounded => None,
            UpperBound::Inclusive(v) => Some(LowerBound::Exclusive(v.clone())),
            UpperBound::Exclusive(v) => Some(LowerBound::Inclusive(v.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<T> {
    pub lower: LowerBound<T>,
    pub upper: UpperBound<T>,
}

impl<T: Ord + Clone> Interval<T> {
    pub fn new(lower: LowerBound<T>, upper: UpperBound<T>) -> Self {
        Self { lower, upper }
    }

    /// The full line.
    pub fn all() -> Self {
        Self {
            lower: LowerBound::Unbounded,
            upper: UpperBound::Unbounded,
        }
    }

    /// The single value v.
    pub fn point(v: T) -> Self {
        Self {
            lower: LowerBound::Inclusive(v.clone()),
            upper: UpperBound::Inclusive(v),
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.lower == LowerBound::Unbounded && self.upper == UpperBound::Unbounded
    }

    pub fn is_empty(&self) -> bool {
        self.lower.pos() >= self.upper.pos()
    }

    pub fn contains(&self, v: &T) -> bool {
        self.lower.pos() <= Pos::At(v, 0) && Pos::At(v, 1) <= self.upper.pos()
    }

    pub fn overlaps(&self, other: &Interval<T>) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.lower.pos() < other.upper.pos()
            && other.lower.pos() < self.upper.pos()
    }

    /// Whether self is a subset of other. Empty intervals are contained in
    /// everything.
    pub fn contained_in(&self, other: &Interval<T>) -> bool {
        self.is_empty()
            || (other.lower.pos() <= self.lower.pos() && self.upper.pos() <= other.upper.pos())
    }

    pub fn intersect(&self, other: &Interval<T>) -> Interval<T> {
        let lower = if self.lower.pos() >= other.lower.pos() {
            self.lower.clone()
        } else {
            other.lower.clone()
        };
        let upper = if self.upper.pos() <= other.upper.pos() {
            self.upper.clone()
        } else {
            other.upper.clone()
        };
        Interval { lower, upper }
    }
}

/// A normalized union of disjoint, sorted intervals.
///
/// An empty set is unsatisfiable; "no constraint" is represented a level
/// up as the absence of a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSet<T> {
    intervals: Vec<Interval<T>>,
}

impl<T: Ord + Clone> IntervalSet<T> {
    pub fn empty() -> Self {
        Self { intervals: Vec::new() }
    }

    pub fn from_interval(iv: Interval<T>) -> Self {
        Self::new(vec![iv])
    }

    pub fn new(intervals: Vec<Interval<T>>) -> Self {
        let mut items: Vec<Interval<T>> =
            intervals.into_iter().filter(|iv| !iv.is_empty()).collect();
        items.sort_by(|a, b| {
            a.lower
                .cmp_lower(&b.lower)
                .then_with(|| a.upper.cmp_upper(&b.upper))
        });

        // Merge overlapping and adjacent neighbors
        let mut merged: Vec<Interval<T>> = Vec::with_capacity(items.len());
        for iv in items {
            match merged.last_mut() {
                Some(last) if iv.lower.pos() <= last.upper.pos() => {
                    if last.upper.cmp_upper(&iv.upper) == Ordering::Less {
                        last.upper = iv.upper;
                    }
                }
                _ => merged.push(iv),
            }
        }
        Self { intervals: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval<T>> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn contains(&self, v: &T) -> bool {
        self.intervals.iter().any(|iv| iv.contains(v))
    }

    pub fn overlaps(&self, iv: &Interval<T>) -> bool {
        self.intervals.iter().any(|m| m.overlaps(iv))
    }

    pub fn union(&self, other: &IntervalSet<T>) -> IntervalSet<T> {
        let mut all = self.intervals.clone();
        all.extend(other.intervals.iter().cloned());
        Self::new(all)
    }

    pub fn intersect(&self, other: &IntervalSet<T>) -> IntervalSet<T> {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if a.overlaps(b) {
                    out.push(a.intersect(b));
                }
            }
        }
        Self::new(out)
    }

    pub fn clip(&self, iv: &Interval<T>) -> IntervalSet<T> {
        self.intersect(&IntervalSet::from_interval(iv.clone()))
    }
}
