//! Resource descriptions and arithmetic.
//!
//! `LaunchTasks` may aggregate several offers from the same agent; the driver
//! sums their resources with [`Resources`] and checks the tasks fit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Tolerance used when comparing scalar quantities.
const SCALAR_EPSILON: f64 = 1e-9;

/// A single named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub value: ResourceValue,
}

/// The value carried by a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceValue {
    Scalar { value: f64 },
    Ranges { ranges: Vec<ValueRange> },
    Set { items: Vec<String> },
}

/// Inclusive integer range, e.g. a port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRange {
    pub begin: u64,
    pub end: u64,
}

impl Resource {
    /// A scalar resource such as `cpus` or `mem`.
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            role: None,
            value: ResourceValue::Scalar { value },
        }
    }

    /// A range resource such as `ports`.
    pub fn ranges(name: impl Into<String>, ranges: Vec<(u64, u64)>) -> Self {
        Self {
            name: name.into(),
            role: None,
            value: ResourceValue::Ranges {
                ranges: ranges
                    .into_iter()
                    .map(|(begin, end)| ValueRange { begin, end })
                    .collect(),
            },
        }
    }

    /// A set resource such as `disks`.
    pub fn set(name: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            value: ResourceValue::Set { items },
        }
    }

    /// Rejects negative or non-finite scalars and inverted ranges.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match &self.value {
            ResourceValue::Scalar { value } => {
                if !value.is_finite() || *value < 0.0 {
                    return Err(ProtocolError::InvalidScalar {
                        name: self.name.clone(),
                        value: *value,
                    });
                }
            }
            ResourceValue::Ranges { ranges } => {
                if let Some(bad) = ranges.iter().find(|r| r.begin > r.end) {
                    return Err(ProtocolError::InvalidRange {
                        name: self.name.clone(),
                        begin: bad.begin,
                        end: bad.end,
                    });
                }
            }
            ResourceValue::Set { .. } => {}
        }
        Ok(())
    }
}

/// An aggregated bag of resources keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    scalars: BTreeMap<String, f64>,
    ranges: BTreeMap<String, Vec<ValueRange>>,
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl Resources {
    /// Sums a list of resources, validating each.
    pub fn sum<'a, I>(resources: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = &'a Resource>,
    {
        let mut total = Self::default();
        for resource in resources {
            total.add(resource)?;
        }
        Ok(total)
    }

    /// Adds a single resource to the bag.
    pub fn add(&mut self, resource: &Resource) -> Result<(), ProtocolError> {
        resource.validate()?;

        match &resource.value {
            ResourceValue::Scalar { value } => {
                *self.scalars.entry(resource.name.clone()).or_insert(0.0) += value;
            }
            ResourceValue::Ranges { ranges } => {
                let entry = self.ranges.entry(resource.name.clone()).or_default();
                entry.extend(ranges.iter().copied());
                coalesce(entry);
            }
            ResourceValue::Set { items } => {
                self.sets
                    .entry(resource.name.clone())
                    .or_default()
                    .extend(items.iter().cloned());
            }
        }

        Ok(())
    }

    /// Merges another bag into this one.
    pub fn merge(&mut self, other: &Resources) {
        for (name, value) in &other.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += value;
        }
        for (name, ranges) in &other.ranges {
            let entry = self.ranges.entry(name.clone()).or_default();
            entry.extend(ranges.iter().copied());
            coalesce(entry);
        }
        for (name, items) in &other.sets {
            self.sets
                .entry(name.clone())
                .or_default()
                .extend(items.iter().cloned());
        }
    }

    /// Returns true if every resource in `other` is available in `self`.
    pub fn contains(&self, other: &Resources) -> bool {
        let scalars_fit = other.scalars.iter().all(|(name, needed)| {
            let available = self.scalars.get(name).copied().unwrap_or(0.0);
            *needed <= available + SCALAR_EPSILON
        });

        let ranges_fit = other.ranges.iter().all(|(name, needed)| {
            let available = self.ranges.get(name).map(Vec::as_slice).unwrap_or(&[]);
            needed.iter().all(|want| {
                available
                    .iter()
                    .any(|have| have.begin <= want.begin && want.end <= have.end)
            })
        });

        let sets_fit = other.sets.iter().all(|(name, needed)| match self.sets.get(name) {
            Some(available) => needed.is_subset(available),
            None => needed.is_empty(),
        });

        scalars_fit && ranges_fit && sets_fit
    }

    /// Returns true if any range or set item in `other` is also held by
    /// `self`. Scalars never overlap.
    pub fn overlaps(&self, other: &Resources) -> bool {
        let ranges_overlap = other.ranges.iter().any(|(name, theirs)| {
            let ours = self.ranges.get(name).map(Vec::as_slice).unwrap_or(&[]);
            theirs
                .iter()
                .any(|b| ours.iter().any(|a| a.begin <= b.end && b.begin <= a.end))
        });

        let sets_overlap = other.sets.iter().any(|(name, theirs)| {
            self.sets
                .get(name)
                .is_some_and(|ours| !ours.is_disjoint(theirs))
        });

        ranges_overlap || sets_overlap
    }

    /// Total quantity of a scalar resource (0.0 if absent).
    pub fn scalar(&self, name: &str) -> f64 {
        self.scalars.get(name).copied().unwrap_or(0.0)
    }

    /// Coalesced ranges of a range resource.
    pub fn ranges(&self, name: &str) -> &[ValueRange] {
        self.ranges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns true if the bag holds nothing.
    pub fn is_empty(&self) -> bool {
        self.scalars.values().all(|v| *v <= SCALAR_EPSILON)
            && self.ranges.values().all(Vec::is_empty)
            && self.sets.values().all(BTreeSet::is_empty)
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        for (name, value) in &self.scalars {
            parts.push(format!("{name}:{value}"));
        }
        for (name, ranges) in &self.ranges {
            let rendered: Vec<String> = ranges
                .iter()
                .map(|r| format!("{}-{}", r.begin, r.end))
                .collect();
            parts.push(format!("{name}:[{}]", rendered.join(",")));
        }
        for (name, items) in &self.sets {
            let rendered: Vec<&str> = items.iter().map(String::as_str).collect();
            parts.push(format!("{name}:{{{}}}", rendered.join(",")));
        }
        write!(f, "{}", parts.join(";"))
    }
}

/// Sorts and merges overlapping or adjacent ranges in place.
fn coalesce(ranges: &mut Vec<ValueRange>) {
    ranges.sort();
    let mut merged: Vec<ValueRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        if let Some(last) = merged.last_mut() {
            if range.begin <= last.end.saturating_add(1) {
                last.end = last.end.max(range.end);
                continue;
            }
        }
        merged.push(range);
    }
    *ranges = merged;
}

// =============================================================================
// Tests
// =============================================================================
