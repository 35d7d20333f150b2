//! Time-indexed instruction maps.
//!
//! A [`TimedMap`] stores performance instructions sorted by their symbolic
//! tick date. Renderers walk it sequentially but also jump around with
//! binary-search lookups, so all four relative lookups (`before`,
//! `before_at`, `at_after`, `after`) are O(log n) with fast paths for the
//! endpoints. Style switches live in the same sequence as instructions and
//! change which style definitions apply from their date onward.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything stored in a map under a symbolic tick date.
pub trait Dated {
    fn date(&self) -> f64;
}

/// A change of the active style from a given date onward.
///
/// `default_articulation` is only meaningful in articulation maps, where a
/// switch may also name the articulation applied to otherwise unarticulated
/// notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSwitch {
    pub date: f64,
    pub name_ref: String,
    pub default_articulation: Option<String>,
}

impl StyleSwitch {
    pub fn new(date: f64, name_ref: impl Into<String>) -> Self {
        Self {
            date,
            name_ref: name_ref.into(),
            default_articulation: None,
        }
    }
}

/// One entry of a [`TimedMap`]: either a domain instruction or a style
/// switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record<T> {
    Instruction(T),
    StyleSwitch(StyleSwitch),
}

impl<T: Dated> Record<T> {
    pub fn date(&self) -> f64 {
        match self {
            Record::Instruction(inst) => inst.date(),
            Record::StyleSwitch(sw) => sw.date,
        }
    }

    pub fn instruction(&self) -> Option<&T> {
        match self {
            Record::Instruction(inst) => Some(inst),
            Record::StyleSwitch(_) => None,
        }
    }

    pub fn is_style_switch(&self) -> bool {
        matches!(self, Record::StyleSwitch(_))
    }
}

/// Rejection reasons for [`TimedMap::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The record's date is NaN or infinite.
    NonFiniteDate,
    /// A style switch carries an empty name reference.
    MissingNameRef,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::NonFiniteDate => write!(f, "record date must be finite"),
            MapError::MissingNameRef => {
                write!(f, "style switch must reference a style by name")
            }
        }
    }
}

impl std::error::Error for MapError {}

/// A sequence of records kept sorted by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedMap<T> {
    records: Vec<Record<T>>,
}

impl<T: Dated> TimedMap<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record<T>] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&Record<T>> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Record<T>> {
        self.records.get_mut(index)
    }

    /// Remove the record at `index`. Removing a known record goes through
    /// a position search first, e.g. `records().iter().position(..)`.
    pub fn remove(&mut self, index: usize) -> Record<T> {
        self.records.remove(index)
    }

    /// Insert a record behind all records sharing its date.
    ///
    /// Returns the index it landed at.
    pub fn insert(&mut self, record: Record<T>) -> Result<usize, MapError> {
        self.check(&record)?;
        let date = record.date();
        let pos = self.records.partition_point(|r| r.date() <= date);
        self.records.insert(pos, record);
        Ok(pos)
    }

    /// Insert a record in front of all records sharing its date.
    ///
    /// Style switches are inserted this way so that they already apply to
    /// instructions on the very date they are switched at.
    pub fn insert_first_at_date(&mut self, record: Record<T>) -> Result<usize, MapError> {
        self.check(&record)?;
        let date = record.date();
        let pos = self.records.partition_point(|r| r.date() < date);
        self.records.insert(pos, record);
        Ok(pos)
    }

    fn check(&self, record: &Record<T>) -> Result<(), MapError> {
        if !record.date().is_finite() {
            return Err(MapError::NonFiniteDate);
        }
        if let Record::StyleSwitch(sw) = record {
            if sw.name_ref.is_empty() {
                return Err(MapError::MissingNameRef);
            }
        }
        Ok(())
    }

    /// Index of the last record dated at or before `date`.
    pub fn index_before_at(&self, date: f64) -> Option<usize> {
        let last = self.records.last()?;
        if date >= last.date() {
            return Some(self.records.len() - 1);
        }
        if date < self.records[0].date() {
            return None;
        }
        let n = self.records.partition_point(|r| r.date() <= date);
        if n == 0 {
            None
        } else {
            Some(n - 1)
        }
    }

    /// Index of the last record dated strictly before `date`.
    pub fn index_before(&self, date: f64) -> Option<usize> {
        let last = self.records.last()?;
        if date > last.date() {
            return Some(self.records.len() - 1);
        }
        if date <= self.records[0].date() {
            return None;
        }
        let n = self.records.partition_point(|r| r.date() < date);
        if n == 0 {
            None
        } else {
            Some(n - 1)
        }
    }

    /// Index of the first record dated at or after `date`.
    pub fn index_at_after(&self, date: f64) -> Option<usize> {
        let last = self.records.last()?;
        if date <= self.records[0].date() {
            return Some(0);
        }
        if date > last.date() {
            return None;
        }
        let pos = self.records.partition_point(|r| r.date() < date);
        if pos < self.records.len() {
            Some(pos)
        } else {
            None
        }
    }

    /// Index of the first record dated strictly after `date`.
    pub fn index_after(&self, date: f64) -> Option<usize> {
        let last = self.records.last()?;
        if date < self.records[0].date() {
            return Some(0);
        }
        if date >= last.date() {
            return None;
        }
        let pos = self.records.partition_point(|r| r.date() <= date);
        if pos < self.records.len() {
            Some(pos)
        } else {
            None
        }
    }

    /// The index range of all records dated exactly at `date`.
    pub fn indices_at(&self, date: f64) -> std::ops::Range<usize> {
        let start = self.records.partition_point(|r| r.date() < date);
        let end = self.records.partition_point(|r| r.date() <= date);
        start..end
    }

    /// The style switch in effect at `date`, if any.
    pub fn style_at(&self, date: f64) -> Option<&StyleSwitch> {
        let start = self.index_before_at(date)?;
        self.records[..=start].iter().rev().find_map(|r| match r {
            Record::StyleSwitch(sw) => Some(sw),
            Record::Instruction(_) => None,
        })
    }

    /// Restore sorted order after record dates were edited in place.
    ///
    /// Insertion sort by adjacent swaps: nearly sorted input, the common
    /// case after a date correction, costs close to one pass.
    pub fn resort(&mut self) {
        for i in 1..self.records.len() {
            let mut j = i;
            while j > 0 && self.records[j].date() < self.records[j - 1].date() {
                self.records.swap(j, j - 1);
                j -= 1;
            }
        }
    }
}

impl<T: Dated> Default for TimedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Dated> FromIterator<Record<T>> for TimedMap<T> {
    fn from_iter<I: IntoIterator<Item = Record<T>>>(iter: I) -> Self {
        let mut records: Vec<Record<T>> = iter.into_iter().collect();
        records.sort_by(|a, b| a.date().total_cmp(&b.date()));
        Self { records }
    }
}
