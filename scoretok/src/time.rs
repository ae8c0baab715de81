// Beat-relative time values and their tick tables.
//
// Durations, time shifts and rests are written as `beats.position.resolution`
// (`1.0.8` is one beat, `0.3.8` three eighths of a beat). A value is worth
// `(beats * res + position) * tpb / res` ticks at `tpb` ticks per beat, so
// every resolution in use must divide the time division.
//
// A `TimeTable` is the ordered set of values a configuration allows, built
// from beat ranges: for `start..end` beats at resolution `res`, every
// `(beat, pos, res)` with `pos < res`, plus one closing value at the end of
// the last range, minus the zero value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TokenizerError;

/// Beats `start..end` are covered at `res` positions per beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeatRange {
    pub start: u32,
    pub end: u32,
    pub res: u32,
}

impl BeatRange {
    pub const fn new(start: u32, end: u32, res: u32) -> Self {
        BeatRange { start, end, res }
    }
}

/// A beat-relative duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeValue {
    pub beats: u32,
    pub pos: u32,
    pub res: u32,
}

impl TimeValue {
    /// Time shift of zero ticks used by the fixed-pattern scheme.
    pub const ZERO_SHIFT: TimeValue = TimeValue {
        beats: 0,
        pos: 0,
        res: 1,
    };

    pub const fn new(beats: u32, pos: u32, res: u32) -> Self {
        TimeValue { beats, pos, res }
    }

    /// Length in ticks at `tpb` ticks per beat, or `None` past `u32::MAX`.
    pub fn checked_ticks(&self, tpb: u32) -> Option<u32> {
        let res = u64::from(self.res.max(1));
        let ticks = (u64::from(self.beats) * res + u64::from(self.pos)) * u64::from(tpb) / res;
        u32::try_from(ticks).ok()
    }

    /// Length in ticks at `tpb` ticks per beat, saturating at `u32::MAX`.
    /// Tables are checked with `TimeTable::check_division` first.
    pub fn ticks(&self, tpb: u32) -> u32 {
        self.checked_ticks(tpb).unwrap_or(u32::MAX)
    }

    /// Numerator of the value as a fraction of a beat over `res`.
    fn units(&self) -> u64 {
        u64::from(self.beats) * u64::from(self.res) + u64::from(self.pos)
    }

    fn cmp_len(&self, other: &TimeValue) -> std::cmp::Ordering {
        (self.units() * u64::from(other.res.max(1)))
            .cmp(&(other.units() * u64::from(self.res.max(1))))
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.beats, self.pos, self.res)
    }
}

impl FromStr for TimeValue {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TokenizerError::MalformedToken(s.to_string());
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, TokenizerError> {
            parts
                .next()
                .ok_or_else(malformed)?
                .parse()
                .map_err(|_| malformed())
        };
        let value = TimeValue::new(next()?, next()?, next()?);
        if parts.next().is_some() || value.res == 0 {
            return Err(malformed());
        }
        Ok(value)
    }
}

impl TryFrom<String> for TimeValue {
    type Error = TokenizerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeValue> for String {
    fn from(value: TimeValue) -> Self {
        value.to_string()
    }
}

/// Allowed time values, shortest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTable {
    values: Vec<TimeValue>,
}

impl TimeTable {
    pub fn new(ranges: &[BeatRange]) -> Self {
        let mut values: Vec<TimeValue> = ranges
            .iter()
            .flat_map(|r| {
                (r.start..r.end).flat_map(move |beat| (0..r.res).map(move |pos| (beat, pos, r.res)))
            })
            .map(|(b, p, r)| TimeValue::new(b, p, r))
            .collect();
        if let Some(last) = ranges.iter().max_by_key(|r| r.end) {
            values.push(TimeValue::new(last.end, 0, last.res));
        }
        values.retain(|v| v.units() > 0);
        values.sort_by(|a, b| a.cmp_len(b));
        values.dedup_by(|a, b| a.cmp_len(b).is_eq());
        TimeTable { values }
    }

    pub fn values(&self) -> &[TimeValue] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Distinct resolutions in use.
    pub fn resolutions(&self) -> Vec<u32> {
        let mut res: Vec<u32> = self.values.iter().map(|v| v.res).collect();
        res.sort_unstable();
        res.dedup();
        res
    }

    /// Fail unless every resolution divides `tpb` and the longest value
    /// fits in `u32` ticks.
    pub fn check_division(&self, tpb: u32) -> Result<(), TokenizerError> {
        if let Some(resolution) = self.resolutions().into_iter().find(|&r| tpb == 0 || tpb % r != 0) {
            return Err(TokenizerError::TimeDivision {
                time_division: tpb,
                resolution,
            });
        }
        match self.max_value() {
            Some(longest) if longest.checked_ticks(tpb).is_none() => {
                Err(TokenizerError::Config(format!(
                    "{longest} overflows the tick range at {tpb} ticks per beat"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Shortest value, in ticks.
    pub fn min_ticks(&self, tpb: u32) -> u32 {
        self.values.first().map_or(0, |v| v.ticks(tpb))
    }

    pub fn max_value(&self) -> Option<TimeValue> {
        self.values.last().copied()
    }

    /// Cover `ticks` greedily with the largest value that fits, repeating
    /// the largest one for long gaps. A remainder shorter than the smallest
    /// value is dropped. Returns each value with its tick length.
    pub fn split_ticks(&self, ticks: u32, tpb: u32) -> Vec<(TimeValue, u32)> {
        let mut out = Vec::new();
        let mut remaining = ticks;
        while let Some(value) = self
            .values
            .iter()
            .rev()
            .find(|v| v.ticks(tpb) <= remaining && v.ticks(tpb) > 0)
        {
            let len = value.ticks(tpb);
            out.push((*value, len));
            remaining -= len;
        }
        out
    }

    /// The value closest to `ticks`; ties go to the shorter value. Lengths
    /// beyond the table clamp to the longest value.
    pub fn nearest(&self, ticks: u32, tpb: u32) -> Option<TimeValue> {
        self.values
            .iter()
            .min_by_key(|v| v.ticks(tpb).abs_diff(ticks))
            .copied()
    }
}
