//! Maintenance window matching
//!
//! Answers whether an instant falls inside an allowed window. Date ranges are
//! checked first, then the recurring weekly slots for the instant's weekday.
//! Weekday and time of day are taken in the instant's own time zone, so callers
//! choose the zone by choosing the `DateTime<Tz>` they pass in.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::crd::{DayOfWeek, MaintenanceWindowSpec, SpecValidationError, TimeOfDay};
use crate::error::{Error, Result};

/// Which part of a spec allowed an instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchSource {
    /// Index into `spec.dates`
    Date(usize),
    /// Day and index into `spec.days[day]`
    Day(DayOfWeek, usize),
    /// No explicit window matched; the spec is the default window
    Default,
}

/// Is `instant` inside an allowed window of `spec`
///
/// Falls back to `spec.is_default` when neither a date range nor a weekly slot
/// contains the instant.
pub fn matches<Tz: TimeZone>(spec: &MaintenanceWindowSpec, instant: &DateTime<Tz>) -> bool {
    match_source(spec, instant).is_some()
}

/// Like [`matches`], but reports which entry matched
pub fn match_source<Tz: TimeZone>(
    spec: &MaintenanceWindowSpec,
    instant: &DateTime<Tz>,
) -> Option<MatchSource> {
    explicit_match(spec, instant).or(if spec.is_default {
        Some(MatchSource::Default)
    } else {
        None
    })
}

/// Match against dates and days only, ignoring `is_default`
pub fn explicit_match<Tz: TimeZone>(
    spec: &MaintenanceWindowSpec,
    instant: &DateTime<Tz>,
) -> Option<MatchSource> {
    let utc = instant.with_timezone(&Utc);
    if let Some(i) = spec.dates.iter().position(|d| d.contains(&utc)) {
        return Some(MatchSource::Date(i));
    }

    let day = DayOfWeek::from(instant.weekday());
    let time = TimeOfDay::from(instant.time());
    spec.days
        .get(&day)?
        .iter()
        .position(|w| w.contains(time))
        .map(|i| MatchSource::Day(day, i))
}

/// A window that allowed an instant, and how
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowMatch<'a> {
    pub name: &'a str,
    pub source: MatchSource,
}

/// Several windows evaluated together
///
/// An explicit match in any window wins, in name order. Only when nothing
/// matches explicitly does the default window (at most one per set) claim the
/// instant.
#[derive(Clone, Debug)]
pub struct WindowSet<'a> {
    windows: Vec<(&'a str, &'a MaintenanceWindowSpec)>,
    default: Option<usize>,
}

impl<'a> WindowSet<'a> {
    pub fn new<I>(windows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a MaintenanceWindowSpec)>,
    {
        let mut windows: Vec<_> = windows.into_iter().collect();
        windows.sort_by(|a, b| a.0.cmp(b.0));

        let defaults: Vec<usize> = windows
            .iter()
            .enumerate()
            .filter(|(_, (_, spec))| spec.is_default)
            .map(|(i, _)| i)
            .collect();

        if defaults.len() > 1 {
            let names: Vec<&str> = defaults.iter().map(|&i| windows[i].0).collect();
            return Err(Error::ValidationError(vec![SpecValidationError::new(
                "spec.isDefault",
                format!("multiple default windows: {}", names.join(", ")),
                "Set spec.isDefault to true on at most one MaintenanceWindow per namespace.",
            )]));
        }

        Ok(Self {
            windows,
            default: defaults.first().copied(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn default_window(&self) -> Option<&'a str> {
        self.default.map(|i| self.windows[i].0)
    }

    /// The window that allows `instant`, if any
    pub fn evaluate<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> Option<WindowMatch<'a>> {
        self.windows
            .iter()
            .find_map(|&(name, spec)| {
                explicit_match(spec, instant).map(|source| WindowMatch { name, source })
            })
            .or_else(|| {
                self.default.map(|i| WindowMatch {
                    name: self.windows[i].0,
                    source: MatchSource::Default,
                })
            })
    }
}
