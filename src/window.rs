//! Works out which time units a run has to synchronise.
//!
//! A window comes from exactly one of three policies: an explicit
//! `SYNC_FROM`/`SYNC_TO` pair, a trailing number of days ending now, or the
//! unit after the last one already present in the raster store.

use chrono::NaiveDateTime;
use tracing::info;

use crate::{
    error::{Result, SyncError},
    time_unit::{BatchKey, Granularity, TimeUnit},
};

/// Window parameters as supplied by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowRequest {
    pub from: Option<TimeUnit>,
    pub to: Option<TimeUnit>,
    pub trailing: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    Explicit { from: TimeUnit, to: TimeUnit },
    /// Days before now, walked in units of the run granularity.
    Trailing(u32),
    CursorFallback,
}

/// Closed interval of units, walked from `end` back to `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: TimeUnit,
    pub end: TimeUnit,
}

/// Units that live under the same remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBatch {
    pub key: BatchKey,
    pub units: Vec<TimeUnit>,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    granularity: Granularity,
}

impl WindowPlanner {
    pub fn new(granularity: Granularity) -> Self {
        WindowPlanner { granularity }
    }

    /// Validates a request and picks the policy that applies to it.
    pub fn policy(&self, request: &WindowRequest) -> Result<WindowPolicy> {
        match (request.from, request.to, request.trailing) {
            (Some(_), None, _) | (None, Some(_), _) => Err(SyncError::config(
                "SYNC_FROM and SYNC_TO must be informed together to set the period of sync",
            )),
            (Some(_), Some(_), Some(_)) => Err(SyncError::config(
                "only one kind of parameter may set the period: SYNC_FROM/SYNC_TO or SYNC_DAYS",
            )),
            (Some(from), Some(to), None) => {
                let from = self.align(from);
                let to = self.align(to);
                if from > to {
                    return Err(SyncError::config(format!(
                        "SYNC_FROM ({from}) is later than SYNC_TO ({to})"
                    )));
                }
                Ok(WindowPolicy::Explicit { from, to })
            }
            (None, None, Some(count)) => Ok(WindowPolicy::Trailing(count)),
            (None, None, None) => Ok(WindowPolicy::CursorFallback),
        }
    }

    /// Resolves a policy into a window. `cursor` is only consulted for
    /// [`WindowPolicy::CursorFallback`].
    pub fn window(
        &self,
        policy: WindowPolicy,
        cursor: Option<TimeUnit>,
        now: NaiveDateTime,
    ) -> Result<SyncWindow> {
        let now = TimeUnit::truncate(self.granularity, now);

        let window = match policy {
            WindowPolicy::Explicit { from, to } => SyncWindow {
                start: from,
                end: to,
            },
            WindowPolicy::Trailing(days) => {
                let units = i64::from(days) * self.granularity.units_per_day();
                let start = now.offset(-units).ok_or_else(|| {
                    SyncError::config(format!(
                        "SYNC_DAYS={days} reaches before the earliest representable date"
                    ))
                })?;
                SyncWindow { start, end: now }
            }
            WindowPolicy::CursorFallback => {
                let cursor = cursor.ok_or(SyncError::EmptyHistory(self.granularity))?;
                let start = self.align(cursor).next().ok_or_else(|| {
                    SyncError::config(format!("sync cursor {cursor} is at the end of the calendar"))
                })?;
                SyncWindow { start, end: now }
            }
        };

        info!(
            granularity = %self.granularity,
            start = %window.start,
            end = %window.end,
            units = window.len(),
            "Resolved sync window"
        );

        Ok(window)
    }

    // The run's granularity wins over whatever alignment a unit arrived with.
    fn align(&self, unit: TimeUnit) -> TimeUnit {
        if unit.granularity() == self.granularity {
            unit
        } else {
            TimeUnit::truncate(self.granularity, unit.instant())
        }
    }
}

impl FetchBatch {
    pub fn granularity(&self) -> Granularity {
        match self.key {
            BatchKey::Day { .. } => Granularity::Hourly,
            BatchKey::Month { .. } => Granularity::Daily,
        }
    }
}

impl SyncWindow {
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.start.units_until(&self.end) as usize + 1
        }
    }

    /// Units from `end` down to `start` inclusive.
    pub fn units(&self) -> Vec<TimeUnit> {
        (0..self.len() as i64)
            .map_while(|i| self.end.offset(-i))
            .collect()
    }

    /// Groups the units by remote directory, keeping the descending order.
    pub fn batches(&self) -> Vec<FetchBatch> {
        let mut batches: Vec<FetchBatch> = Vec::new();

        for unit in self.units() {
            let key = unit.batch_key();
            match batches.last_mut() {
                Some(batch) if batch.key == key => batch.units.push(unit),
                _ => batches.push(FetchBatch {
                    key,
                    units: vec![unit],
                }),
            }
        }

        batches
    }
}

// -- Tests -------------------------------------------------------------------
