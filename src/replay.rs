/*
 * This file is part of QiTech Control.
 *
 * Copyright (C) 2025 QiTech Control contributors
 *
 * QiTech Control is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * QiTech Control is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with QiTech Control. If not, see <https://www.gnu.org/licenses/>.
 */

//! Offline replay of recorded event streams
//!
//! Feeds a newline-delimited JSON recording of one machine's events through
//! the same router, throttle and store the live client uses, on a synthetic
//! clock driven by each record's `at_ms` offset.

use std::io::BufRead;
use std::time::Duration;

use qc_core::{Commit, ControlError, EventRouter, MachineNamespace, Result};
use qc_protocol::{decode_line, MachineIdentificationUnique, NamespacedEvent, RawEvent};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

/// One recorded event
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    /// Milliseconds since the start of the recording
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: RawEvent,
}

#[derive(Debug)]
pub struct ReplayError {
    /// 1-based line number in the recording
    pub line: usize,
    pub error: ControlError,
}

#[derive(Debug)]
pub struct ReplayReport<S> {
    pub events: usize,
    pub commits: Vec<Commit<S>>,
    pub errors: Vec<ReplayError>,
}

impl<S> ReplayReport<S> {
    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|e| e.error.is_fatal())
    }
}

/// Replay `reader` into the namespace `key` of machine type `M`.
///
/// Bad lines and rejected events are collected, not raised; only I/O and
/// addressing failures abort the replay.
pub fn replay<M, R>(
    reader: R,
    key: MachineIdentificationUnique,
    interval: Duration,
) -> Result<ReplayReport<M::State>>
where
    M: MachineNamespace,
    R: BufRead,
{
    let mut router = EventRouter::new(interval);
    router.register::<M>();
    let mut subscription = router.subscribe::<M>(key)?;

    let start = Instant::now();
    let mut report = ReplayReport {
        events: 0,
        commits: Vec::new(),
        errors: Vec::new(),
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = match decode_line(line.as_bytes()) {
            Ok(record) => record,
            Err(reason) => {
                report.errors.push(ReplayError {
                    line: index + 1,
                    error: ControlError::MalformedMessage(reason),
                });
                continue;
            }
        };

        let now = start + Duration::from_millis(record.at_ms);
        router.flush_due(now);

        report.events += 1;
        let event = NamespacedEvent {
            machine_identification_unique: key,
            event: record.event,
        };
        if let Err(error) = router.route(&event, now) {
            report.errors.push(ReplayError {
                line: index + 1,
                error,
            });
        }

        report.commits.extend(std::iter::from_fn(|| subscription.try_recv()));
    }

    router.flush_all();
    report.commits.extend(std::iter::from_fn(|| subscription.try_recv()));

    debug!(
        events = report.events,
        commits = report.commits.len(),
        errors = report.errors.len(),
        "Replay finished"
    );
    Ok(report)
}
