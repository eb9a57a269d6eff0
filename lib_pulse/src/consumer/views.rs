//! # Derived Views
//!
//! Read-only projections of `DashboardState`. Nothing here is stored; every
//! call recomputes from the slices it is given.

use chrono::{TimeZone, Timelike};

use crate::models::{Anomaly, DashboardState, EventStatus, Severity, TimelineEvent, VolumeBucket};

pub fn event_count(state: &DashboardState) -> usize {
    state.events.len()
}

/// True iff some anomaly is high severity (which includes folded "critical").
pub fn has_critical_anomalies(state: &DashboardState) -> bool {
    state.anomalies.iter().any(|a| a.severity == Severity::High)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(EventStatus),
}

/// Events whose status matches `filter`, in slice order.
pub fn filter_events(state: &DashboardState, filter: StatusFilter) -> Vec<&TimelineEvent> {
    state
        .events
        .iter()
        .filter(|e| match filter {
            StatusFilter::All => true,
            StatusFilter::Only(status) => e.status == status,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeWindow {
    Last6h,
    Last12h,
    #[default]
    Last24h,
}

impl VolumeWindow {
    pub fn hours(&self) -> usize {
        match self {
            VolumeWindow::Last6h => 6,
            VolumeWindow::Last12h => 12,
            VolumeWindow::Last24h => 24,
        }
    }
}

/// The newest `window.hours()` buckets, oldest first.
pub fn volume_window(state: &DashboardState, window: VolumeWindow) -> &[VolumeBucket] {
    let history = &state.volume_history;
    let start = history.len().saturating_sub(window.hours());
    &history[start..]
}

/// Shading of one heatmap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    None,
    /// One or two anomalies.
    Light,
    /// More than two.
    Strong,
}

/// The anomalies behind one heatmap cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSelection<'a> {
    pub hour: u32,
    pub severity: Severity,
    /// e.g. "HIGH Severity @ 14:00"
    pub label: String,
    pub anomalies: Vec<&'a Anomaly>,
}

/// Hour-of-day x severity counts over an anomaly list.
#[derive(Debug, Clone)]
pub struct Heatmap {
    counts: [[u32; 3]; 24],
    /// Each anomaly with its local hour.
    entries: Vec<(u32, Anomaly)>,
    visible: [bool; 3],
}

fn severity_index(severity: Severity) -> usize {
    match severity {
        Severity::High => 0,
        Severity::Medium => 1,
        Severity::Low => 2,
    }
}

/// Buckets `anomalies` by their hour in `tz`. All severities start visible.
pub fn anomaly_heatmap<Tz: TimeZone>(anomalies: &[Anomaly], tz: &Tz) -> Heatmap {
    let mut counts = [[0u32; 3]; 24];
    let entries: Vec<(u32, Anomaly)> = anomalies
        .iter()
        .map(|a| {
            let hour = a.timestamp.with_timezone(tz).hour();
            counts[hour as usize][severity_index(a.severity)] += 1;
            (hour, a.clone())
        })
        .collect();
    Heatmap {
        counts,
        entries,
        visible: [true; 3],
    }
}

impl Heatmap {
    pub fn is_visible(&self, severity: Severity) -> bool {
        self.visible[severity_index(severity)]
    }

    /// Shows or hides one severity row. Returns the new visibility.
    pub fn toggle_severity(&mut self, severity: Severity) -> bool {
        let slot = &mut self.visible[severity_index(severity)];
        *slot = !*slot;
        *slot
    }

    /// Count for a cell; hidden severities count as zero.
    pub fn count(&self, hour: u32, severity: Severity) -> u32 {
        if hour > 23 || !self.is_visible(severity) {
            return 0;
        }
        self.counts[hour as usize][severity_index(severity)]
    }

    pub fn intensity(&self, hour: u32, severity: Severity) -> Intensity {
        match self.count(hour, severity) {
            0 => Intensity::None,
            1 | 2 => Intensity::Light,
            _ => Intensity::Strong,
        }
    }

    /// Sum over visible cells.
    pub fn total(&self) -> u32 {
        (0..24)
            .flat_map(|h| Severity::ALL.into_iter().map(move |s| (h, s)))
            .map(|(h, s)| self.count(h, s))
            .sum()
    }

    /// The anomalies behind a non-empty visible cell.
    pub fn anomalies_at(&self, hour: u32, severity: Severity) -> Option<CellSelection<'_>> {
        if self.count(hour, severity) == 0 {
            return None;
        }
        Some(CellSelection {
            hour,
            severity,
            label: format!("{} Severity @ {}:00", severity.as_str().to_uppercase(), hour),
            anomalies: self
                .entries
                .iter()
                .filter(|(h, a)| *h == hour && a.severity == severity)
                .map(|(_, a)| a)
                .collect(),
        })
    }
}
