//! Plain-text rendering of the watcher's dashboard.

use std::fmt::Write;

use chrono::Local;
use lib_pulse::consumer::channel::ChannelState;
use lib_pulse::consumer::views::{
    anomaly_heatmap, event_count, filter_events, has_critical_anomalies, volume_window, Heatmap,
    Intensity, StatusFilter, VolumeWindow,
};
use lib_pulse::models::{DashboardState, Severity};

const TIMELINE_ROWS: usize = 10;

/// Display choices the user can change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    pub filter: StatusFilter,
    pub window: VolumeWindow,
    pub hidden: [bool; 3],
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            filter: StatusFilter::All,
            window: VolumeWindow::Last24h,
            hidden: [false; 3],
        }
    }
}

impl ViewOptions {
    fn slot(severity: Severity) -> usize {
        match severity {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        }
    }

    /// Returns whether `severity` is now visible.
    pub fn toggle_severity(&mut self, severity: Severity) -> bool {
        let slot = &mut self.hidden[Self::slot(severity)];
        *slot = !*slot;
        !*slot
    }

    /// Heatmap over `state` with this view's hidden severities applied.
    pub fn heatmap(&self, state: &DashboardState) -> Heatmap {
        let mut heatmap = anomaly_heatmap(&state.anomalies, &Local);
        for severity in Severity::ALL {
            if self.hidden[Self::slot(severity)] {
                heatmap.toggle_severity(severity);
            }
        }
        heatmap
    }
}

fn filter_label(filter: StatusFilter) -> &'static str {
    match filter {
        StatusFilter::All => "all",
        StatusFilter::Only(status) => status.as_str(),
    }
}

fn channel_label(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Disconnected => "disconnected",
        ChannelState::Reconnecting => "reconnecting",
        ChannelState::Connected => "live",
        ChannelState::Paused => "paused",
    }
}

fn cell(intensity: Intensity) -> char {
    match intensity {
        Intensity::None => '.',
        Intensity::Light => 'o',
        Intensity::Strong => '#',
    }
}

/// Renders one full dashboard frame as plain text.
///
/// # Arguments
/// * `state` - Snapshot of the reconciler's slices.
/// * `channel` - Shown in the header, e.g. "live" or "reconnecting".
/// * `options` - Status filter, volume window and hidden severities.
pub fn render(state: &DashboardState, channel: ChannelState, options: &ViewOptions) -> String {
    let mut out = String::new();

    let critical = if has_critical_anomalies(state) { " [CRITICAL]" } else { "" };
    let loading = if state.is_loading { " (loading)" } else { "" };
    let _ = writeln!(
        out,
        "=== opspulse | {} | events {} | anomalies {}{}{} ===",
        channel_label(channel),
        event_count(state),
        state.anomalies.len(),
        critical,
        loading
    );

    let m = &state.metrics;
    let _ = writeln!(
        out,
        "workflows {} | cycle {} | SLA {:.1}% | health {:.0}",
        m.total_workflows, m.average_cycle_time, m.sla_compliance, m.system_health
    );

    let events = filter_events(state, options.filter);
    let _ = writeln!(out, "-- timeline [{}] {} shown of {}", filter_label(options.filter), events.len().min(TIMELINE_ROWS), events.len());
    for event in events.iter().take(TIMELINE_ROWS) {
        let _ = writeln!(
            out,
            "  {}  {:<9} {:<16} {}",
            event.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            event.status.as_str(),
            event.title,
            event.description
        );
    }

    let buckets = volume_window(state, options.window);
    let _ = writeln!(out, "-- volume, last {}h", options.window.hours());
    for bucket in buckets {
        let _ = writeln!(
            out,
            "  {}  {:>4}  {:>3}%",
            bucket.hour_display, bucket.volume, bucket.completion_rate
        );
    }

    let heatmap = options.heatmap(state);
    let _ = writeln!(out, "-- anomaly heatmap (hour 0-23, o = 1-2, # = 3+)");
    for severity in Severity::ALL {
        let row: String = if heatmap.is_visible(severity) {
            (0..24).map(|h| cell(heatmap.intensity(h, severity))).collect()
        } else {
            "(hidden)".to_string()
        };
        let _ = writeln!(out, "  {:<6} {}", severity.as_str(), row);
    }

    out
}

/// Lists the anomalies behind one heatmap cell.
pub fn render_cell(state: &DashboardState, options: &ViewOptions, hour: u32, severity: Severity) -> String {
    let heatmap = options.heatmap(state);
    match heatmap.anomalies_at(hour, severity) {
        Some(selection) => {
            let mut out = format!("{}\n", selection.label);
            for anomaly in selection.anomalies {
                let _ = writeln!(
                    out,
                    "  {}  {}",
                    anomaly.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    anomaly.message
                );
            }
            out
        }
        None => format!("No anomalies at {}:00 for {}\n", hour, severity.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lib_pulse::models::{Anomaly, EventStatus, TimelineEvent, VolumeBucket};

    fn sample() -> DashboardState {
        let mut state = DashboardState::default();
        state.is_loading = false;
        state.events = vec![
            TimelineEvent {
                id: 2,
                title: "Case Intake".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap(),
                status: EventStatus::Pending,
                description: "Real-time event: Case Intake".to_string(),
            },
            TimelineEvent {
                id: 1,
                title: "Archive".to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
                status: EventStatus::Completed,
                description: "Event type: Archive".to_string(),
            },
        ];
        state.anomalies = vec![Anomaly {
            id: 5,
            severity: Severity::High,
            message: "SLA Breach detected".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
        }];
        state.volume_history = (0..8)
            .map(|h| VolumeBucket {
                timestamp: h * 3_600_000,
                hour_display: format!("{:02}:00", h),
                volume: 10 + h as u32,
                completion_rate: 90,
            })
            .collect();
        state
    }

    #[test]
    fn render_reflects_filter_window_and_flags() {
        let state = sample();
        let options = ViewOptions {
            filter: StatusFilter::Only(EventStatus::Pending),
            window: VolumeWindow::Last6h,
            ..Default::default()
        };
        let text = render(&state, ChannelState::Connected, &options);
        assert!(text.contains("| live |"));
        assert!(text.contains("[CRITICAL]"));
        assert!(text.contains("Case Intake"));
        assert!(!text.contains("Event type: Archive"));
        assert!(text.contains("07:00    17   90%"));
        assert!(!text.contains("01:00    11   90%"));
    }

    #[test]
    fn hidden_severity_is_hidden_everywhere() {
        let state = sample();
        let mut options = ViewOptions::default();
        assert!(!options.toggle_severity(Severity::High));
        let text = render(&state, ChannelState::Paused, &options);
        assert!(text.contains("paused"));
        assert!(text.contains("(hidden)"));
        let text = render(&state, ChannelState::Reconnecting, &options);
        assert!(text.contains("| reconnecting |"));
        assert!(!text.contains("| live |"));

        let hour = state.anomalies[0].timestamp.with_timezone(&Local).format("%H").to_string();
        let hour: u32 = hour.parse().unwrap();
        assert!(render_cell(&state, &options, hour, Severity::High).starts_with("No anomalies"));
        options.toggle_severity(Severity::High);
        assert!(render_cell(&state, &options, hour, Severity::High).starts_with("HIGH Severity @"));
    }
}
