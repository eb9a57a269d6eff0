//! Interactive commands read from the watcher's stdin.

use lib_pulse::consumer::views::{StatusFilter, VolumeWindow};
use lib_pulse::models::{EventStatus, Severity};

pub const HELP: &str = "\
commands:
  p                      toggle pause
  f all|completed|pending|anomaly   timeline filter
  w 6|12|24              volume window (hours)
  s high|medium|low      show/hide a heatmap severity
  c <hour> <severity>    list anomalies in a heatmap cell
  r                      refetch snapshots
  q                      quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchCommand {
    TogglePause,
    Filter(StatusFilter),
    Window(VolumeWindow),
    ToggleSeverity(Severity),
    Cell(u32, Severity),
    Refresh,
    Help,
    Quit,
}

fn severity(word: &str) -> Result<Severity, String> {
    match word {
        "high" => Ok(Severity::High),
        "medium" => Ok(Severity::Medium),
        "low" => Ok(Severity::Low),
        other => Err(format!("unknown severity {:?}", other)),
    }
}

impl WatchCommand {
    pub fn parse(line: &str) -> Result<WatchCommand, String> {
        let lower = line.trim().to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        match words.as_slice() {
            ["p"] | ["pause"] => Ok(WatchCommand::TogglePause),
            ["q"] | ["quit"] => Ok(WatchCommand::Quit),
            ["r"] | ["refresh"] => Ok(WatchCommand::Refresh),
            ["h"] | ["help"] | [] => Ok(WatchCommand::Help),
            ["f", which] => {
                let filter = match *which {
                    "all" => StatusFilter::All,
                    "completed" => StatusFilter::Only(EventStatus::Completed),
                    "pending" => StatusFilter::Only(EventStatus::Pending),
                    "anomaly" => StatusFilter::Only(EventStatus::Anomaly),
                    other => return Err(format!("unknown filter {:?}", other)),
                };
                Ok(WatchCommand::Filter(filter))
            }
            ["w", hours] => match *hours {
                "6" => Ok(WatchCommand::Window(VolumeWindow::Last6h)),
                "12" => Ok(WatchCommand::Window(VolumeWindow::Last12h)),
                "24" => Ok(WatchCommand::Window(VolumeWindow::Last24h)),
                other => Err(format!("unknown window {:?}", other)),
            },
            ["s", which] => Ok(WatchCommand::ToggleSeverity(severity(which)?)),
            ["c", hour, which] => {
                let hour: u32 = hour
                    .parse()
                    .ok()
                    .filter(|h| *h < 24)
                    .ok_or_else(|| format!("hour must be 0-23, got {:?}", hour))?;
                Ok(WatchCommand::Cell(hour, severity(which)?))
            }
            _ => Err(format!("unknown command {:?}", line.trim())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(WatchCommand::parse("p"), Ok(WatchCommand::TogglePause));
        assert_eq!(WatchCommand::parse(" Q "), Ok(WatchCommand::Quit));
        assert_eq!(
            WatchCommand::parse("f pending"),
            Ok(WatchCommand::Filter(StatusFilter::Only(EventStatus::Pending)))
        );
        assert_eq!(WatchCommand::parse("w 6"), Ok(WatchCommand::Window(VolumeWindow::Last6h)));
        assert_eq!(WatchCommand::parse("s high"), Ok(WatchCommand::ToggleSeverity(Severity::High)));
        assert_eq!(WatchCommand::parse("c 14 medium"), Ok(WatchCommand::Cell(14, Severity::Medium)));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(WatchCommand::parse("w 7").is_err());
        assert!(WatchCommand::parse("c 24 high").is_err());
        assert!(WatchCommand::parse("s critical").is_err());
        assert!(WatchCommand::parse("launch").is_err());
    }
}
