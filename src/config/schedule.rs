use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Daily run times for daemon mode, in local time.
///
/// ```toml
/// [schedule]
/// times = ["03:00", "15:00"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// `HH:MM` entries. Invalid entries are skipped with a warning.
    #[serde(default = "default_times")]
    pub times: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            times: default_times(),
        }
    }
}

fn default_times() -> Vec<String> {
    [
        "03:00", "06:00", "09:00", "12:00", "15:00", "18:00", "21:00", "00:00",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Parse a strict `HH:MM` time.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let (hours, minutes) = value.trim().split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    NaiveTime::from_hms_opt(hours.parse().ok()?, minutes.parse().ok()?, 0)
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.times.is_empty() {
            return Err(ConfigError::Validation(
                "schedule.times must contain at least one HH:MM entry".into(),
            ));
        }
        if self.parsed().is_empty() {
            return Err(ConfigError::Validation(format!(
                "schedule.times has no valid HH:MM entry: {:?}",
                self.times
            )));
        }
        Ok(())
    }

    /// Valid times, sorted and deduplicated. Invalid entries are logged.
    pub fn parsed(&self) -> Vec<NaiveTime> {
        let mut times: Vec<NaiveTime> = self
            .times
            .iter()
            .filter_map(|raw| {
                let parsed = parse_time(raw);
                if parsed.is_none() {
                    tracing::warn!(time = %raw, "Ignoring invalid schedule time");
                }
                parsed
            })
            .collect();
        times.sort();
        times.dedup();
        times
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("03:00", Some((3, 0)))]
    #[case("23:59", Some((23, 59)))]
    #[case(" 00:00 ", Some((0, 0)))]
    #[case("24:00", None)]
    #[case("3:00", None)]
    #[case("03:60", None)]
    #[case("0300", None)]
    #[case("ab:cd", None)]
    fn test_parse_time(#[case] input: &str, #[case] expected: Option<(u32, u32)>) {
        let expected = expected.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0));
        assert_eq!(parse_time(input), expected);
    }

    #[test]
    fn test_parsed_skips_invalid_and_sorts() {
        let config = ScheduleConfig {
            times: vec!["18:00".into(), "bogus".into(), "06:00".into(), "18:00".into()],
        };
        assert!(config.validate().is_ok());
        let parsed = config.parsed();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0] < parsed[1]);
    }

    #[test]
    fn test_all_invalid_rejected() {
        let config = ScheduleConfig {
            times: vec!["25:00".into()],
        };
        assert!(config.validate().is_err());
    }
}
