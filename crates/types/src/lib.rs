use std::fmt;

/// Telemetry quantities tracked for the charge controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    BatteryVoltage,
    BatteryCurrent,
    BatteryPower,
    LoadVoltage,
    LoadCurrent,
    LoadPower,
    LoadOn,
    SolarVoltage,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::BatteryVoltage,
        Metric::BatteryCurrent,
        Metric::BatteryPower,
        Metric::LoadVoltage,
        Metric::LoadCurrent,
        Metric::LoadPower,
        Metric::LoadOn,
        Metric::SolarVoltage,
    ];

    /// Stable name used as the persisted record key.
    pub fn name(self) -> &'static str {
        match self {
            Metric::BatteryVoltage => "battery_voltage",
            Metric::BatteryCurrent => "battery_current",
            Metric::BatteryPower => "battery_watts",
            Metric::LoadVoltage => "load_voltage",
            Metric::LoadCurrent => "load_current",
            Metric::LoadPower => "load_watts",
            Metric::LoadOn => "is_load_on",
            Metric::SolarVoltage => "solar_voltage",
        }
    }

}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Last observed value of a metric.
///
/// `Text` only appears when a persisted record could not be read back as a
/// number or a flag; decoded frames always produce `Number` or `Flag`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl MetricValue {
    /// Recovers a value from its persisted textual form.
    pub fn parse_persisted(raw: &str) -> Self {
        let value = raw.trim_end_matches('\n');
        if let Ok(number) = value.trim().parse::<f64>() {
            return MetricValue::Number(number);
        }
        match value {
            "True" => MetricValue::Flag(true),
            "False" => MetricValue::Flag(false),
            _ => MetricValue::Text(value.to_string()),
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            MetricValue::Flag(value) => Some(*value),
            _ => None,
        }
    }
}

/// Persisted textual form. Flags use `True`/`False` so existing state files
/// stay readable across versions.
impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(value) => write!(f, "{value}"),
            MetricValue::Flag(true) => f.write_str("True"),
            MetricValue::Flag(false) => f.write_str("False"),
            MetricValue::Text(value) => f.write_str(value),
        }
    }
}

/// Externally requested load state for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadRequest {
    TurnOn,
    TurnOff,
    #[default]
    None,
}

impl LoadRequest {
    /// Interprets the raw intent signal. Anything other than `on`/`off` is no request.
    pub fn from_signal(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim_end_matches('\n')) {
            Some("on") => LoadRequest::TurnOn,
            Some("off") => LoadRequest::TurnOff,
            _ => LoadRequest::None,
        }
    }
}

impl fmt::Display for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoadRequest::TurnOn => "on",
            LoadRequest::TurnOff => "off",
            LoadRequest::None => "none",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_distinct_record_keys() {
        let mut names: Vec<&str> = Metric::ALL.iter().map(|metric| metric.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Metric::ALL.len());
        assert_eq!(Metric::LoadOn.to_string(), "is_load_on");
        assert_eq!(Metric::BatteryPower.to_string(), "battery_watts");
    }

    #[test]
    fn persisted_text_recovers_value_kind() {
        assert_eq!(MetricValue::parse_persisted("13.2\n"), MetricValue::Number(13.2));
        assert_eq!(MetricValue::parse_persisted("42"), MetricValue::Number(42.0));
        assert_eq!(MetricValue::parse_persisted("True"), MetricValue::Flag(true));
        assert_eq!(MetricValue::parse_persisted("False\n"), MetricValue::Flag(false));
        assert_eq!(
            MetricValue::parse_persisted("garbled"),
            MetricValue::Text("garbled".to_string())
        );
        // literal tokens are case sensitive
        assert_eq!(
            MetricValue::parse_persisted("true"),
            MetricValue::Text("true".to_string())
        );
    }

    #[test]
    fn display_matches_persisted_form() {
        assert_eq!(MetricValue::Number(13.2).to_string(), "13.2");
        assert_eq!(MetricValue::Number(120.0).to_string(), "120");
        assert_eq!(MetricValue::Flag(true).to_string(), "True");
        assert_eq!(MetricValue::Flag(false).to_string(), "False");
    }

    #[test]
    fn load_request_from_signal() {
        assert_eq!(LoadRequest::from_signal(Some("on\n")), LoadRequest::TurnOn);
        assert_eq!(LoadRequest::from_signal(Some("off")), LoadRequest::TurnOff);
        assert_eq!(LoadRequest::from_signal(Some("ON")), LoadRequest::None);
        assert_eq!(LoadRequest::from_signal(Some("")), LoadRequest::None);
        assert_eq!(LoadRequest::from_signal(None), LoadRequest::None);
    }
}
