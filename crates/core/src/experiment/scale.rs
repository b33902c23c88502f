use serde::{Deserialize, Serialize};

/// Axis scale used by gates and views.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Linear,
    Log,
}

impl Scale {
    /// Map a data value into scaled space. Non-positive values are not
    /// representable on a log scale and map to NaN.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Scale::Linear => value,
            Scale::Log if value > 0.0 => value.log10(),
            Scale::Log => f64::NAN,
        }
    }

    pub fn inverse(self, value: f64) -> f64 {
        match self {
            Scale::Linear => value,
            Scale::Log => 10f64.powf(value),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scale::Linear => "linear",
            Scale::Log => "log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_scale_round_trips_positive_values() {
        let scaled = Scale::Log.apply(1000.0);
        assert!((scaled - 3.0).abs() < 1e-12);
        assert!((Scale::Log.inverse(scaled) - 1000.0).abs() < 1e-9);
        assert!(Scale::Log.apply(0.0).is_nan());
        assert_eq!(Scale::Linear.apply(-5.0), -5.0);
    }
}
