use serde::{Deserialize, Serialize};

use super::lenient;

/// A step that only needs an on/off switch and surrounding delays
/// (autofocus, infinite focus, EQ solving, calibration).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimedStep {
    #[serde(default)]
    pub do_action: bool,
    #[serde(default)]
    pub wait_before: u64,
    #[serde(default)]
    pub wait_after: u64,
}

/// Slew to a solar-system body known to the device catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GotoSolar {
    #[serde(default)]
    pub do_action: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub wait_after: u64,
}

/// Slew to explicit equatorial coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GotoManual {
    #[serde(default)]
    pub do_action: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ra_coord: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dec_coord: Option<Coordinate>,
    #[serde(default)]
    pub wait_after: u64,
}

/// A coordinate as written by the user: decimal, or sexagesimal text such as
/// `"5h35m17s"` / `"-5°23'28\""`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Coordinate {
    Decimal(f64),
    Text(String),
}

impl Coordinate {
    /// Direct numeric reading, if there is one.
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Coordinate::Decimal(v) => Some(*v),
            Coordinate::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Coordinate::Decimal(v) => v.to_string(),
            Coordinate::Text(s) => s.trim().to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Coordinate::Text(s) if s.trim().is_empty())
    }
}

/// Camera parameters for an imaging run, tele (`setup_camera`) or wide
/// (`setup_wide_camera`). Only the settings present are pushed to the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CameraSetup {
    #[serde(default)]
    pub do_action: bool,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub exposure: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub gain: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing_if = "Option::is_none")]
    pub binning: Option<String>,
    #[serde(
        rename = "IRCut",
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub ir_cut: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32", skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default)]
    pub wait_after: u64,
}

impl CameraSetup {
    /// Whether the imaging stages run. A frame count of zero turns the
    /// stage into a no-op even when `do_action` is set.
    pub fn is_active(&self) -> bool {
        self.do_action && self.count != Some(0)
    }

    pub fn has_settings(&self) -> bool {
        self.exposure.is_some()
            || self.gain.is_some()
            || self.binning.is_some()
            || self.ir_cut.is_some()
            || self.count.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_settings_accept_numbers_and_strings() {
        let setup: CameraSetup = serde_json::from_str(
            r#"{"do_action": true, "exposure": 15, "gain": "80", "IRCut": 1, "count": "20"}"#,
        )
        .unwrap();
        assert_eq!(setup.exposure.as_deref(), Some("15"));
        assert_eq!(setup.gain.as_deref(), Some("80"));
        assert_eq!(setup.ir_cut.as_deref(), Some("1"));
        assert_eq!(setup.binning, None);
        assert_eq!(setup.count, Some(20));
        assert!(setup.is_active());
    }

    #[test]
    fn zero_count_disables_imaging() {
        let setup = CameraSetup {
            do_action: true,
            count: Some(0),
            ..Default::default()
        };
        assert!(!setup.is_active());
    }

    #[test]
    fn missing_count_keeps_stage_active() {
        let setup = CameraSetup {
            do_action: true,
            exposure: Some("10".into()),
            ..Default::default()
        };
        assert!(setup.is_active());
    }

    #[test]
    fn coordinate_reads_decimal_text() {
        let c: Coordinate = serde_json::from_str(r#""83.82""#).unwrap();
        assert_eq!(c.as_decimal(), Some(83.82));
        let c: Coordinate = serde_json::from_str("5.5").unwrap();
        assert_eq!(c.as_decimal(), Some(5.5));
        let c: Coordinate = serde_json::from_str(r#""5h35m17s""#).unwrap();
        assert_eq!(c.as_decimal(), None);
        assert_eq!(c.as_text(), "5h35m17s");
    }

    #[test]
    fn negative_count_is_rejected() {
        let res = serde_json::from_str::<CameraSetup>(r#"{"count": -1}"#);
        assert!(res.is_err());
    }
}
