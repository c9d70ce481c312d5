use serde::{Deserialize, Serialize};

/// Device family. Only affects how filter and binning indices are labelled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    #[default]
    Dwarf2,
    Dwarf3,
}

impl DeviceModel {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(DeviceModel::Dwarf2),
            3 => Some(DeviceModel::Dwarf3),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            DeviceModel::Dwarf2 => 2,
            DeviceModel::Dwarf3 => 3,
        }
    }

    /// Human label for an IR/filter index.
    pub fn filter_label(self, index: &str) -> &'static str {
        match (self, index.trim()) {
            (DeviceModel::Dwarf2, "0") => "IR_CUT",
            (DeviceModel::Dwarf2, _) => "IR_PASS",
            (DeviceModel::Dwarf3, "0") => "VIS_FILTER",
            (DeviceModel::Dwarf3, "1") => "ASTRO_FILTER",
            (DeviceModel::Dwarf3, _) => "DUAL_BAND",
        }
    }

    pub fn binning_label(index: &str) -> &'static str {
        if index.trim() == "0" {
            "4k"
        } else {
            "2k"
        }
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dwarf {}", self.id())
    }
}

/// Solar-system bodies the device can slew to by catalogue id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarTarget {
    Mercury,
    Venus,
    Mars,
    Jupiter,
    Saturn,
    Uranus,
    Neptune,
    Moon,
    Sun,
}

impl SolarTarget {
    pub fn from_name(name: &str) -> Option<Self> {
        let target = match name.trim().to_lowercase().as_str() {
            "mercury" => SolarTarget::Mercury,
            "venus" => SolarTarget::Venus,
            "mars" => SolarTarget::Mars,
            "jupiter" => SolarTarget::Jupiter,
            "saturn" => SolarTarget::Saturn,
            "uranus" => SolarTarget::Uranus,
            "neptune" => SolarTarget::Neptune,
            "moon" => SolarTarget::Moon,
            "sun" => SolarTarget::Sun,
            _ => return None,
        };
        Some(target)
    }

    /// Catalogue index used by the device.
    pub fn catalog_id(self) -> u8 {
        match self {
            SolarTarget::Mercury => 1,
            SolarTarget::Venus => 2,
            SolarTarget::Mars => 3,
            SolarTarget::Jupiter => 4,
            SolarTarget::Saturn => 5,
            SolarTarget::Uranus => 6,
            SolarTarget::Neptune => 7,
            SolarTarget::Moon => 8,
            SolarTarget::Sun => 9,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SolarTarget::Mercury => "Mercury",
            SolarTarget::Venus => "Venus",
            SolarTarget::Mars => "Mars",
            SolarTarget::Jupiter => "Jupiter",
            SolarTarget::Saturn => "Saturn",
            SolarTarget::Uranus => "Uranus",
            SolarTarget::Neptune => "Neptune",
            SolarTarget::Moon => "Moon",
            SolarTarget::Sun => "Sun",
        }
    }
}

/// Camera parameters as reported back by the device after setup. These may
/// differ from what the job asked for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CameraSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Device-reported settings recorded into the job after execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wide_camera: Option<CameraSettings>,
}
