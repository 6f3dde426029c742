//! Diagram settings and partial settings updates.

use crate::error::{DiagramError, Result};
use crate::persistence::{LayoutRecord, Store};
use crate::types::Transform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage path of the persisted grouping flag.
pub const GROUPING_FLAG: &str = "grouping";
/// Storage path of the persisted IP label flag.
pub const SHOW_IP_FLAG: &str = "showIpAddress";

/// Settings of a diagram instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Whether the toolbar is shown
    pub toolbar: bool,
    /// Whether groups are drawn and the cluster force is active
    pub grouping: bool,
    /// Dragged items revert to unpinned after release
    pub float_mode: bool,
    /// Whether device IP address labels are shown
    pub show_ip_address: bool,
    /// Padding added around member nodes when deriving a group box
    pub group_padding: f32,
    /// Tolerance used when testing group boxes for intersection
    pub group_border_width: f32,
    /// Zoom multiplier of the zoom-in step
    pub zoom_in_mult: f32,
    /// Zoom multiplier of the zoom-out step
    pub zoom_out_mult: f32,
    /// Upper bound of the scale extent
    pub max_zoom_in: f32,
    /// Lower bound of the scale extent
    pub max_zoom_out: f32,
    /// Explicit layout used instead of the stored one, keyed by layer id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<BTreeMap<String, LayoutRecord>>,
    /// Explicit initial transform used instead of the stored one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            toolbar: false,
            grouping: true,
            float_mode: true,
            show_ip_address: true,
            group_padding: 75.0,
            group_border_width: 10.0,
            zoom_in_mult: 1.25,
            zoom_out_mult: 0.8,
            max_zoom_in: 8.0,
            max_zoom_out: 0.1,
            layout: None,
            transform: None,
        }
    }
}

impl Settings {
    /// Builds the settings of a new diagram.
    ///
    /// Persisted flags seed `grouping` and `showIpAddress` (anything but `"false"` enables them),
    /// then the explicit overrides are applied on top.
    pub fn load(store: &Store, overrides: &SettingsPatch) -> Self {
        let mut settings = Self {
            grouping: store.get_flag(GROUPING_FLAG).as_deref() != Some("false"),
            show_ip_address: store.get_flag(SHOW_IP_FLAG).as_deref() != Some("false"),
            ..Self::default()
        };
        settings.merge(overrides);
        settings
    }

    /// Copies every field present in `patch` without running any toggle routine.
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.toolbar {
            self.toolbar = v;
        }
        if let Some(v) = patch.grouping {
            self.grouping = v;
        }
        if let Some(v) = patch.float_mode {
            self.float_mode = v;
        }
        if let Some(v) = patch.show_ip_address {
            self.show_ip_address = v;
        }
        self.merge_values(patch);
        if patch.layout.is_some() {
            self.layout = patch.layout.clone();
        }
        if patch.transform.is_some() {
            self.transform = patch.transform;
        }
    }

    /// Copies the numeric fields of `patch`; returns true if a zoom bound changed.
    pub fn merge_values(&mut self, patch: &SettingsPatch) -> bool {
        if let Some(v) = patch.group_padding {
            self.group_padding = v;
        }
        if let Some(v) = patch.group_border_width {
            self.group_border_width = v;
        }
        if let Some(v) = patch.zoom_in_mult {
            self.zoom_in_mult = v;
        }
        if let Some(v) = patch.zoom_out_mult {
            self.zoom_out_mult = v;
        }
        let mut zoom_changed = false;
        if let Some(v) = patch.max_zoom_in {
            self.max_zoom_in = v;
            zoom_changed = true;
        }
        if let Some(v) = patch.max_zoom_out {
            self.max_zoom_out = v;
            zoom_changed = true;
        }
        zoom_changed
    }

    /// The configured `(min, max)` scale extent.
    pub fn scale_extent(&self) -> (f32, f32) {
        (self.max_zoom_out, self.max_zoom_in)
    }
}

/// A partial settings update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub toolbar: Option<bool>,
    pub grouping: Option<bool>,
    pub float_mode: Option<bool>,
    pub show_ip_address: Option<bool>,
    pub group_padding: Option<f32>,
    pub group_border_width: Option<f32>,
    pub zoom_in_mult: Option<f32>,
    pub zoom_out_mult: Option<f32>,
    pub max_zoom_in: Option<f32>,
    pub max_zoom_out: Option<f32>,
    pub layout: Option<BTreeMap<String, LayoutRecord>>,
    pub transform: Option<Transform>,
}

impl SettingsPatch {
    /// Parses a patch from a JSON object.
    ///
    /// Boolean flags must be JSON booleans and numeric settings JSON numbers. Unknown keys are
    /// ignored.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| DiagramError::invalid_setting("settings", "expected an object"))?;

        let mut patch = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "toolbar" => patch.toolbar = Some(flag(key, value)?),
                "grouping" => patch.grouping = Some(flag(key, value)?),
                "floatMode" => patch.float_mode = Some(flag(key, value)?),
                "showIpAddress" => patch.show_ip_address = Some(flag(key, value)?),
                "groupPadding" => patch.group_padding = Some(number(key, value)?),
                "groupBorderWidth" => patch.group_border_width = Some(number(key, value)?),
                "zoomInMult" => patch.zoom_in_mult = Some(number(key, value)?),
                "zoomOutMult" => patch.zoom_out_mult = Some(number(key, value)?),
                "maxZoomIn" => patch.max_zoom_in = Some(number(key, value)?),
                "maxZoomOut" => patch.max_zoom_out = Some(number(key, value)?),
                "layout" => patch.layout = Some(serde_json::from_value(value.clone())?),
                "transform" => patch.transform = Some(serde_json::from_value(value.clone())?),
                other => log::debug!("ignoring unknown setting {other}"),
            }
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn flag(name: &str, value: &serde_json::Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| DiagramError::invalid_setting(name, "must be a boolean value"))
}

fn number(name: &str, value: &serde_json::Value) -> Result<f32> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| DiagramError::invalid_setting(name, "must be a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.toolbar);
        assert!(settings.grouping);
        assert!(settings.float_mode);
        assert_eq!(settings.group_padding, 75.0);
        assert_eq!(settings.scale_extent(), (0.1, 8.0));
    }

    #[test]
    fn test_load_reads_stored_flags() {
        let backend = MemoryStore::default();
        let store = Store::new("diagram", Some(Box::new(backend.clone())));
        store.set_flag(GROUPING_FLAG, "false");

        let settings = Settings::load(&store, &SettingsPatch::default());
        assert!(!settings.grouping);
        assert!(settings.show_ip_address);

        let overrides = SettingsPatch {
            grouping: Some(true),
            ..Default::default()
        };
        assert!(Settings::load(&store, &overrides).grouping);
    }

    #[test]
    fn test_patch_from_json() {
        let patch = SettingsPatch::from_json(&json!({
            "floatMode": false,
            "maxZoomIn": 4,
            "transform": {"x": 1.0, "y": 2.0, "k": 0.5}
        }))
        .unwrap();

        assert_eq!(patch.float_mode, Some(false));
        assert_eq!(patch.max_zoom_in, Some(4.0));
        assert_eq!(patch.transform, Some(Transform::new(1.0, 2.0, 0.5)));
    }

    #[test]
    fn test_patch_rejects_non_boolean_flag() {
        let err = SettingsPatch::from_json(&json!({"grouping": "yes"})).unwrap_err();
        assert!(matches!(err, DiagramError::InvalidSetting { ref name, .. } if name == "grouping"));
    }

    #[test]
    fn test_merge_values_reports_zoom_change() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            group_padding: Some(50.0),
            ..Default::default()
        };
        assert!(!settings.merge_values(&patch));
        assert_eq!(settings.group_padding, 50.0);

        let patch = SettingsPatch {
            max_zoom_out: Some(0.5),
            ..Default::default()
        };
        assert!(settings.merge_values(&patch));
        assert_eq!(settings.scale_extent(), (0.5, 8.0));
    }
}
