use serde::{Deserialize, Serialize};

/// Descriptor of the device and application emitting telemetry.
///
/// Collected once per process and stamped onto every record that does not
/// already carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub sdk_name: String,
    pub sdk_version: String,
    pub os_name: String,
    pub os_version: Option<String>,
    pub model: Option<String>,
    pub oem_name: Option<String>,
    pub locale: Option<String>,
    pub time_zone_offset_minutes: Option<i32>,
    pub app_version: Option<String>,
    pub app_build: Option<String>,
    pub app_namespace: Option<String>,
}

impl DeviceInfo {
    /// Collect what the process can observe about its host. Application
    /// identity fields are not discoverable here; callers set them with
    /// the `with_app_*` builders.
    pub fn collect() -> Self {
        Self {
            sdk_name: "telem.rust".to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version: None,
            model: Some(std::env::consts::ARCH.to_string()),
            oem_name: None,
            locale: std::env::var("LANG").ok(),
            time_zone_offset_minutes: None,
            app_version: None,
            app_build: None,
            app_namespace: None,
        }
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    pub fn with_app_build(mut self, build: impl Into<String>) -> Self {
        self.app_build = Some(build.into());
        self
    }

    pub fn with_app_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.app_namespace = Some(namespace.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_populates_sdk_identity() {
        let device = DeviceInfo::collect();
        assert_eq!(device.sdk_name, "telem.rust");
        assert!(!device.sdk_version.is_empty());
        assert!(!device.os_name.is_empty());
    }

    #[test]
    fn test_app_builders() {
        let device = DeviceInfo::collect()
            .with_app_version("1.2.3")
            .with_app_build("456")
            .with_app_namespace("com.example.app");
        assert_eq!(device.app_version.as_deref(), Some("1.2.3"));
        assert_eq!(device.app_build.as_deref(), Some("456"));
        assert_eq!(device.app_namespace.as_deref(), Some("com.example.app"));
    }
}
