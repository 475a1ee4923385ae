use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a running process, served on `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl ServiceInfo {
    /// Call once at startup; the instance id and start time stay fixed.
    pub fn new(name: &str, environment: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            environment: environment.to_owned(),
            instance_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_info_carries_name_version_and_environment() {
        let info = ServiceInfo::new("tally-api", "development");
        assert_eq!(info.name, "tally-api");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.started_at <= Utc::now());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["environment"], "development");
    }

    #[test]
    fn instances_are_distinct() {
        let a = ServiceInfo::new("tally-aggregator", "production");
        let b = ServiceInfo::new("tally-aggregator", "production");
        assert_ne!(a.instance_id, b.instance_id);
    }
}
