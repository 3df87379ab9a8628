use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retention class of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Kept indefinitely. Every change to who can see what lands here.
    Critical,
    #[default]
    Important,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
        }
    }
}

/// Anything that can be written to the activity log. The event name is
/// `"{entity_type}.{action}"`, e.g. `project_access.granted`.
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "revoked" => Severity::Critical,
            _ => self.severity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Thing(Uuid);

    impl Loggable for Thing {
        fn entity_type() -> &'static str { "thing" }
        fn subject_id(&self) -> Uuid { self.0 }
    }

    #[test]
    fn removals_are_critical_by_default() {
        let thing = Thing(Uuid::new_v4());
        assert_eq!(thing.severity_for_action("revoked"), Severity::Critical);
        assert_eq!(thing.severity_for_action("created"), Severity::Important);
        assert_eq!(Severity::Critical.as_str(), "critical");
    }
}
