use tracing::error;

use super::entities::Activity;

const DEFAULT_ACTIVITIES: &str = include_str!("../../assets/default_activities.json");

/// Activities handed to first-time users. A broken bundled resource degrades to an empty
/// collection instead of failing the read path.
pub fn default_activities() -> Vec<Activity> {
    parse_seed(DEFAULT_ACTIVITIES)
}

fn parse_seed(raw: &str) -> Vec<Activity> {
    serde_json::from_str(raw)
        .inspect_err(|e| error!("Default activities are malformed {e}"))
        .unwrap_or_default()
}
