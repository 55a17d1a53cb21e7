use chrono::Utc;
use uuid::Uuid;

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Short random id with a role prefix, e.g. `explorer-1a2b3c4d`.
pub fn short_id(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.2345, 2), 1.23);
        assert_eq!(round_to(1.25, 1), 1.3);
        assert_eq!(round_to(7.0, 1), 7.0);
    }

    #[test]
    fn test_short_id() {
        let id = short_id("explorer");
        assert!(id.starts_with("explorer-"));
        assert_eq!(id.len(), "explorer-".len() + 8);
        assert_ne!(id, short_id("explorer"));
    }
}
