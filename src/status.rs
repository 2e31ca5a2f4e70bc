use crate::types::{StatusResult, VehicleRecord, GREEN, ORANGE, RED};

pub const NOT_AVAILABLE: &str = "Not Available in System";

/// Maps a registry hit (or miss) to the label and color shown to the user.
pub fn classify(record: Option<&VehicleRecord>) -> StatusResult {
    let record = match record {
        Some(r) => r,
        None => {
            return StatusResult {
                label: NOT_AVAILABLE.to_string(),
                color: ORANGE,
            }
        }
    };

    if record.valid && !record.expired && !record.cases {
        return StatusResult {
            label: "Valid".to_string(),
            color: GREEN,
        };
    }

    let mut issues = Vec::with_capacity(3);
    if !record.valid {
        issues.push("Invalid");
    }
    if record.expired {
        issues.push("Expired");
    }
    if record.cases {
        issues.push("Has Cases");
    }
    StatusResult {
        label: issues.join(" | "),
        color: RED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(valid: bool, expired: bool, cases: bool) -> VehicleRecord {
        VehicleRecord {
            valid,
            expired,
            cases,
        }
    }

    #[test]
    fn missing_record_is_not_available() {
        let status = classify(None);
        assert_eq!(status.label, "Not Available in System");
        assert_eq!(status.color, ORANGE);
    }

    #[test]
    fn clean_record_is_valid() {
        let status = classify(Some(&record(true, false, false)));
        assert_eq!(status.label, "Valid");
        assert_eq!(status.color, GREEN);
    }

    #[test]
    fn every_other_combination_is_red_with_ordered_tags() {
        for &valid in &[true, false] {
            for &expired in &[true, false] {
                for &cases in &[true, false] {
                    if valid && !expired && !cases {
                        continue;
                    }
                    let status = classify(Some(&record(valid, expired, cases)));
                    assert_eq!(status.color, RED);
                    assert!(!status.label.is_empty());
                    if !valid {
                        assert!(status.label.starts_with("Invalid"));
                    }
                    if expired && cases {
                        let e = status.label.find("Expired").unwrap();
                        let c = status.label.find("Has Cases").unwrap();
                        assert!(e < c);
                    }
                }
            }
        }
    }

    #[test]
    fn all_issues_joined() {
        let status = classify(Some(&record(false, true, true)));
        assert_eq!(status.label, "Invalid | Expired | Has Cases");
        let status = classify(Some(&record(true, true, false)));
        assert_eq!(status.label, "Expired");
    }
}
