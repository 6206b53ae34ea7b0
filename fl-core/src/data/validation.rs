//! Input validation for values that arrive from the command line or settings
//!
//! Each validator returns the parsed value or an `InvalidConfig` error naming the field.

use std::time::Duration;

use chrono::NaiveDate;

use crate::constants::{camera, storage};
use crate::data::types::FaultType;
use fl_error::{FlexlineError, Result};

/// Parse a `YYYY-MM-DD` date used by fault history filters
pub fn validate_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), storage::DATE_FORMAT).map_err(|e| {
        FlexlineError::InvalidConfig {
            field: field.to_string(),
            reason: format!("'{}' is not a YYYY-MM-DD date ({})", value, e),
        }
    })
}

/// Parse a fault type filter; "All" means no filter
pub fn validate_fault_type_filter(value: &str) -> Result<Option<FaultType>> {
    if value.eq_ignore_ascii_case(storage::FAULT_TYPE_ALL) {
        return Ok(None);
    }
    value.parse().map(Some)
}

/// Confidence thresholds live in [0, 1]
pub fn validate_confidence(value: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(FlexlineError::InvalidConfig {
            field: "confidence".into(),
            reason: format!("{} is outside [0, 1]", value),
        });
    }
    Ok(value)
}

/// Relay pulse length in seconds, must be finite and non-negative
pub fn validate_pulse_duration(seconds: f64) -> Result<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(FlexlineError::InvalidConfig {
            field: "trigger_duration_s".into(),
            reason: format!("{} is not a valid duration", seconds),
        });
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Slot indices are zero-based and bounded per class
pub fn validate_slot_index(index: usize) -> Result<usize> {
    if index >= camera::SLOTS_PER_CLASS {
        return Err(FlexlineError::InvalidConfig {
            field: "slot".into(),
            reason: format!("index {} exceeds {} slots", index, camera::SLOTS_PER_CLASS),
        });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_date() {
        let d = validate_date("from", "2024-03-09").unwrap();
        assert_eq!(d.to_string(), "2024-03-09");
        assert!(validate_date("from", "09/03/2024").is_err());
    }

    #[test]
    fn test_fault_type_filter() {
        assert_eq!(validate_fault_type_filter("All").unwrap(), None);
        assert_eq!(validate_fault_type_filter("all").unwrap(), None);
        assert_eq!(
            validate_fault_type_filter("Board Alignment").unwrap(),
            Some(FaultType::BoardAlignment)
        );
        assert!(validate_fault_type_filter("Screw").is_err());
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.01).is_err());
        assert!(validate_confidence(f32::NAN).is_err());
    }

    #[test]
    fn test_pulse_duration() {
        assert_eq!(validate_pulse_duration(0.5).unwrap(), Duration::from_millis(500));
        assert!(validate_pulse_duration(-1.0).is_err());
        assert!(validate_pulse_duration(f64::INFINITY).is_err());
    }

    #[test]
    fn test_slot_index() {
        assert!(validate_slot_index(1).is_ok());
        assert!(validate_slot_index(2).is_err());
    }
}
