//! JSON export and import of scan results.

use crate::core::error::{Error, Result};
use crate::core::types::{Artifact, Platform, RiskLevel, ScanError, ScanResult, ScanStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// On-disk shape of a [`ScanResult`], with the derived totals spelled out.
#[derive(Debug, Serialize, Deserialize)]
struct ScanDocument {
    scan_id: String,
    platform: Platform,
    status: ScanStatus,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    total_items: usize,
    counts_by_risk: BTreeMap<RiskLevel, usize>,
    items: Vec<Artifact>,
    #[serde(default)]
    errors: Vec<ScanError>,
}

impl From<&ScanResult> for ScanDocument {
    fn from(result: &ScanResult) -> Self {
        Self {
            scan_id: result.scan_id.clone(),
            platform: result.platform,
            status: result.status,
            start_time: result.start_time,
            end_time: result.end_time,
            total_items: result.total_items(),
            counts_by_risk: result.counts_by_risk(),
            items: result.items.clone(),
            errors: result.errors.clone(),
        }
    }
}

/// Serialize a scan result as pretty-printed JSON.
pub fn export_json(result: &ScanResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(&ScanDocument::from(result))?)
}

/// Parse an exported scan result, rejecting documents whose totals do not
/// match their items.
pub fn parse_json(json: &str) -> Result<ScanResult> {
    let doc: ScanDocument = serde_json::from_str(json)?;
    let result = ScanResult {
        scan_id: doc.scan_id,
        platform: doc.platform,
        status: doc.status,
        start_time: doc.start_time,
        end_time: doc.end_time,
        items: doc.items,
        errors: doc.errors,
    };

    if doc.total_items != result.total_items() {
        return Err(Error::ReportInconsistent(format!(
            "total_items is {} but {} item(s) are present",
            doc.total_items,
            result.total_items()
        )));
    }

    let actual = result.counts_by_risk();
    for level in RiskLevel::ALL {
        let declared = doc.counts_by_risk.get(&level).copied().unwrap_or(0);
        let counted = actual.get(&level).copied().unwrap_or(0);
        if declared != counted {
            return Err(Error::ReportInconsistent(format!(
                "counts_by_risk.{} is {} but {} item(s) have that risk",
                level.as_str(),
                declared,
                counted
            )));
        }
    }

    Ok(result)
}

pub fn write_json(result: &ScanResult, path: &Path) -> Result<()> {
    let json = export_json(result)?;
    std::fs::write(path, json).map_err(|e| Error::file_write(path, e))
}

pub fn read_json(path: &Path) -> Result<ScanResult> {
    let json = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
    parse_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MechanismKind, ScanErrorKind, SigningTier};
    use chrono::TimeZone;

    fn sample() -> ScanResult {
        let mut task = Artifact::new(
            Platform::Windows,
            MechanismKind::ScheduledTask,
            "\\Updater",
            "Task Scheduler",
        )
        .with_path(r"C:\Users\bob\AppData\Local\Temp\u.exe")
        .with_command(r"C:\Users\bob\AppData\Local\Temp\u.exe -silent")
        .with_meta("author", "bob");
        task.id = "scheduled_tasks-1".into();
        task.raise(RiskLevel::High, "runs from writable location (\\temp\\)");
        task.signing_tier = SigningTier::Unsigned;
        task.content_hash = Some("ab".repeat(32));
        task.modified_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

        ScanResult {
            scan_id: "0f6c7f3e".into(),
            platform: Platform::Windows,
            status: ScanStatus::Completed,
            start_time: Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 5).unwrap(),
            items: vec![task],
            errors: vec![ScanError::new("services", ScanErrorKind::Timeout, "reg timed out after 10s")],
        }
    }

    #[test]
    fn test_round_trip() {
        let result = sample();
        let json = export_json(&result).unwrap();
        assert_eq!(parse_json(&json).unwrap(), result);
    }

    #[test]
    fn test_field_names() {
        let json = export_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_items"], 1);
        assert_eq!(value["counts_by_risk"]["high"], 1);
        assert_eq!(value["counts_by_risk"]["safe"], 0);
        assert_eq!(value["items"][0]["risk"], "high");
        assert_eq!(value["items"][0]["mechanism_kind"], "scheduled_task");
        assert_eq!(value["items"][0]["signing_tier"], "unsigned");
        assert!(value["items"][0]["hash"].is_string());
        assert_eq!(value["errors"][0]["kind"], "timeout");
    }

    #[test]
    fn test_rejects_inconsistent_totals() {
        let json = export_json(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["total_items"] = 2.into();
        let tampered = serde_json::to_string(&value).unwrap();
        assert!(matches!(parse_json(&tampered), Err(Error::ReportInconsistent(_))));

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["counts_by_risk"]["high"] = 0.into();
        value["counts_by_risk"]["critical"] = 1.into();
        let tampered = serde_json::to_string(&value).unwrap();
        assert!(matches!(parse_json(&tampered), Err(Error::ReportInconsistent(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.json");
        write_json(&sample(), &path).unwrap();
        assert_eq!(read_json(&path).unwrap(), sample());
        assert!(read_json(&dir.path().join("missing.json")).is_err());
    }
}
