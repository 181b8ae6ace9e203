use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::instance_settings::InstanceSettings;
use crate::db::retention_policies::RetentionPolicyRow;

/// Regulatory jurisdiction driving minimum retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceRegion {
    None,
    Eu,
    Us,
    Kz,
    Uk,
    Ca,
}

impl ComplianceRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceRegion::None => "none",
            ComplianceRegion::Eu => "eu",
            ComplianceRegion::Us => "us",
            ComplianceRegion::Kz => "kz",
            ComplianceRegion::Uk => "uk",
            ComplianceRegion::Ca => "ca",
        }
    }

    /// Archival in these regions must physically remove objects; a
    /// logical-only delete is not enough.
    pub fn requires_true_deletion(&self) -> bool {
        matches!(self, ComplianceRegion::Eu | ComplianceRegion::Kz)
    }

    /// Each batch apply in these regions emits a signed certificate record
    /// to the audit log.
    pub fn requires_deletion_certificate(&self) -> bool {
        matches!(self, ComplianceRegion::Eu | ComplianceRegion::Us | ComplianceRegion::Kz)
    }
}

impl fmt::Display for ComplianceRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceRegion {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ComplianceRegion::None),
            "eu" => Ok(ComplianceRegion::Eu),
            "us" => Ok(ComplianceRegion::Us),
            "kz" => Ok(ComplianceRegion::Kz),
            "uk" => Ok(ComplianceRegion::Uk),
            "ca" => Ok(ComplianceRegion::Ca),
            other => Err(format!("unknown compliance region '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    General,
    Pii,
    Financial,
    Healthcare,
    Sensitive,
    Government,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::General => "general",
            DataClassification::Pii => "pii",
            DataClassification::Financial => "financial",
            DataClassification::Healthcare => "healthcare",
            DataClassification::Sensitive => "sensitive",
            DataClassification::Government => "government",
        }
    }
}

impl FromStr for DataClassification {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(DataClassification::General),
            "pii" => Ok(DataClassification::Pii),
            "financial" => Ok(DataClassification::Financial),
            "healthcare" => Ok(DataClassification::Healthcare),
            "sensitive" => Ok(DataClassification::Sensitive),
            "government" => Ok(DataClassification::Government),
            other => Err(format!("unknown data classification '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Professional,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Maximum retention the plan allows; -1 means unbounded.
    pub fn ceiling_days(&self) -> i32 {
        match self {
            Tier::Free => 90,
            Tier::Professional => 365,
            Tier::Enterprise => -1,
        }
    }

    pub fn floor_days(&self) -> i32 {
        match self {
            Tier::Free | Tier::Professional => 7,
            Tier::Enterprise => 1,
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "professional" => Ok(Tier::Professional),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// Regulatory minimum in days for a (region, classification) pair.
/// Classifications outside the regulation tables inherit the `general`
/// floor of their region.
pub fn compliance_floor_days(
    region: ComplianceRegion,
    classification: DataClassification,
) -> i32 {
    use ComplianceRegion::*;
    use DataClassification::*;
    match (region, classification) {
        (Eu, Financial) => 365,
        (Us, Financial) | (Us, Healthcare) => 2_555,
        (Kz, Financial) => 1_825,
        (Kz, Healthcare) => 3_650,
        (Uk, Financial) => 2_190,
        (Ca, Financial) => 2_190,
        (Ca, Healthcare) => 3_650,
        _ => 0,
    }
}

/// Category durations as configured, before floors and ceilings apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    pub bug_report_retention_days: i32,
    pub screenshot_retention_days: i32,
    pub replay_retention_days: i32,
    pub attachment_retention_days: i32,
    pub archived_retention_days: i32,
    pub archive_before_delete: bool,
    pub data_classification: DataClassification,
    pub compliance_region: ComplianceRegion,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub category: &'static str,
    pub message: String,
}

impl PolicyInput {
    fn categories(&self) -> [(&'static str, i32); 5] {
        [
            ("bug_report_retention_days", self.bug_report_retention_days),
            ("screenshot_retention_days", self.screenshot_retention_days),
            ("replay_retention_days", self.replay_retention_days),
            ("attachment_retention_days", self.attachment_retention_days),
            ("archived_retention_days", self.archived_retention_days),
        ]
    }

    /// Reject any configuration that sits below the compliance floor,
    /// below the tier floor, or above the tier ceiling. Admins may bypass
    /// the tier ceiling but never the compliance floor; an infeasible
    /// floor/ceiling pair is rejected outright.
    pub fn validate(&self, admin_bypass: bool) -> Result<(), Vec<PolicyViolation>> {
        let floor = compliance_floor_days(self.compliance_region, self.data_classification);
        let ceiling = self.tier.ceiling_days();
        let tier_floor = self.tier.floor_days();
        let mut violations = Vec::new();

        if ceiling >= 0 && ceiling < floor && !admin_bypass {
            violations.push(PolicyViolation {
                category: "tier",
                message: format!(
                    "tier '{}' caps retention at {ceiling} days but region '{}' requires {floor} days for '{}' data",
                    self.tier.as_str(),
                    self.compliance_region,
                    self.data_classification.as_str(),
                ),
            });
        }

        for (category, days) in self.categories() {
            if days < floor {
                violations.push(PolicyViolation {
                    category,
                    message: format!(
                        "{category} of {days} days is below the {floor}-day compliance floor for '{}' data in region '{}'",
                        self.data_classification.as_str(),
                        self.compliance_region,
                    ),
                });
            }
            if days < tier_floor {
                violations.push(PolicyViolation {
                    category,
                    message: format!(
                        "{category} of {days} days is below the {tier_floor}-day minimum for the '{}' tier",
                        self.tier.as_str(),
                    ),
                });
            }
            if ceiling >= 0 && days > ceiling && !admin_bypass {
                violations.push(PolicyViolation {
                    category,
                    message: format!(
                        "{category} of {days} days exceeds the {ceiling}-day ceiling for the '{}' tier",
                        self.tier.as_str(),
                    ),
                });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// The policy actually enforced for a project after floors and ceilings.
#[derive(Debug, Clone, Serialize)]
pub struct EffectivePolicy {
    pub project_id: Option<Uuid>,
    pub bug_report_retention_days: i32,
    pub screenshot_retention_days: i32,
    pub replay_retention_days: i32,
    pub attachment_retention_days: i32,
    pub archived_retention_days: i32,
    pub archive_before_delete: bool,
    pub data_classification: DataClassification,
    pub compliance_region: ComplianceRegion,
    pub tier: Tier,
}

fn effective_days(configured: i32, floor: i32, ceiling: i32) -> i32 {
    let mut days = configured.max(floor);
    if ceiling >= 0 {
        // An infeasible pair was rejected at validation; clamping here can
        // never cross back under the floor.
        days = days.min(ceiling).max(floor);
    }
    days
}

/// Resolve the enforced policy: the project's row when present, otherwise
/// the instance-wide defaults (unbounded tier, no region).
pub fn resolve_effective(
    project_id: Uuid,
    row: Option<&RetentionPolicyRow>,
    settings: &InstanceSettings,
) -> EffectivePolicy {
    match row {
        Some(row) => {
            let region = row
                .compliance_region
                .parse()
                .unwrap_or(ComplianceRegion::None);
            let classification = row
                .data_classification
                .parse()
                .unwrap_or(DataClassification::General);
            let tier = row.tier.parse().unwrap_or(Tier::Free);
            let floor = compliance_floor_days(region, classification);
            let ceiling = tier.ceiling_days();

            EffectivePolicy {
                project_id: Some(project_id),
                bug_report_retention_days: effective_days(
                    row.bug_report_retention_days,
                    floor,
                    ceiling,
                ),
                screenshot_retention_days: effective_days(
                    row.screenshot_retention_days,
                    floor,
                    ceiling,
                ),
                replay_retention_days: effective_days(row.replay_retention_days, floor, ceiling),
                attachment_retention_days: effective_days(
                    row.attachment_retention_days,
                    floor,
                    ceiling,
                ),
                archived_retention_days: effective_days(
                    row.archived_retention_days,
                    floor,
                    ceiling,
                ),
                archive_before_delete: row.archive_before_delete,
                data_classification: classification,
                compliance_region: region,
                tier,
            }
        }
        None => EffectivePolicy {
            project_id: Some(project_id),
            bug_report_retention_days: settings.retention_days,
            screenshot_retention_days: settings.retention_days,
            replay_retention_days: settings.retention_days,
            attachment_retention_days: settings.retention_days,
            archived_retention_days: settings.retention_days,
            archive_before_delete: false,
            data_classification: DataClassification::General,
            compliance_region: ComplianceRegion::None,
            tier: Tier::Enterprise,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(days: i32, region: ComplianceRegion, class: DataClassification, tier: Tier) -> PolicyInput {
        PolicyInput {
            bug_report_retention_days: days,
            screenshot_retention_days: days,
            replay_retention_days: days,
            attachment_retention_days: days,
            archived_retention_days: days,
            archive_before_delete: false,
            data_classification: class,
            compliance_region: region,
            tier,
        }
    }

    #[test]
    fn floor_table_matches_regulations() {
        use ComplianceRegion::*;
        use DataClassification::*;
        assert_eq!(compliance_floor_days(None, Financial), 0);
        assert_eq!(compliance_floor_days(Eu, Financial), 365);
        assert_eq!(compliance_floor_days(Eu, Healthcare), 0);
        assert_eq!(compliance_floor_days(Us, Financial), 2_555);
        assert_eq!(compliance_floor_days(Us, Healthcare), 2_555);
        assert_eq!(compliance_floor_days(Kz, Financial), 1_825);
        assert_eq!(compliance_floor_days(Kz, Healthcare), 3_650);
        assert_eq!(compliance_floor_days(Uk, Financial), 2_190);
        assert_eq!(compliance_floor_days(Ca, Healthcare), 3_650);
        assert_eq!(compliance_floor_days(Eu, Pii), 0);
        assert_eq!(compliance_floor_days(Us, Sensitive), 0);
    }

    #[test]
    fn eu_financial_floor_rejects_30_days() {
        let err = policy(30, ComplianceRegion::Eu, DataClassification::Financial, Tier::Professional)
            .validate(false)
            .unwrap_err();
        assert!(err.iter().any(|v| v.message.contains("365")));

        // Exactly at the floor is accepted.
        policy(365, ComplianceRegion::Eu, DataClassification::Financial, Tier::Professional)
            .validate(false)
            .unwrap();
    }

    #[test]
    fn infeasible_floor_ceiling_pair_is_rejected() {
        // Free tier caps at 90 days; US financial needs 2555.
        let err = policy(2_555, ComplianceRegion::Us, DataClassification::Financial, Tier::Free)
            .validate(false)
            .unwrap_err();
        assert!(err.iter().any(|v| v.category == "tier"));
    }

    #[test]
    fn admin_bypasses_ceiling_but_never_floor() {
        // Over the professional ceiling: admin override accepted.
        policy(1_000, ComplianceRegion::None, DataClassification::General, Tier::Professional)
            .validate(true)
            .unwrap();

        // Under the EU financial floor: rejected even for admins.
        assert!(policy(
            30,
            ComplianceRegion::Eu,
            DataClassification::Financial,
            Tier::Enterprise
        )
        .validate(true)
        .is_err());
    }

    #[test]
    fn tier_floor_applies() {
        let err = policy(3, ComplianceRegion::None, DataClassification::General, Tier::Free)
            .validate(false)
            .unwrap_err();
        assert!(err.iter().any(|v| v.message.contains("7-day minimum")));

        policy(1, ComplianceRegion::None, DataClassification::General, Tier::Enterprise)
            .validate(false)
            .unwrap();
    }

    #[test]
    fn effective_days_clamps_within_bounds() {
        assert_eq!(effective_days(30, 0, 90), 30);
        assert_eq!(effective_days(30, 365, -1), 365);
        assert_eq!(effective_days(400, 0, 365), 365);
        assert_eq!(effective_days(400, 0, -1), 400);
    }

    #[test]
    fn true_deletion_and_certificate_flags() {
        assert!(ComplianceRegion::Eu.requires_true_deletion());
        assert!(ComplianceRegion::Kz.requires_true_deletion());
        assert!(!ComplianceRegion::Us.requires_true_deletion());
        assert!(ComplianceRegion::Us.requires_deletion_certificate());
        assert!(!ComplianceRegion::Uk.requires_deletion_certificate());
        assert!(!ComplianceRegion::Ca.requires_deletion_certificate());
    }
}
