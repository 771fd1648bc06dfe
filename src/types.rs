//! Shared types used across the codebase

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::config;

/// A class: department + year, optionally narrowed to a section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub department: String,
    pub year: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl ClassRef {
    pub fn new(department: impl Into<String>, year: impl Into<String>, section: Option<String>) -> Self {
        Self {
            department: department.into(),
            year: year.into(),
            section: normalize_section(section),
        }
    }

    /// Builds a class from optional parts; department and year must both be present.
    pub fn from_parts(
        department: Option<&str>,
        year: Option<&str>,
        section: Option<&str>,
    ) -> Option<Self> {
        match (department, year) {
            (Some(d), Some(y)) if !d.trim().is_empty() && !y.trim().is_empty() => {
                Some(Self::new(d.trim(), y.trim(), section.map(str::to_string)))
            }
            _ => None,
        }
    }

    /// True when a student in (`department`, `year`, `section`) belongs to
    /// this class. A class without a section covers every section.
    pub fn includes(&self, department: &str, year: &str, section: Option<&str>) -> bool {
        if self.department != department || self.year != year {
            return false;
        }
        match &self.section {
            None => true,
            Some(s) => section.map(|x| x == s).unwrap_or(false),
        }
    }

    /// Two session scopes collide when they share department and year and
    /// either is section-less or both name the same section.
    pub fn overlaps(&self, other: &ClassRef) -> bool {
        self.department == other.department
            && self.year == other.year
            && match (&self.section, &other.section) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    pub fn label(&self) -> String {
        match &self.section {
            Some(s) => format!("{} {}-{}", self.department, self.year, s),
            None => format!("{} {}", self.department, self.year),
        }
    }
}

pub fn normalize_section(section: Option<String>) -> Option<String> {
    section.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Campus clock offset from UTC.
pub fn campus_offset() -> FixedOffset {
    let minutes = config::config().attendance.utc_offset_minutes;
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// The campus-local calendar day of an instant.
pub fn campus_day(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

pub fn campus_today() -> NaiveDate {
    campus_day(Utc::now(), campus_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sectionless_class_includes_every_section() {
        let class = ClassRef::new("CS", "2", None);
        assert!(class.includes("CS", "2", Some("A")));
        assert!(class.includes("CS", "2", None));
        assert!(!class.includes("CS", "3", Some("A")));
    }

    #[test]
    fn sectioned_class_requires_same_section() {
        let class = ClassRef::new("CS", "2", Some("A".into()));
        assert!(class.includes("CS", "2", Some("A")));
        assert!(!class.includes("CS", "2", Some("B")));
        assert!(!class.includes("CS", "2", None));
    }

    #[test]
    fn blank_section_is_none() {
        let class = ClassRef::new("CS", "2", Some("  ".into()));
        assert_eq!(class.section, None);
    }

    #[test]
    fn overlap_rules() {
        let a = ClassRef::new("CS", "2", Some("A".into()));
        let b = ClassRef::new("CS", "2", Some("B".into()));
        let all = ClassRef::new("CS", "2", None);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&all));
        assert!(all.overlaps(&b));
        assert!(!a.overlaps(&ClassRef::new("EE", "2", Some("A".into()))));
    }

    #[test]
    fn campus_day_uses_offset() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let ist = FixedOffset::east_opt(330 * 60).unwrap();
        assert_eq!(campus_day(instant, ist), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(campus_day(instant, utc), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
