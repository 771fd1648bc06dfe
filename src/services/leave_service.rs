use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{non_blank, parse_day, ServiceError, ServiceResult};
use crate::database::models::{Leave, LeaveStatus, Role, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::types::ClassRef;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub reason: Option<String>,
    pub attachment: Option<String>,
}

/// A validated leave application.
#[derive(Debug, Clone, PartialEq)]
pub struct LeavePlan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub reason: String,
    pub attachment: Option<String>,
}

impl LeaveRequest {
    pub fn validate(self) -> ServiceResult<LeavePlan> {
        let start = non_blank(self.start_date.as_deref()).ok_or(ServiceError::required("startDate"))?;
        let end = non_blank(self.end_date.as_deref()).ok_or(ServiceError::required("endDate"))?;
        let start = parse_day(Some(&start))?;
        let end = parse_day(Some(&end))?;
        if end < start {
            return Err(ServiceError::invalid("End date cannot be before start date"));
        }
        let reason = non_blank(self.reason.as_deref()).ok_or(ServiceError::required("reason"))?;
        Ok(LeavePlan {
            start,
            end,
            reason,
            attachment: non_blank(self.attachment.as_deref()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveDecision {
    pub status: LeaveStatus,
    pub rejection_reason: Option<String>,
}

/// A leave with the student and reviewer it concerns.
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeaveEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub leave: Leave,
    pub student_name: String,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub approved_by_name: Option<String>,
}

/// The class whose leaves `reviewer` handles; `None` means every class.
pub fn review_scope(reviewer: &User) -> ServiceResult<Option<ClassRef>> {
    if reviewer.role == Role::Superadmin {
        return Ok(None);
    }
    reviewer
        .advisor_class()
        .map(Some)
        .ok_or_else(|| ServiceError::forbidden("No advisor class assigned"))
}

/// Refuses leaves of students outside the reviewer's class.
pub fn ensure_reviewable(scope: Option<&ClassRef>, student: &User) -> ServiceResult<()> {
    let Some(class) = scope else {
        return Ok(());
    };
    let in_class = match (&student.department, &student.year) {
        (Some(d), Some(y)) => class.includes(d, y, student.section.as_deref()),
        _ => false,
    };
    if !in_class {
        return Err(ServiceError::forbidden("Not authorized to review this leave request"));
    }
    Ok(())
}

pub struct LeaveService {
    pool: PgPool,
}

impl LeaveService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self { pool: DatabaseManager::pool()? })
    }

    pub async fn apply(&self, student: &User, request: LeaveRequest) -> ServiceResult<Leave> {
        let plan = request.validate()?;
        let leave = sqlx::query_as::<_, Leave>(
            "INSERT INTO leaves (id, student_id, start_date, end_date, reason, attachment)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(student.id)
        .bind(plan.start)
        .bind(plan.end)
        .bind(&plan.reason)
        .bind(&plan.attachment)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!("Leave {} requested by {} ({} to {})", leave.id, student.login_id(), plan.start, plan.end);
        Ok(leave)
    }

    pub async fn mine(&self, student_id: Uuid) -> ServiceResult<Vec<Leave>> {
        Ok(sqlx::query_as::<_, Leave>(
            "SELECT * FROM leaves WHERE student_id = $1 ORDER BY created_at DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Leaves in `status` for the reviewer's class; pending ones come oldest first.
    pub async fn by_status(&self, reviewer: &User, status: LeaveStatus) -> ServiceResult<Vec<LeaveEntry>> {
        let class = review_scope(reviewer)?;
        let order = match status {
            LeaveStatus::Pending => "l.created_at ASC",
            _ => "l.updated_at DESC",
        };
        Ok(sqlx::query_as::<_, LeaveEntry>(&format!(
            "SELECT l.*, s.name AS student_name, s.roll_number, s.department, s.year, s.section,
                    r.name AS approved_by_name
             FROM leaves l
             JOIN users s ON s.id = l.student_id
             LEFT JOIN users r ON r.id = l.approved_by
             WHERE l.status = $1
               AND ($2::text IS NULL OR s.department = $2)
               AND ($3::text IS NULL OR s.year = $3)
               AND ($4::text IS NULL OR s.section = $4)
             ORDER BY {}",
            order
        ))
        .bind(status)
        .bind(class.as_ref().map(|c| c.department.clone()))
        .bind(class.as_ref().map(|c| c.year.clone()))
        .bind(class.as_ref().and_then(|c| c.section.clone()))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn decide(&self, reviewer: &User, id: Uuid, decision: LeaveDecision) -> ServiceResult<Leave> {
        let rejection_reason = match decision.status {
            LeaveStatus::Rejected => Some(
                non_blank(decision.rejection_reason.as_deref())
                    .ok_or_else(|| ServiceError::invalid("Rejection reason is required"))?,
            ),
            _ => None,
        };

        let student = sqlx::query_as::<_, User>(
            "SELECT s.* FROM leaves l JOIN users s ON s.id = l.student_id WHERE l.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Leave request not found"))?;
        ensure_reviewable(review_scope(reviewer)?.as_ref(), &student)?;

        let leave = sqlx::query_as::<_, Leave>(
            "UPDATE leaves
             SET status = $2, rejection_reason = COALESCE($3, rejection_reason),
                 approved_by = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(decision.status)
        .bind(rejection_reason)
        .bind(reviewer.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Leave request not found"))?;

        tracing::info!("Leave {} set to {} by {}", leave.id, leave.status, reviewer.name);
        Ok(leave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn request(start: &str, end: &str, reason: &str) -> LeaveRequest {
        LeaveRequest {
            start_date: Some(start.into()),
            end_date: Some(end.into()),
            reason: Some(reason.into()),
            attachment: None,
        }
    }

    #[test]
    fn accepts_single_day_leave() {
        let plan = request("2024-05-02", "2024-05-02", "Fever").validate().unwrap();
        assert_eq!(plan.start, plan.end);
        assert_eq!(plan.reason, "Fever");
    }

    #[test]
    fn rejects_reversed_range() {
        assert!(matches!(
            request("2024-05-03", "2024-05-02", "Fever").validate(),
            Err(ServiceError::Invalid(_))
        ));
    }

    #[test]
    fn requires_reason_and_dates() {
        assert!(matches!(
            request("2024-05-02", "2024-05-02", "  ").validate(),
            Err(ServiceError::Field { field: "reason", .. })
        ));
        let missing = LeaveRequest { end_date: None, ..request("2024-05-02", "x", "r") };
        assert!(matches!(missing.validate(), Err(ServiceError::Field { field: "endDate", .. })));
    }

    fn advisor_of(class: ClassRef) -> User {
        User {
            is_faculty_advisor: true,
            advisor_department: Some(class.department),
            advisor_year: Some(class.year),
            advisor_section: class.section,
            ..fixtures::staff("Meena")
        }
    }

    #[test]
    fn advisor_reviews_only_own_class() {
        let advisor = advisor_of(ClassRef::new("CS", "2", Some("A".into())));
        let scope = review_scope(&advisor).unwrap();

        let own = fixtures::student("Anu", "1", ClassRef::new("CS", "2", Some("A".into())));
        assert!(ensure_reviewable(scope.as_ref(), &own).is_ok());

        let other = fixtures::student("Bala", "7", ClassRef::new("EE", "2", Some("A".into())));
        assert!(matches!(
            ensure_reviewable(scope.as_ref(), &other),
            Err(ServiceError::Forbidden(_))
        ));

        let other_section = fixtures::student("Chitra", "9", ClassRef::new("CS", "2", Some("B".into())));
        assert!(ensure_reviewable(scope.as_ref(), &other_section).is_err());
    }

    #[test]
    fn superadmin_reviews_everyone_and_plain_staff_nobody() {
        let mut principal = fixtures::staff("Principal");
        principal.role = Role::Superadmin;
        assert_eq!(review_scope(&principal).unwrap(), None);
        let anyone = fixtures::student("Bala", "7", ClassRef::new("EE", "3", None));
        assert!(ensure_reviewable(None, &anyone).is_ok());

        let flagged_without_class = User { is_faculty_advisor: true, ..fixtures::staff("Kumar") };
        assert!(matches!(review_scope(&flagged_without_class), Err(ServiceError::Forbidden(_))));
    }
}
