use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::user_service::{profile_view, UserService};
use super::{non_blank, require_text, ServiceError, ServiceResult};
use crate::auth::password;
use crate::database::models::{Role, SessionStatus, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::types::{campus_offset, campus_today, ClassRef};

/// Whose staff an administrator may manage.
#[derive(Debug, Clone, PartialEq)]
pub enum StaffScope {
    /// A HOD manages the staff they created, in their department.
    Department { hod_id: Uuid, department: String },
    /// The super-admin manages every staff and admin account.
    Institution,
}

impl StaffScope {
    pub fn for_user(user: &User) -> ServiceResult<Self> {
        match user.role {
            Role::Superadmin => Ok(StaffScope::Institution),
            Role::Hod => {
                let department = non_blank(user.assigned_department.as_deref())
                    .ok_or_else(|| ServiceError::invalid("HOD not assigned to any department"))?;
                Ok(StaffScope::Department { hod_id: user.id, department })
            }
            _ => Err(ServiceError::forbidden("Not authorized to manage staff")),
        }
    }

    fn manager(&self) -> Option<Uuid> {
        match self {
            StaffScope::Department { hod_id, .. } => Some(*hod_id),
            StaffScope::Institution => None,
        }
    }

    fn roles(&self) -> Vec<Role> {
        match self {
            StaffScope::Department { .. } => vec![Role::Staff],
            StaffScope::Institution => vec![Role::Staff, Role::Admin],
        }
    }

    fn not_found(&self) -> ServiceError {
        match self {
            StaffScope::Department { .. } => ServiceError::not_found("Staff not found or not managed by you"),
            StaffScope::Institution => ServiceError::not_found("Staff not found"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStaff {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub staff_id: Option<String>,
    pub password: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHod {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub assigned_department: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub staff_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorAssignment {
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    /// Defaults to assigning.
    pub is_faculty_advisor: Option<bool>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionBrief {
    #[serde(skip)]
    pub staff_id: Uuid,
    pub department: String,
    pub year: String,
    pub section: Option<String>,
    pub period: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
}

/// Bounds of the current campus day in UTC.
fn today_bounds() -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = campus_offset();
    let start = campus_today()
        .and_hms_opt(0, 0, 0)
        .and_then(|t| t.and_local_timezone(offset).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    (start, start + Duration::days(1))
}

pub fn with_sessions(user: &User, sessions: &[SessionBrief]) -> Value {
    let mut view = profile_view(user);
    let todays: Vec<&SessionBrief> = sessions.iter().filter(|s| s.staff_id == user.id).collect();
    view["todaysSessions"] = json!(todays);
    view
}

pub struct StaffService {
    pool: PgPool,
}

impl StaffService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self { pool: DatabaseManager::pool()? })
    }

    async fn find_in_scope(&self, scope: &StaffScope, id: Uuid) -> ServiceResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE id = $1 AND role = ANY($2)
               AND ($3::uuid IS NULL OR managed_by = $3)",
        )
        .bind(id)
        .bind(scope.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>())
        .bind(scope.manager())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| scope.not_found())
    }

    async fn find_hod(&self, id: Uuid) -> ServiceResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND role = 'hod'")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("HOD not found"))
    }

    async fn email_or_id_taken(&self, email: &str, staff_id: Option<&str>, except: Option<Uuid>) -> ServiceResult<bool> {
        let (taken,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM users
                WHERE (LOWER(email) = LOWER($1) OR ($2::text IS NOT NULL AND staff_id = $2))
                  AND ($3::uuid IS NULL OR id <> $3))",
        )
        .bind(email)
        .bind(staff_id)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    /// Staff in scope, each with the sessions they started today.
    pub async fn list_staff(&self, scope: &StaffScope) -> ServiceResult<Vec<Value>> {
        let department = match scope {
            StaffScope::Department { department, .. } => Some(department.clone()),
            StaffScope::Institution => None,
        };
        let staff = sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE role = ANY($1)
               AND ($2::uuid IS NULL OR managed_by = $2)
               AND ($3::text IS NULL OR department = $3)
             ORDER BY name",
        )
        .bind(scope.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>())
        .bind(scope.manager())
        .bind(department)
        .fetch_all(&self.pool)
        .await?;

        let (start, end) = today_bounds();
        let sessions = sqlx::query_as::<_, SessionBrief>(
            "SELECT staff_id, department, year, section, period, status, start_time
             FROM attendance_sessions
             WHERE start_time >= $1 AND start_time < $2
             ORDER BY start_time",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(staff.iter().map(|s| with_sessions(s, &sessions)).collect())
    }

    pub async fn create_staff(&self, scope: &StaffScope, request: NewStaff) -> ServiceResult<User> {
        let name = require_text(request.name.as_deref(), "name")?;
        let email = require_text(request.email.as_deref(), "email")?;
        let staff_id = require_text(request.staff_id.as_deref(), "staffId")?;
        let raw_password = require_text(request.password.as_deref(), "password")?;
        password::validate_new_password(&raw_password)?;

        if self.email_or_id_taken(&email, Some(&staff_id), None).await? {
            return Err(ServiceError::conflict("Staff with this email or ID already exists"));
        }

        let department = match scope {
            StaffScope::Department { department, .. } => Some(department.clone()),
            StaffScope::Institution => non_blank(request.department.as_deref()),
        };

        let hash = password::hash_password_async(raw_password).await?;
        let created = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, phone, role, password_hash, staff_id, department, managed_by)
             VALUES ($1, $2, $3, $4, 'staff', $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(&email)
        .bind(non_blank(request.phone.as_deref()))
        .bind(&hash)
        .bind(&staff_id)
        .bind(department)
        .bind(scope.manager())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Staff {} ({}) created", created.name, staff_id);
        Ok(created)
    }

    pub async fn update_staff(&self, scope: &StaffScope, id: Uuid, update: AccountUpdate) -> ServiceResult<User> {
        self.find_in_scope(scope, id).await?;
        self.update_account(id, update).await
    }

    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> ServiceResult<User> {
        let email = non_blank(update.email.as_deref());
        let staff_id = non_blank(update.staff_id.as_deref());
        if let Some(email) = &email {
            if self.email_or_id_taken(email, staff_id.as_deref(), Some(id)).await? {
                return Err(ServiceError::conflict("Email or staff ID already in use"));
            }
        }
        Ok(sqlx::query_as::<_, User>(
            "UPDATE users SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                staff_id = COALESCE($5, staff_id),
                updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(non_blank(update.name.as_deref()))
        .bind(email)
        .bind(non_blank(update.phone.as_deref()))
        .bind(staff_id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn delete_staff(&self, scope: &StaffScope, id: Uuid) -> ServiceResult<User> {
        let staff = self.find_in_scope(scope, id).await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Staff {} removed", staff.name);
        Ok(staff)
    }

    pub async fn reset_staff_password(&self, scope: &StaffScope, id: Uuid, new_password: Option<&str>) -> ServiceResult<User> {
        let staff = self.find_in_scope(scope, id).await?;
        self.set_password(&staff, new_password).await?;
        Ok(staff)
    }

    async fn set_password(&self, user: &User, new_password: Option<&str>) -> ServiceResult<()> {
        let new_password = new_password.unwrap_or_default();
        password::validate_new_password(new_password)?;
        UserService::with_pool(self.pool.clone())
            .reset_password(user.id, new_password)
            .await
    }

    /// Makes a staff member the advisor of a class, or clears the role.
    /// A class has at most one advisor.
    pub async fn assign_advisor(
        &self,
        scope: &StaffScope,
        id: Uuid,
        assignment: AdvisorAssignment,
    ) -> ServiceResult<User> {
        let staff = self.find_in_scope(scope, id).await?;
        if assignment.is_faculty_advisor == Some(false) {
            return self.remove_advisor(scope, staff.id).await;
        }

        let department = match scope {
            StaffScope::Department { department, .. } => Some(department.clone()),
            StaffScope::Institution => non_blank(assignment.department.as_deref()),
        };
        let class = ClassRef::from_parts(
            department.as_deref(),
            assignment.year.as_deref(),
            assignment.section.as_deref(),
        )
        .ok_or_else(|| ServiceError::invalid("Department and year are required"))?;

        let holder: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM users
             WHERE is_faculty_advisor AND advisor_department = $1 AND advisor_year = $2
               AND advisor_section IS NOT DISTINCT FROM $3 AND id <> $4
             LIMIT 1",
        )
        .bind(&class.department)
        .bind(&class.year)
        .bind(&class.section)
        .bind(staff.id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((name,)) = holder {
            return Err(ServiceError::conflict(format!(
                "{} is already the Faculty Advisor for this class",
                name
            )));
        }

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET is_faculty_advisor = TRUE, advisor_department = $2,
                    advisor_year = $3, advisor_section = $4, updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(staff.id)
        .bind(&class.department)
        .bind(&class.year)
        .bind(&class.section)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!("{} is now Faculty Advisor for {}", updated.name, class.label());
        Ok(updated)
    }

    pub async fn remove_advisor(&self, scope: &StaffScope, id: Uuid) -> ServiceResult<User> {
        self.find_in_scope(scope, id).await?;
        Ok(sqlx::query_as::<_, User>(
            "UPDATE users SET is_faculty_advisor = FALSE, advisor_department = NULL,
                    advisor_year = NULL, advisor_section = NULL, updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn department_stats(&self, hod: &User) -> ServiceResult<Value> {
        let StaffScope::Department { hod_id, department } = StaffScope::for_user(hod)? else {
            return Err(ServiceError::forbidden("Not a HOD"));
        };
        let (total_staff, advisors): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_faculty_advisor)
             FROM users WHERE role = 'staff' AND department = $1 AND managed_by = $2",
        )
        .bind(&department)
        .bind(hod_id)
        .fetch_one(&self.pool)
        .await?;
        let (total_students,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users WHERE role = 'student' AND department = $1",
        )
        .bind(&department)
        .fetch_one(&self.pool)
        .await?;
        let years: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT year FROM users
             WHERE role = 'student' AND department = $1 AND year IS NOT NULL
             ORDER BY year",
        )
        .bind(&department)
        .fetch_all(&self.pool)
        .await?;

        Ok(json!({
            "department": department,
            "totalStaff": total_staff,
            "totalStudents": total_students,
            "facultyAdvisors": advisors,
            "years": years.into_iter().map(|(y,)| y).collect::<Vec<_>>(),
        }))
    }

    pub async fn department_students(&self, hod: &User) -> ServiceResult<Vec<Value>> {
        let StaffScope::Department { department, .. } = StaffScope::for_user(hod)? else {
            return Err(ServiceError::forbidden("Not a HOD"));
        };
        let students = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE role = 'student' AND department = $1
             ORDER BY year, section, roll_number",
        )
        .bind(&department)
        .fetch_all(&self.pool)
        .await?;
        Ok(students.iter().map(profile_view).collect())
    }

    pub async fn institution_stats(&self) -> ServiceResult<Value> {
        let (students, staff, hods, advisors): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) FILTER (WHERE role = 'student'),
                    COUNT(*) FILTER (WHERE role IN ('staff', 'admin')),
                    COUNT(*) FILTER (WHERE role = 'hod'),
                    COUNT(*) FILTER (WHERE is_faculty_advisor)
             FROM users",
        )
        .fetch_one(&self.pool)
        .await?;
        let departments: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT department FROM users
             WHERE role = 'student' AND department IS NOT NULL AND department <> ''
             ORDER BY department",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(json!({
            "totalStudents": students,
            "totalStaff": staff,
            "totalHODs": hods,
            "facultyAdvisors": advisors,
            "departments": departments.into_iter().map(|(d,)| d).collect::<Vec<_>>(),
        }))
    }

    // HOD accounts

    pub async fn list_hods(&self) -> ServiceResult<Vec<Value>> {
        let hods = sqlx::query_as::<_, User>("SELECT * FROM users WHERE role = 'hod' ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(hods.len());
        for hod in &hods {
            let (staff_count, student_count): (i64, i64) = sqlx::query_as(
                "SELECT
                    (SELECT COUNT(*) FROM users WHERE role = 'staff' AND managed_by = $1),
                    (SELECT COUNT(*) FROM users WHERE role = 'student' AND $2::text IS NOT NULL AND department = $2)",
            )
            .bind(hod.id)
            .bind(&hod.assigned_department)
            .fetch_one(&self.pool)
            .await?;
            let mut view = profile_view(hod);
            view["staffCount"] = json!(staff_count);
            view["studentCount"] = json!(student_count);
            out.push(view);
        }
        Ok(out)
    }

    async fn department_head(&self, department: &str, except: Option<Uuid>) -> ServiceResult<Option<String>> {
        let holder: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM users
             WHERE role = 'hod' AND assigned_department = $1 AND ($2::uuid IS NULL OR id <> $2)
             LIMIT 1",
        )
        .bind(department)
        .bind(except)
        .fetch_optional(&self.pool)
        .await?;
        Ok(holder.map(|(name,)| name))
    }

    pub async fn create_hod(&self, request: NewHod) -> ServiceResult<User> {
        let name = require_text(request.name.as_deref(), "name")?;
        let email = require_text(request.email.as_deref(), "email")?;
        let raw_password = require_text(request.password.as_deref(), "password")?;
        let department = require_text(request.assigned_department.as_deref(), "assignedDepartment")?;
        password::validate_new_password(&raw_password)?;

        if self.email_or_id_taken(&email, None, None).await? {
            return Err(ServiceError::conflict("User with this email already exists"));
        }
        if let Some(holder) = self.department_head(&department, None).await? {
            return Err(ServiceError::conflict(format!(
                "{} is already HOD for {} department",
                holder, department
            )));
        }

        let hash = password::hash_password_async(raw_password).await?;
        let hod = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, phone, role, password_hash, assigned_department)
             VALUES ($1, $2, $3, $4, 'hod', $5, $6)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(&email)
        .bind(non_blank(request.phone.as_deref()))
        .bind(&hash)
        .bind(&department)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!("HOD {} created for {}", hod.name, department);
        Ok(hod)
    }

    pub async fn update_hod(&self, id: Uuid, update: AccountUpdate) -> ServiceResult<User> {
        self.find_hod(id).await?;
        self.update_account(id, AccountUpdate { staff_id: None, ..update }).await
    }

    /// Refuses while the HOD still manages staff.
    pub async fn delete_hod(&self, id: Uuid) -> ServiceResult<User> {
        let hod = self.find_hod(id).await?;
        let (managed,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'staff' AND managed_by = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if managed > 0 {
            return Err(ServiceError::invalid(format!(
                "Cannot delete HOD. {} staff members are managed by this HOD. Please reassign or delete them first.",
                managed
            )));
        }
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(hod)
    }

    pub async fn reset_hod_password(&self, id: Uuid, new_password: Option<&str>) -> ServiceResult<User> {
        let hod = self.find_hod(id).await?;
        self.set_password(&hod, new_password).await?;
        Ok(hod)
    }

    pub async fn assign_department(&self, id: Uuid, department: Option<&str>) -> ServiceResult<User> {
        let department = non_blank(department).ok_or_else(|| ServiceError::invalid("Department is required"))?;
        self.find_hod(id).await?;
        if let Some(holder) = self.department_head(&department, Some(id)).await? {
            return Err(ServiceError::conflict(format!(
                "{} is already HOD for {} department",
                holder, department
            )));
        }
        Ok(sqlx::query_as::<_, User>(
            "UPDATE users SET assigned_department = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&department)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn scope_by_role() {
        let mut hod = fixtures::staff("Head");
        hod.role = Role::Hod;
        assert!(StaffScope::for_user(&hod).is_err());

        hod.assigned_department = Some("CS".into());
        assert_eq!(
            StaffScope::for_user(&hod).unwrap(),
            StaffScope::Department { hod_id: hod.id, department: "CS".into() }
        );

        let mut principal = fixtures::staff("Principal");
        principal.role = Role::Superadmin;
        assert_eq!(StaffScope::for_user(&principal).unwrap(), StaffScope::Institution);

        assert!(matches!(
            StaffScope::for_user(&fixtures::staff("Plain")),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn hod_scope_limits_roles_and_manager() {
        let id = Uuid::new_v4();
        let scope = StaffScope::Department { hod_id: id, department: "EE".into() };
        assert_eq!(scope.manager(), Some(id));
        assert_eq!(scope.roles(), vec![Role::Staff]);
        assert_eq!(StaffScope::Institution.roles(), vec![Role::Staff, Role::Admin]);
    }

    #[test]
    fn staff_view_carries_only_own_sessions() {
        let staff = fixtures::staff("Kala");
        let brief = |owner| SessionBrief {
            staff_id: owner,
            department: "CS".into(),
            year: "1".into(),
            section: None,
            period: "P1".into(),
            status: SessionStatus::Active,
            start_time: Utc::now(),
        };
        let view = with_sessions(&staff, &[brief(staff.id), brief(Uuid::new_v4())]);
        assert_eq!(view["todaysSessions"].as_array().unwrap().len(), 1);
        assert!(view["todaysSessions"][0].get("staffId").is_none());
    }
}
