use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::user_service::{ProfileUpdate, UserService};
use super::{non_blank, ServiceError, ServiceResult};
use crate::auth::password;
use crate::config::config;
use crate::database::models::{PendingPhotoUpdate, Role, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::verification::face::{self, FaceDescriptor};

/// Profile completion: bio data plus the face the student registers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteProfile {
    #[serde(flatten)]
    pub profile: ProfileUpdate,
    pub face_descriptor: Option<FaceDescriptor>,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpdate {
    pub new_face_descriptor: Option<FaceDescriptor>,
    pub new_profile_photo: Option<String>,
    #[serde(default)]
    pub force_request: bool,
}

#[derive(Debug)]
pub enum PhotoOutcome {
    /// Sent to staff for approval.
    Pending,
    Updated(User),
}

/// The reply to a failed photo-change face check.
pub fn photo_attempt_failure(attempts: i32, max_attempts: i32) -> ServiceError {
    let exhausted = attempts >= max_attempts;
    let message = if exhausted {
        format!(
            "Face verification failed {} times. You can now request admin approval.",
            attempts
        )
    } else {
        format!(
            "Face doesn't match your registered photo. Attempt {}/{}.",
            attempts, max_attempts
        )
    };
    ServiceError::Detailed {
        status: StatusCode::BAD_REQUEST,
        message,
        details: json!({ "failedAttempts": attempts, "canRequestApproval": exhausted }),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub name: Option<String>,
    pub roll_number: Option<String>,
    pub register_number: Option<String>,
    pub email: Option<String>,
    pub dob: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub phone: Option<String>,
    pub parent_phone: Option<String>,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub profile_photo: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileUpdate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub department: Option<String>,
    pub from_year: Option<String>,
    pub to_year: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: Uuid,
    pub name: String,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PendingPhotoRequest {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub student: StudentSummary,
    pub pending_photo_update: Json<PendingPhotoUpdate>,
}

pub struct StudentService {
    pool: PgPool,
}

impl StudentService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self { pool: DatabaseManager::pool()? })
    }

    fn users(&self) -> UserService {
        UserService::with_pool(self.pool.clone())
    }

    /// A student account by id; other roles are reported as missing.
    pub async fn get_student(&self, id: Uuid) -> ServiceResult<User> {
        self.users()
            .find_by_id(id)
            .await?
            .filter(|u| u.role == Role::Student)
            .ok_or_else(|| ServiceError::not_found("Student not found"))
    }

    /// Closest other registered face under the duplicate threshold.
    async fn ensure_unique_face(&self, owner: Uuid, descriptor: &[f64]) -> ServiceResult<()> {
        let others: Vec<(String, Vec<f64>)> = sqlx::query_as(
            "SELECT name, face_embedding FROM users
             WHERE id <> $1 AND cardinality(face_embedding) > 0",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let threshold = config().attendance.duplicate_face_threshold;
        let duplicate = face::find_duplicate(
            descriptor,
            others.iter().map(|(name, emb)| (name.as_str(), emb.as_slice())),
            threshold,
        );
        if let Some(dup) = duplicate {
            tracing::warn!("Duplicate face for {} (distance {:.3})", owner, dup.distance);
            return Err(ServiceError::invalid(format!(
                "This face is already registered to another student ({}). Please use your own photo.",
                dup.key
            )));
        }
        Ok(())
    }

    // Self-service

    pub async fn update_profile(&self, student: &User, update: &ProfileUpdate) -> ServiceResult<User> {
        if student.is_profile_complete && !student.can_edit_profile {
            return Err(ServiceError::forbidden(
                "Profile editing is disabled. Contact your Faculty Advisor to enable editing.",
            ));
        }
        self.users().apply_profile(student, &update.student_subset()).await
    }

    pub async fn complete_profile(&self, student: &User, request: CompleteProfile) -> ServiceResult<User> {
        let face = request.face_descriptor.filter(|d| !d.is_empty());
        if let Some(descriptor) = &face {
            self.ensure_unique_face(student.id, descriptor.as_slice()).await?;
        }

        let mut bio = student.bio_data.0.clone();
        request.profile.apply_bio(&mut bio);

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET
                bio_data = $2,
                phone = COALESCE($3, phone),
                parent_phone = COALESCE($4, parent_phone),
                face_embedding = COALESCE($5, face_embedding),
                profile_photo = COALESCE($6, profile_photo),
                is_profile_complete = TRUE,
                can_edit_profile = FALSE,
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(student.id)
        .bind(Json(bio))
        .bind(&request.profile.phone)
        .bind(&request.profile.parent_phone)
        .bind(face.map(FaceDescriptor::into_vec))
        .bind(non_blank(request.profile_photo.as_deref()))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Profile completed for {}", updated.login_id());
        Ok(updated)
    }

    pub async fn update_photo(&self, student: &User, request: PhotoUpdate) -> ServiceResult<PhotoOutcome> {
        if !student.can_update_photo {
            return Err(ServiceError::Detailed {
                status: StatusCode::FORBIDDEN,
                message: "Photo update is not enabled. Please contact your Faculty Advisor.".to_string(),
                details: json!({ "needsAdminApproval": true }),
            });
        }

        let descriptor = request.new_face_descriptor.filter(|d| !d.is_empty());

        if request.force_request {
            let pending = PendingPhotoUpdate {
                photo: request.new_profile_photo,
                face_descriptor: descriptor.map(FaceDescriptor::into_vec).unwrap_or_default(),
                requested_at: Utc::now(),
                reason: "Face verification failed multiple times".to_string(),
            };
            sqlx::query("UPDATE users SET pending_photo_update = $2, updated_at = NOW() WHERE id = $1")
                .bind(student.id)
                .bind(Json(pending))
                .execute(&self.pool)
                .await?;
            tracing::info!("Photo change request queued for {}", student.login_id());
            return Ok(PhotoOutcome::Pending);
        }

        if !student.has_face() {
            return Err(ServiceError::invalid(
                "No existing face data. Contact admin to register your photo.",
            ));
        }
        let descriptor = descriptor.ok_or_else(|| ServiceError::invalid("New face descriptor is required."))?;

        let settings = &config().attendance;
        let distance = face::euclidean_distance(descriptor.as_slice(), &student.face_embedding);
        if distance >= settings.photo_update_threshold {
            let (attempts,): (i32,) = sqlx::query_as(
                "UPDATE users SET photo_update_failed_attempts = photo_update_failed_attempts + 1
                 WHERE id = $1
                 RETURNING photo_update_failed_attempts",
            )
            .bind(student.id)
            .fetch_one(&self.pool)
            .await?;
            return Err(photo_attempt_failure(attempts, settings.photo_update_max_attempts));
        }

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET
                face_embedding = $2,
                profile_photo = COALESCE($3, profile_photo),
                can_update_photo = FALSE,
                photo_update_failed_attempts = 0,
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(student.id)
        .bind(descriptor.into_vec())
        .bind(non_blank(request.new_profile_photo.as_deref()))
        .fetch_one(&self.pool)
        .await?;
        Ok(PhotoOutcome::Updated(updated))
    }

    // Staff administration

    pub async fn add(&self, student: NewStudent) -> ServiceResult<User> {
        let name = super::require_text(student.name.as_deref(), "name")?;
        let roll_number = super::require_text(student.roll_number.as_deref(), "rollNumber")?;
        let email = super::require_text(student.email.as_deref(), "email")?;
        let department = super::require_text(student.department.as_deref(), "department")?;
        let year = super::require_text(student.year.as_deref(), "year")?;
        let dob_raw = super::require_text(student.dob.as_deref(), "dob")?;
        let dob = password::parse_dob(&dob_raw).ok_or_else(|| ServiceError::Field {
            field: "dob",
            problem: "Expected YYYY-MM-DD or DD-MM-YYYY".to_string(),
        })?;

        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) OR roll_number = $2)",
        )
        .bind(&email)
        .bind(&roll_number)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            return Err(ServiceError::conflict("User already exists (Email or Roll No)"));
        }

        let hash = password::hash_password_async(password::dob_password(dob)).await?;
        let created = sqlx::query_as::<_, User>(
            "INSERT INTO users
                (id, name, email, phone, role, password_hash, roll_number, register_number,
                 department, year, section, dob, parent_phone, profile_photo, can_edit_profile)
             VALUES ($1, $2, $3, $4, 'student', $5, $6, $7, $8, $9, $10, $11, $12, $13, FALSE)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(&email)
        .bind(non_blank(student.phone.as_deref()))
        .bind(hash)
        .bind(&roll_number)
        .bind(non_blank(student.register_number.as_deref()))
        .bind(&department)
        .bind(&year)
        .bind(non_blank(student.section.as_deref()))
        .bind(dob)
        .bind(non_blank(student.parent_phone.as_deref()))
        .bind(non_blank(student.profile_photo.as_deref()))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Student {} ({}) added", created.name, roll_number);
        Ok(created)
    }

    /// Every student, or only the advisor's class for a faculty advisor.
    pub async fn list(&self, caller: &User) -> ServiceResult<Vec<User>> {
        if let Some(class) = caller.advisor_class() {
            return Ok(self.users().class_roster(&class).await?);
        }
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE role = 'student' ORDER BY department, year, section, roll_number",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn update(&self, id: Uuid, update: StudentUpdate) -> ServiceResult<User> {
        let student = self.get_student(id).await?;
        let mut bio = student.bio_data.0.clone();
        update.profile.apply_bio(&mut bio);

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                department = COALESCE($5, department),
                year = COALESCE($6, year),
                section = COALESCE($7, section),
                parent_phone = COALESCE($8, parent_phone),
                profile_photo = COALESCE($9, profile_photo),
                bio_data = $10,
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(non_blank(update.name.as_deref()))
        .bind(non_blank(update.email.as_deref()))
        .bind(non_blank(update.profile.phone.as_deref()))
        .bind(non_blank(update.department.as_deref()))
        .bind(non_blank(update.year.as_deref()))
        .bind(non_blank(update.section.as_deref()))
        .bind(non_blank(update.profile.parent_phone.as_deref()))
        .bind(update.profile_photo.as_deref())
        .bind(Json(bio))
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        let user = self
            .users()
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Student not found"))?;
        if user.role != Role::Student {
            return Err(ServiceError::forbidden(
                "Cannot delete non-student accounts via this endpoint",
            ));
        }
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Student {} removed", user.login_id());
        Ok(())
    }

    /// Name or roll number lookup, case-insensitive, at most 10 hits.
    pub async fn search(&self, query: &str) -> ServiceResult<Vec<StudentSummary>> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Ok(Vec::new());
        }
        Ok(sqlx::query_as::<_, StudentSummary>(
            "SELECT id, name, roll_number, department, year, section, profile_photo
             FROM users
             WHERE role = 'student'
               AND (name ILIKE $1 ESCAPE '\\' OR roll_number ILIKE $1 ESCAPE '\\')
             ORDER BY roll_number
             LIMIT 10",
        )
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn promote(&self, promotion: Promotion) -> ServiceResult<u64> {
        let (Some(from), Some(to)) = (
            non_blank(promotion.from_year.as_deref()),
            non_blank(promotion.to_year.as_deref()),
        ) else {
            return Err(ServiceError::invalid("fromYear and toYear are required"));
        };
        let result = sqlx::query(
            "UPDATE users SET year = $2, updated_at = NOW()
             WHERE role = 'student' AND year = $1
               AND ($3::text IS NULL OR department = $3)",
        )
        .bind(&from)
        .bind(&to)
        .bind(non_blank(promotion.department.as_deref()))
        .execute(&self.pool)
        .await?;
        tracing::info!("Promoted {} students from {} to {}", result.rows_affected(), from, to);
        Ok(result.rows_affected())
    }

    /// Resets the password to the date of birth; returns the new password.
    pub async fn reset_password(&self, id: Uuid) -> ServiceResult<String> {
        let student = self.get_student(id).await?;
        let dob = student
            .dob
            .ok_or_else(|| ServiceError::invalid("Student DOB not set, cannot reset password."))?;
        let new_password = password::dob_password(dob);
        self.users().reset_password(student.id, &new_password).await?;
        Ok(new_password)
    }

    pub async fn toggle_edit_permission(&self, id: Uuid) -> ServiceResult<User> {
        self.get_student(id).await?;
        Ok(sqlx::query_as::<_, User>(
            "UPDATE users SET can_edit_profile = NOT can_edit_profile, updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn toggle_photo_permission(&self, id: Uuid) -> ServiceResult<User> {
        self.get_student(id).await?;
        Ok(sqlx::query_as::<_, User>(
            "UPDATE users SET can_update_photo = NOT can_update_photo, updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Sets photo permission for every student at once.
    pub async fn set_photo_permission_all(&self, enabled: bool) -> ServiceResult<u64> {
        let result = sqlx::query(
            "UPDATE users SET can_update_photo = $1, updated_at = NOW()
             WHERE role = 'student' AND can_update_photo <> $1",
        )
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn register_face(
        &self,
        id: Uuid,
        descriptor: FaceDescriptor,
        photo: Option<String>,
    ) -> ServiceResult<User> {
        if descriptor.is_empty() {
            return Err(ServiceError::invalid("Face descriptor array is required"));
        }
        let student = self.get_student(id).await?;
        self.ensure_unique_face(student.id, descriptor.as_slice()).await?;

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET face_embedding = $2, profile_photo = COALESCE($3, profile_photo),
                    updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(descriptor.into_vec())
        .bind(non_blank(photo.as_deref()))
        .fetch_one(&self.pool)
        .await?;
        tracing::info!("Face registered for {}", updated.login_id());
        Ok(updated)
    }

    pub async fn pending_photos(&self) -> ServiceResult<Vec<PendingPhotoRequest>> {
        Ok(sqlx::query_as::<_, PendingPhotoRequest>(
            "SELECT id, name, roll_number, department, year, section, profile_photo, pending_photo_update
             FROM users
             WHERE role = 'student' AND pending_photo_update IS NOT NULL
             ORDER BY pending_photo_update->>'requestedAt'",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Applies or discards a pending photo change.
    pub async fn decide_photo(&self, id: Uuid, approve: bool) -> ServiceResult<User> {
        let student = self.get_student(id).await?;
        let pending = student
            .pending_photo_update
            .as_ref()
            .map(|p| p.0.clone())
            .ok_or_else(|| ServiceError::invalid("No pending photo request for this student"))?;

        let (face, photo) = if approve {
            (Some(pending.face_descriptor), pending.photo)
        } else {
            (None, None)
        };

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET
                face_embedding = COALESCE($2, face_embedding),
                profile_photo = COALESCE($3, profile_photo),
                can_update_photo = CASE WHEN $4 THEN FALSE ELSE can_update_photo END,
                pending_photo_update = NULL,
                photo_update_failed_attempts = 0,
                updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(face.filter(|f| !f.is_empty()))
        .bind(photo)
        .bind(approve)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!(
            "Photo change for {} {}",
            updated.login_id(),
            if approve { "approved" } else { "rejected" }
        );
        Ok(updated)
    }

    pub async fn my_class(&self, advisor: &User) -> ServiceResult<Vec<User>> {
        let class = advisor
            .advisor_class()
            .ok_or_else(|| ServiceError::forbidden("Not a Faculty Advisor"))?;
        Ok(self.users().class_roster(&class).await?)
    }
}

/// `%query%` with LIKE wildcards in the input escaped.
pub fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Response body of a permission toggle.
pub fn permission_message(kind: &str, enabled: bool, name: &str) -> Value {
    json!({
        "message": format!("{} permission {} for {}", kind, if enabled { "enabled" } else { "disabled" }, name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ab"), "%ab%");
        assert_eq!(like_pattern("5%_x\\"), "%5\\%\\_x\\\\%");
    }

    #[test]
    fn photo_failures_unlock_approval_at_limit() {
        match photo_attempt_failure(2, 4) {
            ServiceError::Detailed { status, message, details } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(message.contains("Attempt 2/4"));
                assert_eq!(details["canRequestApproval"], false);
            }
            other => panic!("unexpected {:?}", other),
        }
        match photo_attempt_failure(4, 4) {
            ServiceError::Detailed { details, .. } => {
                assert_eq!(details["canRequestApproval"], true);
                assert_eq!(details["failedAttempts"], 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn complete_profile_body_parses() {
        let body = json!({
            "address": "12 Lake Rd",
            "bloodGroup": "B+",
            "parentPhone": "9000000000",
            "faceDescriptor": [0.1, 0.2],
            "profilePhoto": "data:image/png;base64,AAA"
        });
        let request: CompleteProfile = serde_json::from_value(body).unwrap();
        assert_eq!(request.profile.address.as_deref(), Some("12 Lake Rd"));
        assert_eq!(request.profile.blood_group.as_deref(), Some("B+"));
        assert_eq!(request.face_descriptor.unwrap().as_slice(), &[0.1, 0.2]);
    }

    #[test]
    fn permission_message_wording() {
        let body = permission_message("Edit", true, "Asha");
        assert_eq!(body["message"], "Edit permission enabled for Asha");
    }
}
