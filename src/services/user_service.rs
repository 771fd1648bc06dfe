use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::auth::{self, password, AuthError, Claims};
use crate::database::models::{BioData, Role, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::types::ClassRef;

/// Contact and bio fields a user may change about themselves.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub phone: Option<String>,
    pub parent_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub blood_group: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
    pub emergency_contact: Option<String>,
}

impl ProfileUpdate {
    /// Copies every supplied field onto `bio`; absent fields are left alone.
    pub fn apply_bio(&self, bio: &mut BioData) {
        let set = |slot: &mut Option<String>, value: &Option<String>| {
            if value.is_some() {
                *slot = value.clone();
            }
        };
        set(&mut bio.address, &self.address);
        set(&mut bio.city, &self.city);
        set(&mut bio.state, &self.state);
        set(&mut bio.pincode, &self.pincode);
        set(&mut bio.blood_group, &self.blood_group);
        set(&mut bio.father_name, &self.father_name);
        set(&mut bio.mother_name, &self.mother_name);
        set(&mut bio.emergency_contact, &self.emergency_contact);
    }

    /// Only the fields a student may edit on an unlocked profile.
    pub fn student_subset(&self) -> ProfileUpdate {
        ProfileUpdate {
            phone: self.phone.clone(),
            parent_phone: self.parent_phone.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            pincode: self.pincode.clone(),
            emergency_contact: self.emergency_contact.clone(),
            ..ProfileUpdate::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub token: String,
    pub user: Value,
}

pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self::with_pool(DatabaseManager::pool()?))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found"))
    }

    /// Username matches a roll number, a staff id or an email.
    pub async fn find_by_login(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE roll_number = $1 OR staff_id = $1 OR LOWER(email) = LOWER($1)
             ORDER BY role = 'student' DESC
             LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn login(&self, username: &str, password_input: &str) -> ServiceResult<LoginOutcome> {
        let user = self
            .find_by_login(username.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !password::verify_password_async(password_input.to_string(), user.password_hash.clone()).await {
            return Err(AuthError::InvalidCredentials.into());
        }

        if !user.is_active {
            return Err(AuthError::Inactive.into());
        }

        let session_token = self.rotate_session_token(user.id).await?;
        let token = auth::generate_jwt(&Claims::new(user.id, user.role, session_token))?;
        tracing::info!("User {} ({}) logged in", user.login_id(), user.role);

        Ok(LoginOutcome {
            token,
            user: login_view(&user),
        })
    }

    /// Replaces the session token, signing out every other device.
    pub async fn rotate_session_token(&self, id: Uuid) -> Result<String, sqlx::Error> {
        let token = auth::new_session_token();
        sqlx::query("UPDATE users SET session_token = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(&token)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    pub async fn change_password(&self, id: Uuid, current: &str, new: &str) -> ServiceResult<()> {
        if current.is_empty() {
            return Err(ServiceError::invalid("Current password is required"));
        }
        password::validate_new_password(new)?;

        let user = self.get(id).await?;
        if !password::verify_password_async(current.to_string(), user.password_hash.clone()).await {
            return Err(ServiceError::Auth(AuthError::InvalidCredentials));
        }

        let hash = password::hash_password_async(new.to_string()).await?;
        sqlx::query(
            "UPDATE users SET password_hash = $2, session_token = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .bind(auth::new_session_token())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sets a password without knowing the old one and signs the user out.
    pub async fn reset_password(&self, id: Uuid, new_password: &str) -> ServiceResult<()> {
        let hash = password::hash_password_async(new_password.to_string()).await?;
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, session_token = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::not_found("User not found"));
        }
        Ok(())
    }

    /// `PUT /api/auth/profile`: students need edit permission.
    pub async fn update_own_profile(&self, user: &User, update: &ProfileUpdate) -> ServiceResult<User> {
        if user.role == Role::Student && !user.can_edit_profile {
            return Err(ServiceError::forbidden("Edit permission not granted. Contact admin."));
        }
        self.apply_profile(user, update).await
    }

    pub(crate) async fn apply_profile(&self, user: &User, update: &ProfileUpdate) -> ServiceResult<User> {
        let mut bio = user.bio_data.0.clone();
        update.apply_bio(&mut bio);

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET
                phone = COALESCE($2, phone),
                parent_phone = COALESCE($3, parent_phone),
                bio_data = $4,
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(user.id)
        .bind(&update.phone)
        .bind(&update.parent_phone)
        .bind(sqlx::types::Json(bio))
        .fetch_one(&self.pool)
        .await?;
        Ok(updated)
    }

    /// Students of a class, ordered by roll number.
    pub async fn class_roster(&self, class: &ClassRef) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE role = 'student' AND department = $1 AND year = $2
               AND ($3::text IS NULL OR section = $3)
             ORDER BY roll_number",
        )
        .bind(&class.department)
        .bind(&class.year)
        .bind(&class.section)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_by_role(&self, role: Role) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = $1")
            .bind(role)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Profile without credentials or the face embedding.
pub fn profile_view(user: &User) -> Value {
    let mut value = serde_json::to_value(user).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.remove("faceEmbedding");
    }
    value
}

/// Fields the client needs right after login, by role.
pub fn login_view(user: &User) -> Value {
    let mut view = json!({
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "role": user.role,
        "canEditProfile": user.can_edit_profile,
    });

    if user.role.is_staff_or_above() {
        view["isFacultyAdvisor"] = json!(user.is_faculty_advisor);
        view["advisorClass"] = json!(user.advisor_class());
    }
    if user.role == Role::Hod {
        view["assignedDepartment"] = json!(user.assigned_department);
    }
    if user.role == Role::Student {
        view["isProfileComplete"] = json!(user.is_profile_complete);
        view["department"] = json!(user.department);
        view["year"] = json!(user.year);
        view["section"] = json!(user.section);
        view["rollNumber"] = json!(user.roll_number);
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn login_view_by_role() {
        let student = fixtures::student("Anu", "12", ClassRef::new("CS", "3", Some("B".into())));
        let view = login_view(&student);
        assert_eq!(view["rollNumber"], "12");
        assert_eq!(view["section"], "B");
        assert!(view.get("isFacultyAdvisor").is_none());

        let mut hod = fixtures::staff("Head");
        hod.role = Role::Hod;
        hod.assigned_department = Some("CS".into());
        let view = login_view(&hod);
        assert_eq!(view["assignedDepartment"], "CS");
        assert_eq!(view["isFacultyAdvisor"], false);
        assert!(view.get("rollNumber").is_none());
    }

    #[test]
    fn profile_view_drops_face() {
        let mut student = fixtures::student("Anu", "12", ClassRef::new("CS", "3", None));
        student.face_embedding = vec![0.1; 4];
        let view = profile_view(&student);
        assert!(view.get("faceEmbedding").is_none());
        assert_eq!(view["name"], "Anu");
    }

    #[test]
    fn profile_update_touches_only_supplied_fields() {
        let mut bio = BioData { city: Some("Madurai".into()), ..BioData::default() };
        let update = ProfileUpdate {
            address: Some("1 Main St".into()),
            blood_group: Some("O+".into()),
            ..ProfileUpdate::default()
        };
        update.apply_bio(&mut bio);
        assert_eq!(bio.city.as_deref(), Some("Madurai"));
        assert_eq!(bio.address.as_deref(), Some("1 Main St"));

        let restricted = update.student_subset();
        assert!(restricted.blood_group.is_none());
        assert_eq!(restricted.address.as_deref(), Some("1 Main St"));
    }
}
