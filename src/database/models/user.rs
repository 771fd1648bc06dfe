use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;
use crate::types::ClassRef;

text_enum! {
    /// Account role. Staff-side privilege grows from `Staff` to `Superadmin`.
    Role {
        Student => "student",
        Staff => "staff",
        Hod => "hod",
        Admin => "admin",
        Superadmin => "superadmin",
    }
}

impl Role {
    pub fn is_staff_or_above(&self) -> bool {
        !matches!(self, Role::Student)
    }

    pub fn is_hod_or_above(&self) -> bool {
        matches!(self, Role::Hod | Role::Admin | Role::Superadmin)
    }
}

/// Student bio data, stored as one JSONB document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BioData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub father_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mother_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
}

/// A student photo change waiting for staff approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPhotoUpdate {
    pub photo: Option<String>,
    pub face_descriptor: Vec<f64>,
    pub requested_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,

    // Student
    pub roll_number: Option<String>,
    pub register_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    pub dob: Option<NaiveDate>,
    pub parent_phone: Option<String>,
    pub profile_photo: Option<String>,
    pub face_embedding: Vec<f64>,
    pub is_profile_complete: bool,
    #[serde(flatten)]
    pub bio_data: Json<BioData>,
    pub can_edit_profile: bool,
    pub can_update_photo: bool,
    pub photo_update_failed_attempts: i32,
    pub pending_photo_update: Option<Json<PendingPhotoUpdate>>,

    // Staff
    pub staff_id: Option<String>,
    pub managed_by: Option<Uuid>,
    pub is_faculty_advisor: bool,
    pub advisor_department: Option<String>,
    pub advisor_year: Option<String>,
    pub advisor_section: Option<String>,

    // HOD
    pub assigned_department: Option<String>,

    pub is_active: bool,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The class a student sits in.
    pub fn student_class(&self) -> Option<ClassRef> {
        ClassRef::from_parts(
            self.department.as_deref(),
            self.year.as_deref(),
            self.section.as_deref(),
        )
    }

    /// The class a faculty advisor is assigned to, when fully set.
    pub fn advisor_class(&self) -> Option<ClassRef> {
        if !self.is_faculty_advisor {
            return None;
        }
        ClassRef::from_parts(
            self.advisor_department.as_deref(),
            self.advisor_year.as_deref(),
            self.advisor_section.as_deref(),
        )
    }

    /// Faculty-advisor operations are also open to the super-admin.
    pub fn can_act_as_advisor(&self) -> bool {
        self.is_faculty_advisor || self.role == Role::Superadmin
    }

    /// May replace another staff member's running session.
    pub fn can_override_sessions(&self) -> bool {
        self.is_faculty_advisor || matches!(self.role, Role::Admin | Role::Superadmin)
    }

    pub fn has_face(&self) -> bool {
        !self.face_embedding.is_empty()
    }

    /// The identifier a person types at login, by role.
    pub fn login_id(&self) -> &str {
        match self.role {
            Role::Student => self.roll_number.as_deref().unwrap_or(&self.email),
            _ => self.staff_id.as_deref().unwrap_or(&self.email),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn role_groups() {
        assert!(!Role::Student.is_staff_or_above());
        assert!(Role::Staff.is_staff_or_above());
        assert!(!Role::Staff.is_hod_or_above());
        assert!(Role::Hod.is_hod_or_above());
        assert!(Role::Superadmin.is_hod_or_above());
    }

    #[test]
    fn role_text_round_trip() {
        assert_eq!("hod".parse::<Role>().unwrap(), Role::Hod);
        assert!("teacher".parse::<Role>().is_err());
        assert_eq!(serde_json::to_value(Role::Superadmin).unwrap(), "superadmin");
    }

    #[test]
    fn advisor_class_requires_flag_and_fields() {
        let mut staff = fixtures::staff("Asha");
        assert!(staff.advisor_class().is_none());

        staff.is_faculty_advisor = true;
        assert!(staff.advisor_class().is_none());

        staff.advisor_department = Some("CS".into());
        staff.advisor_year = Some("2".into());
        assert_eq!(staff.advisor_class(), Some(ClassRef::new("CS", "2", None)));
        assert!(staff.can_override_sessions());
    }

    #[test]
    fn serialized_user_hides_secrets_and_flattens_bio() {
        let mut student = fixtures::student("Ravi", "21", ClassRef::new("CS", "2", Some("A".into())));
        student.bio_data.0.city = Some("Chennai".into());
        let json = serde_json::to_value(&student).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("sessionToken").is_none());
        assert_eq!(json["city"], "Chennai");
        assert_eq!(json["rollNumber"], "21");
        assert_eq!(student.login_id(), "21");
    }
}
