//! In-memory fixtures for unit tests.

pub mod fixtures {
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use sqlx::types::Json;
    use uuid::Uuid;

    use crate::database::models::{AttendanceSession, BioData, Role, SessionStatus, User};
    use crate::types::ClassRef;

    fn base_user(name: &str, role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@college.test", name.to_lowercase().replace(' ', ".")),
            phone: None,
            role,
            password_hash: String::new(),
            roll_number: None,
            register_number: None,
            department: None,
            year: None,
            section: None,
            dob: None,
            parent_phone: None,
            profile_photo: None,
            face_embedding: Vec::new(),
            is_profile_complete: false,
            bio_data: Json(BioData::default()),
            can_edit_profile: false,
            can_update_photo: false,
            photo_update_failed_attempts: 0,
            pending_photo_update: None,
            staff_id: None,
            managed_by: None,
            is_faculty_advisor: false,
            advisor_department: None,
            advisor_year: None,
            advisor_section: None,
            assigned_department: None,
            is_active: true,
            session_token: Some("session".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn student(name: &str, roll_number: &str, class: ClassRef) -> User {
        User {
            roll_number: Some(roll_number.to_string()),
            department: Some(class.department),
            year: Some(class.year),
            section: class.section,
            dob: NaiveDate::from_ymd_opt(2005, 1, 1),
            ..base_user(name, Role::Student)
        }
    }

    pub fn staff(name: &str) -> User {
        User {
            staff_id: Some(format!("STF-{}", name.to_uppercase())),
            ..base_user(name, Role::Staff)
        }
    }

    pub fn session(staff_id: Uuid, class: ClassRef, now: DateTime<Utc>) -> AttendanceSession {
        AttendanceSession {
            id: Uuid::new_v4(),
            staff_id,
            department: class.department,
            year: class.year,
            section: class.section,
            period: "Period 1".to_string(),
            start_time: now,
            end_time: now + Duration::minutes(10),
            status: SessionStatus::Active,
            latitude: None,
            longitude: None,
            radius_m: 50.0,
            location_name: None,
            qr_enabled: false,
            qr_token: None,
            qr_expires_at: None,
            requires_face_verification: false,
            closed_by: None,
            close_reason: None,
            created_at: now,
        }
    }
}
