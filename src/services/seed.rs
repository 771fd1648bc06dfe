//! Default accounts for a fresh database.

use chrono::NaiveDate;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::ServiceResult;
use crate::auth::password::{dob_password, hash_password_async};
use crate::database::models::BioData;

pub const DEFAULT_PASSWORD: &str = "password123";
pub const DEPARTMENT: &str = "Computer Science";

/// Who was created, and how they log in.
#[derive(Debug, Clone, PartialEq)]
pub struct SeededLogin {
    pub role: &'static str,
    pub username: String,
    pub password: String,
}

/// Inserts a principal, a HOD, a faculty-advisor staff member and one
/// student, unless any user already exists. Returns the logins created.
pub async fn seed_defaults(pool: &PgPool) -> ServiceResult<Vec<SeededLogin>> {
    let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users").fetch_one(pool).await?;
    if existing > 0 {
        tracing::debug!("Skipping seed, {} users present", existing);
        return Ok(Vec::new());
    }

    let staff_hash = hash_password_async(DEFAULT_PASSWORD.to_string()).await?;
    let dob = NaiveDate::from_ymd_opt(2005, 1, 1).unwrap_or_default();
    let student_password = dob_password(dob);
    let student_hash = hash_password_async(student_password.clone()).await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, name, email, phone, role, password_hash, department)
         VALUES ($1, 'Principal', 'principal@college.edu', '9876543210', 'superadmin', $2, 'Administration')",
    )
    .bind(Uuid::new_v4())
    .bind(&staff_hash)
    .execute(&mut *tx)
    .await?;

    let hod_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, name, email, phone, role, password_hash, staff_id, department, assigned_department)
         VALUES ($1, 'Dr. HOD', 'hod@college.edu', '9876543211', 'hod', $2, 'hod', $3, $3)",
    )
    .bind(hod_id)
    .bind(&staff_hash)
    .bind(DEPARTMENT)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO users (id, name, email, phone, role, password_hash, staff_id, department, managed_by,
                            is_faculty_advisor, advisor_department, advisor_year, advisor_section)
         VALUES ($1, 'Staff User', 'staff@college.edu', '9876543212', 'staff', $2, 'staff', $3, $4,
                 TRUE, $3, '2', 'A')",
    )
    .bind(Uuid::new_v4())
    .bind(&staff_hash)
    .bind(DEPARTMENT)
    .bind(hod_id)
    .execute(&mut *tx)
    .await?;

    let bio = BioData {
        blood_group: Some("O+".to_string()),
        ..BioData::default()
    };
    sqlx::query(
        "INSERT INTO users (id, name, email, phone, role, password_hash, roll_number, department, year,
                            section, dob, bio_data, can_edit_profile)
         VALUES ($1, 'Student User', 'student@college.edu', '9876543213', 'student', $2, '1', $3, '2',
                 'A', $4, $5, TRUE)",
    )
    .bind(Uuid::new_v4())
    .bind(&student_hash)
    .bind(DEPARTMENT)
    .bind(dob)
    .bind(Json(bio))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!("Seeded default accounts");

    Ok(vec![
        SeededLogin { role: "superadmin", username: "principal@college.edu".into(), password: DEFAULT_PASSWORD.into() },
        SeededLogin { role: "hod", username: "hod".into(), password: DEFAULT_PASSWORD.into() },
        SeededLogin { role: "staff", username: "staff".into(), password: DEFAULT_PASSWORD.into() },
        SeededLogin { role: "student", username: "1".into(), password: student_password },
    ])
}
