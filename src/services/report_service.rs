use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::attendance_service::{AttendanceService, StudentRow};
use super::{non_blank, parse_day, ClassFilter, ServiceError, ServiceResult};
use crate::database::models::{AttendanceStatus, User};
use crate::database::{DatabaseError, DatabaseManager};
use crate::types::campus_today;

/// Query string of the summary and export endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(flatten)]
    pub class: ClassFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyQuery {
    pub date: Option<String>,
    #[serde(flatten)]
    pub class: ClassFilter,
}

/// Status counts for one student over a date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub present: u32,
    pub absent: u32,
    pub half_day: u32,
    pub leave: u32,
    pub total: u32,
}

impl Tally {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::HalfDay => self.half_day += 1,
            AttendanceStatus::Leave => self.leave += 1,
        }
        self.total += 1;
    }

    /// A half day counts as half a presence. Two decimals.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let score = f64::from(self.present) + f64::from(self.half_day) * 0.5;
        round_to(score / f64::from(self.total) * 100.0, 2)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummaryLine {
    pub id: Uuid,
    pub name: String,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub section: Option<String>,
    #[serde(flatten)]
    pub tally: Tally,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    pub students: Vec<StudentSummaryLine>,
    pub overall: Value,
    pub date_range: Value,
}

/// Folds attendance rows into one line per student, in roster order.
pub fn summarize(students: &[StudentRow], records: &[(Uuid, AttendanceStatus)]) -> Vec<StudentSummaryLine> {
    let mut tallies: HashMap<Uuid, Tally> = HashMap::new();
    for (student, status) in records {
        tallies.entry(*student).or_default().add(*status);
    }
    students
        .iter()
        .map(|s| {
            let tally = tallies.remove(&s.id).unwrap_or_default();
            StudentSummaryLine {
                id: s.id,
                name: s.name.clone(),
                roll_number: s.roll_number.clone(),
                department: s.department.clone(),
                year: s.year.clone(),
                section: s.section.clone(),
                percentage: tally.percentage(),
                tally,
            }
        })
        .collect()
}

/// Renders summary lines as CSV with a header row.
pub fn summary_csv(lines: &[StudentSummaryLine]) -> ServiceResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "Roll Number", "Name", "Department", "Year", "Section", "Present", "Absent", "Half Day",
            "Leave", "Total", "Percentage",
        ])?;
    for line in lines {
        writer
            .write_record([
                line.roll_number.clone().unwrap_or_default(),
                line.name.clone(),
                line.department.clone().unwrap_or_default(),
                line.year.clone().unwrap_or_default(),
                line.section.clone().unwrap_or_default(),
                line.tally.present.to_string(),
                line.tally.absent.to_string(),
                line.tally.half_day.to_string(),
                line.tally.leave.to_string(),
                line.tally.total.to_string(),
                format!("{:.2}%", line.percentage),
            ])?;
    }
    let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e)).into())
}

/// Present ratio to one decimal.
fn share(present: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(present as f64 / total as f64 * 100.0, 1)
}

pub struct ReportService {
    pool: PgPool,
}

impl ReportService {
    pub fn new() -> Result<Self, DatabaseError> {
        Ok(Self { pool: DatabaseManager::pool()? })
    }

    fn attendance(&self) -> AttendanceService {
        AttendanceService::with_pool(self.pool.clone())
    }

    async fn range_lines(&self, query: &ReportQuery) -> ServiceResult<(Vec<StudentSummaryLine>, usize, usize)> {
        let start = match non_blank(query.start_date.as_deref()) {
            Some(raw) => Some(parse_day(Some(&raw))?),
            None => None,
        };
        let end = match non_blank(query.end_date.as_deref()) {
            Some(raw) => Some(parse_day(Some(&raw))?),
            None => None,
        };
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(ServiceError::invalid("End date cannot be before start date"));
            }
        }

        let students = self.attendance().class_students(&query.class).await?;
        let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();
        let records: Vec<(Uuid, AttendanceStatus)> = sqlx::query_as(
            "SELECT student_id, status FROM attendance
             WHERE student_id = ANY($1)
               AND ($2::date IS NULL OR date >= $2)
               AND ($3::date IS NULL OR date <= $3)",
        )
        .bind(&ids)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok((summarize(&students, &records), students.len(), records.len()))
    }

    pub async fn summary(&self, query: &ReportQuery) -> ServiceResult<SummaryReport> {
        let (lines, total_students, total_records) = self.range_lines(query).await?;
        let sum = |f: fn(&Tally) -> u32| lines.iter().map(|l| f(&l.tally)).sum::<u32>();
        let overall = json!({
            "totalStudents": total_students,
            "totalRecords": total_records,
            "present": sum(|t| t.present),
            "absent": sum(|t| t.absent),
            "halfDay": sum(|t| t.half_day),
            "leave": sum(|t| t.leave),
        });
        let date_range = json!({
            "start": non_blank(query.start_date.as_deref()).unwrap_or_else(|| "All time".into()),
            "end": non_blank(query.end_date.as_deref()).unwrap_or_else(|| "Present".into()),
        });
        Ok(SummaryReport { students: lines, overall, date_range })
    }

    /// The summary as a CSV document and a download file name.
    pub async fn export_csv(&self, query: &ReportQuery) -> ServiceResult<(String, String)> {
        let (lines, _, _) = self.range_lines(query).await?;
        let body = summary_csv(&lines)?;
        tracing::info!("Exported attendance CSV for {} students", lines.len());
        Ok((format!("Attendance_Report_{}.csv", campus_today()), body))
    }

    /// Each student's first status of the day, or "Not Marked".
    pub async fn daily(&self, query: &DailyQuery) -> ServiceResult<Value> {
        let day = parse_day(query.date.as_deref())?;
        let students = self.attendance().class_students(&query.class).await?;
        let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();
        let records: Vec<(Uuid, AttendanceStatus, DateTime<Utc>, bool)> = sqlx::query_as(
            "SELECT DISTINCT ON (student_id) student_id, status, time, is_manual
             FROM attendance
             WHERE student_id = ANY($1) AND date = $2
             ORDER BY student_id, time",
        )
        .bind(&ids)
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(daily_report(day, &students, &records))
    }

    /// Today's presence for a faculty advisor's class.
    pub async fn my_class_stats(&self, advisor: &User) -> ServiceResult<Value> {
        let class = advisor
            .advisor_class()
            .ok_or_else(|| ServiceError::forbidden("Not a Faculty Advisor"))?;
        let students = self.attendance().class_students(&ClassFilter::from(class)).await?;
        let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();
        let records: Vec<(Uuid, AttendanceStatus)> = sqlx::query_as(
            "SELECT student_id, status FROM attendance WHERE student_id = ANY($1) AND date = $2",
        )
        .bind(&ids)
        .bind(campus_today())
        .fetch_all(&self.pool)
        .await?;

        let by_id: HashMap<Uuid, &StudentRow> = students.iter().map(|s| (s.id, s)).collect();
        let brief = |id: &Uuid| {
            by_id
                .get(id)
                .map(|s| json!({ "name": s.name, "rollNumber": s.roll_number }))
        };
        let marked: HashSet<Uuid> = records.iter().map(|(id, _)| *id).collect();
        let present = records.iter().filter(|(_, s)| s.counts_present()).count();
        let absentees: Vec<Value> = records
            .iter()
            .filter(|(_, s)| *s == AttendanceStatus::Absent)
            .filter_map(|(id, _)| brief(id))
            .collect();
        let not_marked: Vec<Value> = students
            .iter()
            .filter(|s| !marked.contains(&s.id))
            .map(|s| json!({ "name": s.name, "rollNumber": s.roll_number }))
            .collect();

        Ok(json!({
            "totalStudents": students.len(),
            "presentToday": present,
            "absentToday": absentees.len(),
            "notMarkedToday": not_marked.len(),
            "absentees": absentees,
            "notMarkedList": not_marked,
        }))
    }

    /// Department-wise presence today plus the institution total.
    pub async fn advanced_stats(&self) -> ServiceResult<Value> {
        let totals: Vec<(String, i64)> = sqlx::query_as(
            "SELECT department, COUNT(*) FROM users
             WHERE role = 'student' AND department IS NOT NULL AND department <> ''
             GROUP BY department ORDER BY department",
        )
        .fetch_all(&self.pool)
        .await?;
        let present: Vec<(String, i64)> = sqlx::query_as(
            "SELECT s.department, COUNT(DISTINCT a.student_id)
             FROM attendance a JOIN users s ON s.id = a.student_id
             WHERE a.date = $1 AND a.status IN ('Present', 'Half Day') AND s.department IS NOT NULL
             GROUP BY s.department",
        )
        .bind(campus_today())
        .fetch_all(&self.pool)
        .await?;
        let (total_students,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'student'")
            .fetch_one(&self.pool)
            .await?;
        Ok(department_stats(&totals, &present, total_students))
    }

    /// Departments, then years for a department, then sections for a class.
    pub async fn cascade_filters(&self, filter: &ClassFilter) -> ServiceResult<Value> {
        let department = filter.department();
        let year = filter.year();

        let departments: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT department FROM users
             WHERE role = 'student' AND department IS NOT NULL AND department <> ''
             ORDER BY department",
        )
        .fetch_all(&self.pool)
        .await?;
        let years: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT year FROM users
             WHERE role = 'student' AND year IS NOT NULL AND year <> ''
               AND ($1::text IS NULL OR department = $1)
             ORDER BY year",
        )
        .bind(&department)
        .fetch_all(&self.pool)
        .await?;
        let sections: Vec<(String,)> = if department.is_some() {
            sqlx::query_as(
                "SELECT DISTINCT section FROM users
                 WHERE role = 'student' AND section IS NOT NULL AND section <> ''
                   AND department = $1 AND ($2::text IS NULL OR year = $2)
                 ORDER BY section",
            )
            .bind(&department)
            .bind(&year)
            .fetch_all(&self.pool)
            .await?
        } else {
            Vec::new()
        };

        let flat = |rows: Vec<(String,)>| rows.into_iter().map(|(v,)| v).collect::<Vec<_>>();
        Ok(json!({
            "departments": flat(departments),
            "years": flat(years),
            "sections": flat(sections),
        }))
    }
}

pub fn daily_report(
    day: NaiveDate,
    students: &[StudentRow],
    records: &[(Uuid, AttendanceStatus, DateTime<Utc>, bool)],
) -> Value {
    let by_student: HashMap<Uuid, (AttendanceStatus, DateTime<Utc>, bool)> = records
        .iter()
        .map(|(id, status, time, manual)| (*id, (*status, *time, *manual)))
        .collect();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let record = by_student.get(&s.id);
            let status = record.map(|(st, _, _)| st.as_str()).unwrap_or("Not Marked");
            *counts.entry(status).or_default() += 1;
            json!({
                "id": s.id,
                "name": s.name,
                "rollNumber": s.roll_number,
                "department": s.department,
                "year": s.year,
                "section": s.section,
                "profilePhoto": s.profile_photo,
                "status": status,
                "time": record.map(|(_, t, _)| *t),
                "isManual": record.map(|(_, _, m)| *m).unwrap_or(false),
            })
        })
        .collect();

    let count = |status: &str| counts.get(status).copied().unwrap_or(0);
    json!({
        "date": day,
        "students": rows,
        "summary": {
            "total": students.len(),
            "present": count("Present"),
            "absent": count("Absent"),
            "halfDay": count("Half Day"),
            "leave": count("Leave"),
            "notMarked": count("Not Marked"),
        },
    })
}

pub fn department_stats(totals: &[(String, i64)], present: &[(String, i64)], total_students: i64) -> Value {
    let present_by: HashMap<&str, i64> = present.iter().map(|(d, n)| (d.as_str(), *n)).collect();
    let dept_stats: Vec<Value> = totals
        .iter()
        .map(|(department, total)| {
            let present = present_by.get(department.as_str()).copied().unwrap_or(0);
            json!({
                "department": department,
                "total": total,
                "present": present,
                "percentage": share(present, *total),
            })
        })
        .collect();
    let total_present: i64 = present.iter().map(|(_, n)| n).sum();
    json!({
        "deptStats": dept_stats,
        "globalStats": {
            "totalStudents": total_students,
            "totalPresent": total_present,
            "percentage": share(total_present, total_students),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, roll: &str) -> StudentRow {
        StudentRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            roll_number: Some(roll.to_string()),
            department: Some("CS".into()),
            year: Some("2".into()),
            section: Some("A".into()),
            profile_photo: None,
            phone: None,
            parent_phone: None,
        }
    }

    #[test]
    fn half_days_count_half() {
        let mut tally = Tally::default();
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::HalfDay,
            AttendanceStatus::Absent,
        ] {
            tally.add(status);
        }
        assert_eq!(tally.total, 3);
        assert_eq!(tally.percentage(), 50.0);
        assert_eq!(Tally::default().percentage(), 0.0);
    }

    #[test]
    fn percentage_has_two_decimals() {
        let mut tally = Tally::default();
        tally.add(AttendanceStatus::Present);
        tally.add(AttendanceStatus::Absent);
        tally.add(AttendanceStatus::Leave);
        assert_eq!(tally.percentage(), 33.33);
    }

    #[test]
    fn summary_keeps_roster_order_and_unmarked_students() {
        let a = row("Anu", "1");
        let b = row("Bala", "2");
        let records = vec![(b.id, AttendanceStatus::Present), (b.id, AttendanceStatus::Present)];
        let lines = summarize(&[a.clone(), b.clone()], &records);
        assert_eq!(lines[0].name, "Anu");
        assert_eq!(lines[0].tally.total, 0);
        assert_eq!(lines[1].tally.present, 2);
        assert_eq!(lines[1].percentage, 100.0);

        let json = serde_json::to_value(&lines[1]).unwrap();
        assert_eq!(json["halfDay"], 0);
        assert_eq!(json["rollNumber"], "2");
    }

    #[test]
    fn csv_has_header_and_rows() {
        let a = row("Anu, K", "1");
        let lines = summarize(&[a.clone()], &[(a.id, AttendanceStatus::HalfDay)]);
        let csv = summary_csv(&lines).unwrap();
        let mut rows = csv.lines();
        assert!(rows.next().unwrap().starts_with("Roll Number,Name,"));
        assert_eq!(rows.next().unwrap(), "1,\"Anu, K\",CS,2,A,0,0,1,0,1,50.00%");
    }

    #[test]
    fn daily_counts_not_marked() {
        let a = row("Anu", "1");
        let b = row("Bala", "2");
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let report = daily_report(day, &[a.clone(), b], &[(a.id, AttendanceStatus::Present, Utc::now(), true)]);
        assert_eq!(report["summary"]["present"], 1);
        assert_eq!(report["summary"]["notMarked"], 1);
        assert_eq!(report["students"][0]["isManual"], true);
        assert_eq!(report["students"][1]["status"], "Not Marked");
    }

    #[test]
    fn department_shares() {
        let stats = department_stats(
            &[("CS".into(), 3), ("EE".into(), 2)],
            &[("CS".into(), 2)],
            5,
        );
        assert_eq!(stats["deptStats"][0]["percentage"], 66.7);
        assert_eq!(stats["deptStats"][1]["present"], 0);
        assert_eq!(stats["globalStats"]["percentage"], 40.0);
    }
}
