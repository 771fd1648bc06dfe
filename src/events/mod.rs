//! In-process notification hub. Services publish to rooms; each connected
//! client receives the events of the rooms it belongs to.

use futures::stream::{self, Stream};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::database::models::{Role, User};
use crate::types::ClassRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Staff,
    Student(Uuid),
    Class(ClassRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "session:started")]
    SessionStarted,
    #[serde(rename = "session:closed")]
    SessionClosed,
    #[serde(rename = "attendance:update")]
    AttendanceUpdate,
    #[serde(rename = "attendance:marked")]
    AttendanceMarked,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session:started",
            EventKind::SessionClosed => "session:closed",
            EventKind::AttendanceUpdate => "attendance:update",
            EventKind::AttendanceMarked => "attendance:marked",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub room: Room,
    pub kind: EventKind,
    pub payload: Value,
}

/// The rooms one connection listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    user_id: Uuid,
    student_class: Option<(String, String, Option<String>)>,
    staff: bool,
    advisor_class: Option<ClassRef>,
}

impl Subscription {
    pub fn for_user(user: &User) -> Self {
        let student_class = match (user.role, &user.department, &user.year) {
            (Role::Student, Some(d), Some(y)) => Some((d.clone(), y.clone(), user.section.clone())),
            _ => None,
        };
        Self {
            user_id: user.id,
            student_class,
            staff: user.role.is_staff_or_above(),
            advisor_class: user.advisor_class(),
        }
    }

    pub fn matches(&self, room: &Room) -> bool {
        match room {
            Room::Staff => self.staff,
            Room::Student(id) => *id == self.user_id,
            Room::Class(class) => {
                // A section-less class event reaches every section of the class.
                let as_student = self
                    .student_class
                    .as_ref()
                    .map(|(d, y, s)| class.includes(d, y, s.as_deref()))
                    .unwrap_or(false);
                let as_advisor = self
                    .advisor_class
                    .as_ref()
                    .map(|advised| advised.overlaps(class))
                    .unwrap_or(false);
                as_student || as_advisor
            }
        }
    }
}

pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, room: Room, kind: EventKind, payload: Value) {
        tracing::debug!("Publishing {} to {:?}", kind.as_str(), room);
        // No listeners is not an error.
        let _ = self.tx.send(Event { room, kind, payload });
    }

    /// Events of `subscription`'s rooms, in publish order. Lagging receivers
    /// skip what they missed.
    pub fn subscribe(&self, subscription: Subscription) -> impl Stream<Item = Event> + Send + 'static {
        let rx = self.tx.subscribe();
        stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if subscription.matches(&event.room) => {
                        return Some((event, (rx, subscription)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

static HUB: Lazy<EventHub> = Lazy::new(|| EventHub::new(256));

pub fn hub() -> &'static EventHub {
    &HUB
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn student_hears_own_and_class_rooms() {
        let student = fixtures::student("Meena", "7", ClassRef::new("CS", "2", Some("A".into())));
        let sub = Subscription::for_user(&student);

        assert!(sub.matches(&Room::Student(student.id)));
        assert!(!sub.matches(&Room::Student(Uuid::new_v4())));
        assert!(!sub.matches(&Room::Staff));
        assert!(sub.matches(&Room::Class(ClassRef::new("CS", "2", Some("A".into())))));
        assert!(sub.matches(&Room::Class(ClassRef::new("CS", "2", None))));
        assert!(!sub.matches(&Room::Class(ClassRef::new("CS", "2", Some("B".into())))));
    }

    #[test]
    fn advisor_hears_staff_and_advised_class() {
        let mut staff = fixtures::staff("Kumar");
        staff.is_faculty_advisor = true;
        staff.advisor_department = Some("CS".into());
        staff.advisor_year = Some("2".into());
        staff.advisor_section = Some("A".into());
        let sub = Subscription::for_user(&staff);

        assert!(sub.matches(&Room::Staff));
        assert!(sub.matches(&Room::Class(ClassRef::new("CS", "2", Some("A".into())))));
        assert!(sub.matches(&Room::Class(ClassRef::new("CS", "2", None))));
        assert!(!sub.matches(&Room::Class(ClassRef::new("EE", "2", Some("A".into())))));
    }

    #[tokio::test]
    async fn subscriber_receives_only_matching_events() {
        let hub = EventHub::new(16);
        let student = fixtures::student("Meena", "7", ClassRef::new("CS", "2", Some("A".into())));
        let mut events = Box::pin(hub.subscribe(Subscription::for_user(&student)));

        hub.publish(Room::Staff, EventKind::AttendanceUpdate, json!({ "n": 1 }));
        hub.publish(Room::Student(student.id), EventKind::AttendanceMarked, json!({ "n": 2 }));

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, EventKind::AttendanceMarked);
        assert_eq!(event.payload["n"], 2);
    }
}
