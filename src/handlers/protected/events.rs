// handlers/protected/events.rs - GET /api/events
//
// Server-sent events for the caller's rooms. Browsers cannot set headers on
// an EventSource, so the token may also arrive as `?token=`.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Extension;
use futures::stream::{Stream, StreamExt};

use crate::events::{hub, Subscription};
use crate::middleware::AuthUser;

pub async fn events_get(
    Extension(auth): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    tracing::debug!("{} subscribed to events ({} listeners)", auth.id(), hub().receiver_count() + 1);
    let stream = hub()
        .subscribe(Subscription::for_user(&auth.user))
        .map(|event| {
            let data = serde_json::to_string(&event.payload).unwrap_or_else(|_| "null".to_string());
            Ok(SseEvent::default().event(event.kind.as_str()).data(data))
        });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
