//! Shared fixtures for tests.

use std::sync::Arc;

use antidote_core::{
    Connection, Endpoint, Lesson, LessonId, LessonStage, Presentation, PresentationType, SessionId,
};

use crate::types::LessonScheduleRequest;

fn endpoint(name: &str, image: &str, presentation: Presentation) -> Endpoint {
    Endpoint {
        name: name.to_string(),
        image: image.to_string(),
        presentations: vec![presentation],
    }
}

fn cli() -> Presentation {
    Presentation {
        name: "cli".to_string(),
        port: 22,
        kind: PresentationType::Ssh,
    }
}

fn connection(a: &str, b: &str) -> Connection {
    Connection {
        a: a.to_string(),
        b: b.to_string(),
    }
}

/// Three networked devices in a triangle, a utility host and a web server.
#[must_use]
pub fn test_lesson() -> Lesson {
    Lesson {
        lesson_id: LessonId(1),
        lesson_name: "Test Lesson".to_string(),
        stages: vec![
            LessonStage {
                id: 0,
                description: String::new(),
            },
            LessonStage {
                id: 1,
                description: "foobar".to_string(),
            },
        ],
        endpoints: vec![
            endpoint("vqfx1", "antidotelabs/vqfx", cli()),
            endpoint("vqfx2", "antidotelabs/vqfx", cli()),
            endpoint("vqfx3", "antidotelabs/vqfx", cli()),
            endpoint("linux1", "antidotelabs/utility", cli()),
            endpoint(
                "web1",
                "antidotelabs/webserver",
                Presentation {
                    name: "webui".to_string(),
                    port: 80,
                    kind: PresentationType::Http,
                },
            ),
        ],
        connections: vec![
            connection("vqfx1", "vqfx2"),
            connection("vqfx2", "vqfx3"),
            connection("vqfx3", "vqfx1"),
        ],
        category: "fundamentals".to_string(),
        tier: "prod".to_string(),
    }
}

/// A CREATE request for [`test_lesson`] at stage 1.
#[must_use]
pub fn test_request() -> LessonScheduleRequest {
    test_request_for_session("session-1")
}

/// A CREATE request for [`test_lesson`] owned by `session`.
///
/// # Panics
///
/// Panics if `session` is not a valid session ID.
#[must_use]
pub fn test_request_for_session(session: &str) -> LessonScheduleRequest {
    let session = SessionId::new(session).expect("valid test session");
    LessonScheduleRequest::create(Arc::new(test_lesson()), session, 1)
}
