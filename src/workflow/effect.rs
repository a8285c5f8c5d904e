//! Effects produced by transitions, and the boundary that executes them.
//!
//! Transitions are pure; anything they want done in the outside world is
//! returned as data. The only out-of-band collaborator this core has is the
//! notification service (delivery itself is out of scope), so effects are
//! either notifications handed to a [`NotificationSink`] or log lines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::EntityId;

/// All effects a transition can request.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Hand a notification to the out-of-band notification collaborator.
    Notify(Notification),

    /// Log a message.
    Log { level: LogLevel, message: String },
}

/// Notifications emitted at specific transitions.
///
/// These describe what happened; rendering and delivery (email, in-app feed)
/// belong to the excluded notification service.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ReviewStarted {
        entity_id: EntityId,
    },
    GradingCompleted {
        entity_id: EntityId,
        passed: bool,
    },
    DefenseScheduled {
        entity_id: EntityId,
        scheduled_date: DateTime<Utc>,
    },
    DefenseDecided {
        entity_id: EntityId,
        passed: bool,
    },
    ExaminationCompleted {
        entity_id: EntityId,
        passed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// Boundary to the notification collaborator.
///
/// Implementations must be infallible from the workflow's point of view: a
/// failed delivery is the collaborator's problem and must not roll back a
/// committed transition.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification);
}

/// Default sink: records each notification in the log and nothing else.
/// Used until a real delivery service is wired in, and in tests.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, notification: &Notification) {
        info!(?notification, "notification emitted");
    }
}

/// Execute effects in order. Logging happens inline; notifications go to the
/// sink. Effects never fail the operation that produced them.
pub async fn execute_effects(sink: &dyn NotificationSink, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Notify(notification) => sink.deliver(&notification).await,
            Effect::Log { level, message } => match level {
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
            },
        }
    }
}
