use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{Leave, LeaveStatus, User};

/// Something that happened to a leave request and that people should hear
/// about.
#[derive(Debug, Clone)]
pub enum LeaveEvent {
    Submitted {
        leave: Leave,
        requester: User,
    },
    StatusChanged {
        leave: Leave,
        requester: User,
        old_status: LeaveStatus,
        new_status: LeaveStatus,
    },
}

impl LeaveEvent {
    pub fn leave(&self) -> &Leave {
        match self {
            LeaveEvent::Submitted { leave, .. } | LeaveEvent::StatusChanged { leave, .. } => leave,
        }
    }

    pub fn requester(&self) -> &User {
        match self {
            LeaveEvent::Submitted { requester, .. }
            | LeaveEvent::StatusChanged { requester, .. } => requester,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LeaveEvent::Submitted { .. } => "submitted",
            LeaveEvent::StatusChanged { .. } => "status_changed",
        }
    }
}

/// An event addressed to its recipients.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: LeaveEvent,
    /// Requester first (when they have an email), then the admin list.
    pub recipients: Vec<String>,
}

impl Notification {
    pub fn new(event: LeaveEvent, admin_emails: &[String]) -> Self {
        let mut recipients = Vec::with_capacity(admin_emails.len() + 1);
        if let Some(email) = event.requester().email.as_deref().filter(|e| !e.is_empty()) {
            recipients.push(email.to_string());
        }
        for email in admin_emails {
            if !recipients.contains(email) {
                recipients.push(email.clone());
            }
        }
        Self { event, recipients }
    }
}

#[derive(Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers notifications (email, chat, ...). Runs on the dispatcher task,
/// never inside a ledger transaction.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification to the log. The default when no transport is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let leave = notification.event.leave();
        match &notification.event {
            LeaveEvent::Submitted { requester, .. } => tracing::info!(
                leave_id = %leave.id,
                requester = %requester.username,
                days = leave.days,
                recipients = ?notification.recipients,
                "leave submitted"
            ),
            LeaveEvent::StatusChanged {
                requester,
                old_status,
                new_status,
                ..
            } => tracing::info!(
                leave_id = %leave.id,
                requester = %requester.username,
                from = %old_status,
                to = %new_status,
                recipients = ?notification.recipients,
                "leave status changed"
            ),
        }
        Ok(())
    }
}

/// Sending half of the notification outbox. Enqueueing never blocks and never
/// fails the caller.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<LeaveEvent>,
}

impl NotificationQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LeaveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, event: LeaveEvent) {
        let leave_id = event.leave().id;
        if self.tx.send(event).is_err() {
            tracing::warn!(%leave_id, "notification dropped, dispatcher is gone");
        }
    }
}

/// Drains the outbox and hands each event to a [`Notifier`].
pub struct NotificationDispatcher<N> {
    notifier: N,
    admin_emails: Vec<String>,
}

impl<N: Notifier> NotificationDispatcher<N> {
    pub fn new(notifier: N, admin_emails: Vec<String>) -> Self {
        Self {
            notifier,
            admin_emails,
        }
    }

    /// Run until every [`NotificationQueue`] handle is dropped. Resolves to the
    /// number of notifications delivered successfully.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<LeaveEvent>) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut delivered = 0;
            while let Some(event) = rx.recv().await {
                if self.dispatch(event) {
                    delivered += 1;
                }
            }
            tracing::debug!(delivered, "notification dispatcher stopped");
            delivered
        })
    }

    /// Deliver one event. Failures are logged and swallowed.
    pub fn dispatch(&self, event: LeaveEvent) -> bool {
        let notification = Notification::new(event, &self.admin_emails);
        match self.notifier.notify(&notification) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    leave_id = %notification.event.leave().id,
                    kind = notification.event.kind(),
                    error = %err,
                    "failed to deliver notification"
                );
                false
            }
        }
    }
}
