//! Outbound notification seam.
//!
//! The engines hand finished message bodies to a [`Notifier`]; what happens
//! next (SMTP, a queue, nothing) is the host application's business. Send
//! failures must never abort the surrounding batch, so every call site logs
//! and moves on.

use thiserror::Error;

/// A notification send failure. Carried for logging only; the engines never
/// propagate it.
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers plain-text messages to a list of email addresses.
pub trait Notifier: Send + Sync {
    /// Sends one message. Implementations should be quick; the engines call
    /// this inline from batch loops.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] on delivery failure. Callers log and continue.
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// A [`Notifier`] that only logs. The default wiring until a real delivery
/// backend is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(
            recipients = recipients.join(", "),
            subject,
            body,
            "notification (log only)"
        );
        Ok(())
    }
}

/// Records sent messages for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(Vec<String>, String, String)>>,
}

impl RecordingNotifier {
    /// Messages sent so far as (recipients, subject, body) tuples.
    #[must_use]
    pub fn sent(&self) -> Vec<(Vec<String>, String, String)> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push((recipients.to_vec(), subject.to_owned(), body.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_captures_messages() {
        let notifier = RecordingNotifier::default();
        notifier
            .send(&["a@example.org".to_string()], "subject", "body")
            .unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "subject");
    }
}
