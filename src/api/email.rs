//! Outbound email contract.
//!
//! Delivery and template rendering belong to an external collaborator; this
//! crate only hands over the recipient and the payload. The default sender
//! logs the message, which is also how one-time codes surface during
//! development.

use tracing::info;

pub trait EmailSender: Send + Sync {
    fn send(&self, to: &str, template: &str, payload: &serde_json::Value);
}

/// Sender that logs instead of delivering.
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, to: &str, template: &str, payload: &serde_json::Value) {
        info!("email to {to} [{template}]: {payload}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_sender_accepts_any_payload() {
        let sender = LogEmailSender;
        sender.send(
            "alice@example.com",
            "verify_email",
            &json!({ "code": "abc" }),
        );
    }

    #[test]
    fn sender_is_object_safe() {
        let sender: Box<dyn EmailSender> = Box::new(LogEmailSender);
        sender.send("bob@example.com", "test_email", &json!({}));
    }
}
