//! Notification sinks for terminal use.

use std::io::Write;

use crate::error::SinkError;
use crate::notify::{Notification, NotificationSink};

/// Ring the terminal bell.
pub fn play_notification() -> std::io::Result<()> {
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(b"\x07")?;
    stderr.flush()
}

/// Audible cue; muted when sound is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl NotificationSink for TerminalBell {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn is_audible(&self) -> bool {
        true
    }

    fn notify(&self, _notification: &Notification) -> Result<(), SinkError> {
        play_notification()?;
        Ok(())
    }
}

/// "System alert" for headless use: a structured log line.
#[derive(Debug, Clone, Copy)]
pub struct LogAlert {
    pub permitted: bool,
}

impl Default for LogAlert {
    fn default() -> Self {
        Self { permitted: true }
    }
}

impl NotificationSink for LogAlert {
    fn name(&self) -> &'static str {
        "log"
    }

    fn permitted(&self) -> bool {
        self.permitted
    }

    fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        tracing::info!(
            conversation_id = %notification.conversation_id,
            sender_id = %notification.sender_id,
            message_id = %notification.message_id,
            "new message: {}",
            notification.preview
        );
        Ok(())
    }
}
