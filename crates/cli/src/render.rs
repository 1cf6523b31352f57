//! Terminal rendering for session snapshots and updates.

use console::style;

use opsdeck_protocol::{ConnectionState, ConversationStatus, Message, MessageStatus, Role};
use opsdeck_sync::{SessionError, SessionPhase, SessionSnapshot, SessionUpdate};

/// `HH:MM` from an ISO-8601 timestamp, or the raw value
fn short_time(timestamp: &str) -> &str {
    match timestamp.get(11..16) {
        Some(hm) if timestamp.as_bytes().get(10) == Some(&b'T') => hm,
        _ => timestamp,
    }
}

pub fn message_line(message: &Message) -> String {
    let label = match message.role {
        Role::User => style(message.role.label()).cyan().bold(),
        Role::Counterparty => style(message.role.label()).magenta().bold(),
    };
    let mut line = format!(
        "{} {}: {}",
        style(format!("[{}]", short_time(&message.timestamp))).dim(),
        label,
        message.display_content()
    );
    if let Some(status) = message.status {
        let badge = format!("[{}]", status.label());
        let badge = match status {
            MessageStatus::Success => style(badge).green(),
            MessageStatus::Error => style(badge).red(),
            MessageStatus::Pending => style(badge).yellow(),
        };
        line.push_str(&format!(" {badge}"));
    }
    if let Some(ticket) = message.ticket_id() {
        line.push_str(&format!(" {}", style(format!("(ticket {ticket})")).dim()));
    }
    line
}

pub fn header(snapshot: &SessionSnapshot) -> String {
    let title = snapshot
        .title
        .as_deref()
        .unwrap_or("Untitled conversation");
    let mut line = format!(
        "{} {}",
        style(title).bold(),
        style(format!("({})", snapshot.conversation_id)).dim()
    );
    if let Some(status) = snapshot.conversation_status {
        let status = match status {
            ConversationStatus::Active => style("active").green(),
            ConversationStatus::Completed => style("completed").blue(),
            ConversationStatus::Error => style("error").red(),
        };
        line.push_str(&format!(" [{status}]"));
    }
    if let Some(summary) = &snapshot.summary {
        line.push_str(&format!("\n{}", style(summary).dim()));
    }
    line
}

pub fn fault_line(err: &SessionError) -> String {
    let hint = if matches!(
        err,
        SessionError::Transport(_) | SessionError::Channel(_) | SessionError::NotConnected
    ) {
        " (use /reload to retry)"
    } else {
        ""
    };
    format!("{} {err}{hint}", style("error:").red().bold())
}

fn connection_line(state: &ConnectionState) -> Option<String> {
    match state {
        ConnectionState::Connecting => Some(style("Connecting...").dim().to_string()),
        ConnectionState::Open => Some(style("Connected").green().to_string()),
        // Faults already describe unexpected closes
        ConnectionState::ClosedNormal | ConnectionState::ClosedError { .. } => None,
    }
}

/// Lines to print for one update. Scroll and hold updates have no terminal form.
pub fn update_lines(update: &SessionUpdate) -> Vec<String> {
    match update {
        SessionUpdate::MessagesAppended(messages) => {
            messages.iter().map(message_line).collect()
        }
        SessionUpdate::Fault(err) => vec![fault_line(err)],
        SessionUpdate::AwaitingReply(true) => vec![style("Processing...").dim().to_string()],
        SessionUpdate::ConnectionChanged(state) => connection_line(state).into_iter().collect(),
        SessionUpdate::PhaseChanged(SessionPhase::Loading) => {
            vec![style("Loading conversation...").dim().to_string()]
        }
        SessionUpdate::PhaseChanged(SessionPhase::Ended) => {
            vec![style("Conversation closed").dim().to_string()]
        }
        SessionUpdate::PhaseChanged(_)
        | SessionUpdate::AwaitingReply(false)
        | SessionUpdate::MessageHeld { .. }
        | SessionUpdate::ScrollIntentChanged(_)
        | SessionUpdate::ScrollToBottom => Vec::new(),
    }
}

/// Everything visible in a snapshot: header, transcript and banner.
pub fn snapshot_lines(snapshot: &SessionSnapshot) -> Vec<String> {
    let mut lines = vec![header(snapshot)];
    lines.extend(snapshot.messages.iter().map(message_line));
    if snapshot.phase == SessionPhase::Loading {
        lines.push(style("Loading conversation...").dim().to_string());
    }
    if let Some(err) = &snapshot.fault {
        lines.push(fault_line(err));
    }
    if snapshot.awaiting_reply {
        lines.push(style("Processing...").dim().to_string());
    }
    lines
}

/// Full redraw after the terminal fell behind the update stream.
pub fn resync_lines(snapshot: &SessionSnapshot, skipped: u64) -> Vec<String> {
    let mut lines = vec![style(format!("({skipped} updates skipped, redrawing)"))
        .dim()
        .to_string()];
    lines.extend(snapshot_lines(snapshot));
    lines
}
