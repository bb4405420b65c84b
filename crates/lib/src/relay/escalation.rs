//! Escalation reporter: ships diagnostic context for failed events to the developer chat.
//!
//! Reporting never fails outward. A report that cannot be delivered is logged and dropped.

use crate::channels::{ChatId, InboundEvent, Messenger, OutboundMessage, RelayEvent};
use crate::store::CorrelationStore;
use std::error::Error;
use std::fmt::Write as _;
use std::sync::Arc;

/// Telegram's hard ceiling for a message body.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const TRACE_BUDGET: usize = 1200;
const STATE_BUDGET: usize = 400;
const TRUNCATION_MARKER: &str = "\n… (truncated)";

fn escape_char(ch: char, out: &mut String) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(ch),
    }
}

/// Escape the characters Telegram's HTML parse mode treats specially.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        escape_char(ch, &mut out);
    }
    out
}

/// Escape `raw` so the result is at most `budget` chars. Cuts between source characters
/// (never inside an entity) and appends a marker when the text had to be shortened.
fn escape_within(raw: &str, budget: usize) -> String {
    let escaped = escape_html(raw);
    if escaped.chars().count() <= budget {
        return escaped;
    }
    let limit = budget.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out = String::new();
    let mut used = 0;
    let mut piece = String::new();
    for ch in raw.chars() {
        piece.clear();
        escape_char(ch, &mut piece);
        let n = piece.chars().count();
        if used + n > limit {
            break;
        }
        out.push_str(&piece);
        used += n;
    }
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Error message followed by each `source()` in turn.
pub fn causal_chain(error: &(dyn Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    let mut depth = 0;
    while let Some(e) = source {
        let _ = write!(out, "\n{:>width$}caused by: {}", "", e, width = depth * 2);
        depth += 1;
        source = e.source();
    }
    out
}

/// Sends error reports to a fixed developer chat.
pub struct Escalator {
    messenger: Arc<dyn Messenger>,
    developer_chat_id: ChatId,
    store: Arc<dyn CorrelationStore>,
}

impl Escalator {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        developer_chat_id: ChatId,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            messenger,
            developer_chat_id,
            store,
        }
    }

    /// Auxiliary state at the time of failure: store size and the correlation the event targets.
    async fn snapshot_state(&self, event: &InboundEvent) -> String {
        let count = self.store.len().await;
        let mut state = format!(
            "correlations = {}\nkind = {:?}\nfrom_operator = {}",
            count, event.kind, event.is_from_operator
        );
        if let RelayEvent::OperatorReply { replied_to } = event.kind {
            let target = self.store.get(replied_to).await;
            let _ = write!(state, "\ncorrelation[{}] = {:?}", replied_to, target);
        }
        state
    }

    /// Render the report as one HTML message no longer than [`MAX_MESSAGE_CHARS`].
    pub fn render(
        &self,
        event: &InboundEvent,
        state: &str,
        error: &(dyn Error + 'static),
    ) -> String {
        let header = format!(
            "An exception was raised while handling an update\n<i>{}</i>\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        let trace = escape_within(&causal_chain(error), TRACE_BUDGET);
        let state = escape_within(state, STATE_BUDGET);
        let frame = |update: &str| {
            format!(
                "{}<pre>update = {}</pre>\n\n<pre>{}</pre>\n\n<pre>{}</pre>",
                header, update, state, trace
            )
        };
        let frame_len = frame("").chars().count();
        let update_raw = serde_json::to_string_pretty(&event.raw_envelope)
            .unwrap_or_else(|_| event.raw_envelope.to_string());
        let update = escape_within(&update_raw, MAX_MESSAGE_CHARS.saturating_sub(frame_len));
        frame(&update)
    }

    /// Log the failure, then deliver a report to the developer chat. Delivery errors are
    /// logged locally and swallowed.
    pub async fn report(
        &self,
        event: &InboundEvent,
        error: &(dyn Error + Send + Sync + 'static),
    ) {
        log::error!(
            "error while handling update {}: {}",
            event.update_id,
            causal_chain(error)
        );
        let state = self.snapshot_state(event).await;
        let text = self.render(event, &state, error);
        let message = OutboundMessage::html(self.developer_chat_id, text);
        if let Err(e) = self.messenger.send_message(message).await {
            log::error!(
                "failed to deliver error report for update {} to developer chat {}: {}",
                event.update_id,
                self.developer_chat_id,
                e
            );
        }
    }
}
