//! Tracing layer that turns host `tracing` events into reports.
//!
//! Events carry their group in a `group` field (falling back to the layer's
//! default group) and their owner in an `owner` field (falling back to the
//! event target). Remaining fields are appended to the message as
//! `key=value` pairs.

use std::fmt::Write as FmtWrite;

use tracing::field::{Field, Visit};
use tracing::{Event, Level as TracingLevel, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::report::{Level, Report};
use crate::session::WeakSession;

/// Targets the engine logs its own diagnostics under.
const ENGINE_TARGET_PREFIX: &str = "sessionlog";

/// A tracing Layer that submits events to a [`crate::Session`].
///
/// Holds the session weakly, so installing the layer in a global subscriber
/// does not keep the session open.
pub struct ReportLayer {
    session: WeakSession,
    default_group: String,
}

impl ReportLayer {
    /// Create a layer submitting to `session`, using `default_group` for
    /// events without a `group` field.
    pub fn new(session: WeakSession, default_group: impl Into<String>) -> Self {
        Self {
            session,
            default_group: default_group.into(),
        }
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }
}

fn map_level(level: &TracingLevel) -> Level {
    match *level {
        TracingLevel::ERROR => Level::Error,
        TracingLevel::WARN => Level::Warning,
        TracingLevel::INFO => Level::Info,
        _ => Level::Debug,
    }
}

impl<S> Layer<S> for ReportLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target.starts_with(ENGINE_TARGET_PREFIX) {
            return;
        }
        let Some(session) = self.session.upgrade() else {
            return;
        };

        let mut visitor = ReportVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message.unwrap_or_default();
        if !visitor.fields.is_empty() {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&visitor.fields.join(" "));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                message = format!("[{}] {message}", spans.join(" > "));
            }
        }

        let group = visitor.group.unwrap_or_else(|| self.default_group.clone());
        let owner = visitor.owner.unwrap_or_else(|| target.to_string());
        let report = Report::new(map_level(metadata.level()), group, message).with_owner(owner);

        // Submitting only fails once the session is closed.
        let _ = session.submit(report);
    }
}

/// Visitor that splits out the fields with a meaning for reports.
#[derive(Default)]
struct ReportVisitor {
    message: Option<String>,
    group: Option<String>,
    owner: Option<String>,
    fields: Vec<String>,
}

impl ReportVisitor {
    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "group" => self.group = Some(value),
            "owner" => self.owner = Some(value),
            name => self.fields.push(format!("{name}={value}")),
        }
    }
}

impl Visit for ReportVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        self.store(field, buf);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.store(field, value.to_string());
    }
}
