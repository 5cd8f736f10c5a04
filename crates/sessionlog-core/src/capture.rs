//! Implicit exception capture.
//!
//! An [`ExceptionCapture`] turns errors and panics that the host did not
//! report itself into implicit exception reports. [`install_panic_hook`]
//! wires one into the process panic hook, chaining to the previous hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::panic::PanicHookInfo;

use crate::report::{ExceptionInfo, Report};
use crate::session::WeakSession;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

/// Submits implicit exception reports to one group of a session.
///
/// Holds the session weakly; once the session is gone captures are ignored.
#[derive(Clone)]
pub struct ExceptionCapture {
    session: WeakSession,
    group: String,
}

impl ExceptionCapture {
    pub fn new(session: WeakSession, group: impl Into<String>) -> Self {
        Self {
            session,
            group: group.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Submit an implicit exception. Returns whether it was accepted.
    ///
    /// Captures triggered while another capture is running on the same
    /// thread are ignored.
    pub fn capture(&self, message: impl Into<String>, info: ExceptionInfo) -> bool {
        if CAPTURING.with(|c| c.replace(true)) {
            return false;
        }
        let accepted = match self.session.upgrade() {
            Some(session) => session
                .submit(Report::implicit_exception(&self.group, message, info))
                .is_ok(),
            None => false,
        };
        CAPTURING.with(|c| c.set(false));
        accepted
    }

    /// Capture an error value with its source chain.
    pub fn capture_error<E>(&self, err: &E) -> bool
    where
        E: std::error::Error + 'static,
    {
        self.capture(err.to_string(), ExceptionInfo::from_error(err))
    }

    /// Capture a panic from inside a panic hook.
    pub fn capture_panic(&self, info: &PanicHookInfo<'_>) -> bool {
        let message = panic_message(info.payload());
        let mut frames = Vec::new();
        if let Some(location) = info.location() {
            frames.push(format!("at {location}"));
        }
        frames.extend(
            Backtrace::force_capture()
                .to_string()
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty()),
        );
        let exception = ExceptionInfo::new("panic", message.clone()).with_frames(frames);
        self.capture(message, exception)
    }
}

/// Text of a panic payload (`&str` or `String`), or a placeholder.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Report every panic through `capture`, then run the previously installed hook.
pub fn install_panic_hook(capture: ExceptionCapture) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        capture.capture_panic(info);
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(s.as_ref()), "static str");

        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");

        let s: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(s.as_ref()), "Box<dyn Any>");
    }

    #[test]
    fn test_capture_without_session_is_ignored() {
        let capture = ExceptionCapture::new(WeakSession::default(), "Core");
        assert!(!capture.capture("boom", ExceptionInfo::new("E", "boom")));
        assert_eq!(capture.group(), "Core");
    }
}
