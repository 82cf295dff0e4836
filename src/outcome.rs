use std::fmt::Display;

use tracing::warn;

/// Result of a best-effort write (device tracking, audit log) riding along
/// a primary flow. A failure is logged and reported, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect<T> {
    Applied(T),
    Failed(String),
}

impl<T> SideEffect<T> {
    /// Logs `err` under `effect` and records it as failed.
    pub fn from_result<E: Display>(effect: &'static str, result: Result<T, E>) -> Self {
        match result {
            Ok(value) => SideEffect::Applied(value),
            Err(err) => {
                warn!(effect, error = %err, "side effect failed; continuing");
                SideEffect::Failed(err.to_string())
            }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, SideEffect::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            SideEffect::Applied(value) => Some(value),
            SideEffect::Failed(_) => None,
        }
    }
}
