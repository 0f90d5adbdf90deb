use std::fmt;

/// A human-readable failure reason.
///
/// Every internal operation of the engine reports problems through this type
/// instead of a structured error code, so that failures from many independent
/// units (destinations, schedules, records) can be stitched together into one
/// report without losing any of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
    message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }

    /// Return a failure whose message is `prefix` followed by this message.
    pub fn prepend(self, prefix: impl fmt::Display) -> Self {
        Self {
            message: format!("{prefix}{}", self.message),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Either a value or a [`Failure`] message.
pub type Fallible<T = ()> = std::result::Result<T, Failure>;

/// Build an `Err(Failure)` from a format string, formatting eagerly.
///
/// ```
/// use beacon_core::{fail, Fallible};
///
/// fn check(amount: i64) -> Fallible<u32> {
///     if amount <= 0 {
///         return fail!("A task cannot be executed every {amount} minutes!");
///     }
///     Ok(amount as u32)
/// }
///
/// assert!(check(0).is_err());
/// ```
#[macro_export]
macro_rules! fail {
    ($($arg:tt)*) => {
        ::std::result::Result::Err($crate::fallible::Failure::new(::std::format!($($arg)*)))
    };
}

/// Lift an `Option` into a [`Fallible`], using `message` when it is `None`.
pub fn from_option<T>(value: Option<T>, message: impl Into<String>) -> Fallible<T> {
    value.ok_or_else(|| Failure::new(message))
}

/// Apply `f` to every input and succeed only if every call succeeded.
///
/// Unlike `?`/`collect::<Result<_, _>>()` this never stops at the first
/// failure: every input is visited and every failure message is kept, joined
/// by newlines in input order.
pub fn for_each<I, F, T>(inputs: I, f: F) -> Fallible
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fallible<T>,
{
    all_ok(inputs.into_iter().map(f))
}

/// Fold already computed results the same way [`for_each`] does.
///
/// Useful from async code, where the per-item futures are awaited in a loop
/// and only the outcomes are handed over.
pub fn all_ok<I, T>(results: I) -> Fallible
where
    I: IntoIterator<Item = Fallible<T>>,
{
    let errors: Vec<String> = results
        .into_iter()
        .filter_map(|r| r.err().map(Failure::into_message))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Failure::new(errors.join("\n")))
    }
}

/// Combinators the standard `Result` does not already provide.
pub trait FallibleExt<T> {
    /// Decorate the failure message with a formatted prefix; values pass through.
    fn prepend_to_error(self, prefix: impl fmt::Display) -> Fallible<T>;

    /// Discard the value, keeping only success or failure.
    fn discard(self) -> Fallible;
}

impl<T> FallibleExt<T> for Fallible<T> {
    fn prepend_to_error(self, prefix: impl fmt::Display) -> Fallible<T> {
        self.map_err(|failure| failure.prepend(prefix))
    }

    fn discard(self) -> Fallible {
        self.map(|_| ())
    }
}
