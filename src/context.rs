// src/context.rs
//! Context extension traits + macros for error handling.
//!
//! - lazy `with_context` (closure only runs on the error path), zero overhead on `Ok`.
//! - `Option` support so missing data turns into a `ViewerError` with a message.
//! - `bail!` / `ensure!` for early returns.

use crate::error::{Result, ViewerError};

/// Extension trait giving `.context()` / `.with_context()` on any `Result`
/// whose error converts into `ViewerError`.
pub trait Context<T, E> {
    /// Add context eagerly (use only when cheap).
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    /// Add context lazily.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<ViewerError>,
{
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| err.into().context(context))
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| err.into().context(f()))
    }
}

/// `Option<T>` -> `Result<T>` with a message.
pub trait OptionContext<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> OptionContext<T> for Option<T> {
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.ok_or_else(|| ViewerError::custom(context))
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.ok_or_else(|| ViewerError::custom(f()))
    }
}

/// Early return with an error: `bail!("msg")`, `bail!(err)` or formatted.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::ViewerError::msg($msg))
    };
    ($err:expr $(,)?) => {
        return Err(Into::<$crate::error::ViewerError>::into($err))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::ViewerError::format(format_args!($fmt, $($arg)*)))
    };
}

/// Return early unless the condition holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !($cond) {
            $crate::bail!($msg);
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($fmt, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_percent(raw: &str) -> Result<f32> {
        let value: f32 = raw
            .parse()
            .map_err(|_| ViewerError::custom(format!("not a number: {raw}")))?;
        crate::ensure!(value <= 100.0, "percent out of range: {}", value);
        Ok(value)
    }

    #[test]
    fn ensure_formats_message() {
        let err = parse_percent("120").unwrap_err();
        assert_eq!(err.to_string(), "percent out of range: 120");
        assert_eq!(parse_percent("42").unwrap(), 42.0);
    }

    #[test]
    fn option_context_builds_custom_error() {
        let missing: Option<u32> = None;
        let err = missing.context("no scene in document").unwrap_err();
        assert_eq!(err, ViewerError::custom("no scene in document"));
    }

    #[test]
    fn result_context_wraps() {
        let res: std::result::Result<(), ViewerError> = Err(ViewerError::msg("boom"));
        let err = res.with_context(|| "decoding").unwrap_err();
        assert_eq!(err.to_string(), "decoding: boom");
    }
}
