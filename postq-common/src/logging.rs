use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::incoming!(level = TRACE, $($msg)*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Picks the level filter from `LOG_LEVEL`, falling back to `default`.
///
/// A `verbose` run never logs less than `DEBUG`.
fn level_filter(raw: Option<&str>, verbose: bool) -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = raw.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    });

    if verbose { level.max(LevelFilter::DEBUG) } else { level }
}

/// Install the global subscriber.
///
/// Only events from `postq*` targets are written, each prefixed with an
/// RFC 3339 UTC timestamp.
pub fn init(verbose: bool) {
    let level = level_filter(std::env::var("LOG_LEVEL").ok().as_deref(), verbose);

    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("postq")
                })),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn explicit_level_wins() {
        assert_eq!(level_filter(Some("warn"), false), LevelFilter::WARN);
        assert_eq!(level_filter(Some("error"), false), LevelFilter::ERROR);
    }

    #[test]
    fn verbose_raises_quiet_levels() {
        assert_eq!(level_filter(Some("warn"), true), LevelFilter::DEBUG);
        assert_eq!(level_filter(Some("trace"), true), LevelFilter::TRACE);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let default = level_filter(None, false);
        assert_eq!(level_filter(Some("loud"), false), default);
    }
}
