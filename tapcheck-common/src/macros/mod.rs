// Logging macros forwarding to tapcheck_common::logging::Logger.
//
// The logger checks the level of its component target before anything is
// formatted, so the macros only need to build the fmt::Arguments.

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {{
        ($logger).debug_args(format_args!($($arg)*));
    }}
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {{
        ($logger).info_args(format_args!($($arg)*));
    }}
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {{
        ($logger).warn_args(format_args!($($arg)*));
    }}
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {{
        ($logger).error_args(format_args!($($arg)*));
    }}
}
