//! Logging macros capturing the full call site.

/// Builds a [`Callsite`](crate::models::Callsite) for the current location,
/// including module path and enclosing function name.
#[macro_export]
macro_rules! callsite {
    () => {
        $crate::models::Callsite {
            module_path: ::core::option::Option::Some(::core::module_path!()),
            file: ::core::file!(),
            line: ::core::line!(),
            function: ::core::option::Option::Some($crate::__function_name!()),
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __function_name {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        let name = name.strip_suffix("::__here").unwrap_or(name);
        let name = name.trim_end_matches("::{{closure}}");
        match name.rfind("::") {
            ::core::option::Option::Some(i) => &name[i + 2..],
            ::core::option::Option::None => name,
        }
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __leveled {
    ($level:expr, logger: $logger:expr, $($arg:tt)+) => {
        $logger.emit($crate::callsite!(), $level, &::core::format_args!($($arg)+))
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::logger().emit($crate::callsite!(), $level, &::core::format_args!($($arg)+))
    };
}

/// Logs at `TRACE`, see [`info!`](crate::info).
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::TRACE, $($arg)+) };
}

/// Logs at `DEBUG`, see [`info!`](crate::info).
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::DEBUG, $($arg)+) };
}

/// Logs at `INFO`.
///
/// Takes `format!` arguments, optionally preceded by `logger: <expr>,` to
/// use a specific [`Logger`](crate::Logger) instead of the global one.
///
/// # Panics
///
/// Panics if a handler added with `catch(false)` fails.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::INFO, $($arg)+) };
}

/// Logs at `SUCCESS`, see [`info!`](crate::info).
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::SUCCESS, $($arg)+) };
}

/// Logs at `WARNING`, see [`info!`](crate::info).
#[macro_export]
macro_rules! warning {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::WARNING, $($arg)+) };
}

/// Logs at `ERROR`, see [`info!`](crate::info).
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::ERROR, $($arg)+) };
}

/// Logs at `CRITICAL`, see [`info!`](crate::info).
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => { $crate::__leveled!($crate::models::level::CRITICAL, $($arg)+) };
}

/// Logs at any level and returns the `Result` of
/// [`Logger::log_at`](crate::Logger::log_at).
///
/// ```
/// use logbook::Logger;
///
/// let logger = Logger::new();
/// assert!(logbook::log!(logger: logger, 15u32, "custom {}", 1).is_ok());
/// assert!(logbook::log!(logger: logger, "MISSING", "oops").is_err());
/// ```
#[macro_export]
macro_rules! log {
    (logger: $logger:expr, $level:expr, $($arg:tt)+) => {
        $logger.log_at(
            $crate::callsite!(),
            $level,
            &::core::format_args!($($arg)+),
            $crate::Args::new(),
        )
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::logger().log_at(
            $crate::callsite!(),
            $level,
            &::core::format_args!($($arg)+),
            $crate::Args::new(),
        )
    };
}
