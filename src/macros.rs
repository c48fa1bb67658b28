// SPDX-License-Identifier: Apache-2.0 OR MIT
// Sending macros: timestamp the event and convert arguments to `Value`s

/// Send an event to the default destination, timestamped now
///
/// # Examples
/// ```ignore
/// send_event!(router, Severity::Info, "auth", "user {0} logged in", name.as_str())?;
/// ```
#[macro_export]
macro_rules! send_event {
    ($router:expr, $level:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $router.send(
            $level,
            $crate::timestamp_now(),
            $source,
            $template,
            &[$($crate::Value::from($arg)),*],
        )
    };
}

/// Send an event to the destination at `index`, timestamped now
///
/// # Examples
/// ```ignore
/// send_event_to!(router, audit, Severity::Notice, "auth", "login from {0}", addr.as_str())?;
/// ```
#[macro_export]
macro_rules! send_event_to {
    ($router:expr, $index:expr, $level:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $router.send_to(
            $index,
            $level,
            $crate::timestamp_now(),
            $source,
            $template,
            &[$($crate::Value::from($arg)),*],
        )
    };
}

/// Send an error event
///
/// # Examples
/// ```ignore
/// send_error!(router, "disk", "write to {0} failed", path.as_str())?;
/// ```
#[macro_export]
macro_rules! send_error {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Error, $source, $template $(, $arg)*)
    };
}

/// Send a critical event
#[macro_export]
macro_rules! send_critical {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Critical, $source, $template $(, $arg)*)
    };
}

/// Send a warning event
#[macro_export]
macro_rules! send_warning {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Warning, $source, $template $(, $arg)*)
    };
}

/// Send a notice event
#[macro_export]
macro_rules! send_notice {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Notice, $source, $template $(, $arg)*)
    };
}

/// Send an info event
///
/// # Examples
/// ```ignore
/// send_info!(router, "net", "{0} bytes from {1}", 512u32, "10.0.0.1")?;
/// ```
#[macro_export]
macro_rules! send_info {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Info, $source, $template $(, $arg)*)
    };
}

/// Send a debug event
#[macro_export]
macro_rules! send_debug {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Debug, $source, $template $(, $arg)*)
    };
}

/// Send a trace event
#[macro_export]
macro_rules! send_trace {
    ($router:expr, $source:expr, $template:expr $(, $arg:expr)* $(,)?) => {
        $crate::send_event!($router, $crate::Severity::Trace, $source, $template $(, $arg)*)
    };
}
