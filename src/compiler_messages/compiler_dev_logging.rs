//! Developer tracing for the lowering passes.
//!
//! Each macro prints through `saying` only when its Cargo feature is enabled and
//! expands to nothing otherwise, so release builds carry none of the formatting.
//!
//! | Macro             | Feature           | Traces                                   |
//! |-------------------|-------------------|------------------------------------------|
//! | `preprocess_log!` | `show_preprocess` | entry stacks and forks of the first pass |
//! | `stack_log!`      | `show_stack`      | every descriptor push and pop            |
//! | `codegen_log!`    | `show_codegen`    | each node as the second pass emits it    |
//! | `timer_log!`      | `detailed_timers` | time spent per pass and per unit         |

// Stack inference
#[macro_export]
#[cfg(feature = "show_preprocess")]
macro_rules! preprocess_log {
    ($($arg:tt)*) => {
        saying::say!($($arg)*);
    };
}

#[macro_export]
#[cfg(not(feature = "show_preprocess"))]
macro_rules! preprocess_log {
    ($($arg:tt)*) => {};
}

// Descriptor traffic, very noisy
#[macro_export]
#[cfg(feature = "show_stack")]
macro_rules! stack_log {
    ($($arg:tt)*) => {
        saying::say!($($arg)*);
    };
}

#[macro_export]
#[cfg(not(feature = "show_stack"))]
macro_rules! stack_log {
    ($($arg:tt)*) => {};
}

// Emission
#[macro_export]
#[cfg(feature = "show_codegen")]
macro_rules! codegen_log {
    ($($arg:tt)*) => {
        saying::say!($($arg)*);
    };
}

#[macro_export]
#[cfg(not(feature = "show_codegen"))]
macro_rules! codegen_log {
    ($($arg:tt)*) => {};
}

/// `timer_log!(start, "Preprocessed in: ")` prints the time since `start`
#[macro_export]
#[cfg(feature = "detailed_timers")]
macro_rules! timer_log {
    ($time:expr, $msg:expr) => {
        saying::say!($msg, Green #$time.elapsed());
    };
}

#[macro_export]
#[cfg(not(feature = "detailed_timers"))]
macro_rules! timer_log {
    ($time:expr, $msg:expr) => {
        let _ = &$time;
    };
}
