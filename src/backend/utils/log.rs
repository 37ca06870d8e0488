// src/backend/utils/log.rs
// Prefixed debug-print logging. On the canister this goes to the replica log,
// in native test builds to stdout/stderr.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Scheduler,
}

impl Level {
    fn prefix(self) -> &'static str {
        match self {
            Level::Info => "📝 INFO:",
            Level::Warn => "⚠️ WARN:",
            Level::Error => "❌ ERROR:",
            Level::Scheduler => "⚙️ SCHEDULER:",
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub fn emit(level: Level, message: &str) {
    ic_cdk::api::print(format!("{} {}", level.prefix(), message));
}

#[cfg(not(target_arch = "wasm32"))]
pub fn emit(level: Level, message: &str) {
    match level {
        Level::Warn | Level::Error => eprintln!("{} {}", level.prefix(), message),
        Level::Info | Level::Scheduler => println!("{} {}", level.prefix(), message),
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_scheduler {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Scheduler, &format!($($arg)*))
    };
}
