pub mod bridge;
pub mod charmstore;
pub mod cluster;
pub mod config;
pub mod error;
pub mod ident;
pub mod identity;
pub mod invoker;
pub mod ops;
pub mod permissions;
pub mod registry;
pub mod remote;
pub mod server;
pub mod session;
#[doc(hidden)]
pub mod testing;

// Test-only printing helper: expands to eprintln! during tests and debug builds.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
