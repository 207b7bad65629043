//! Console output macros for the lab CLI.
//!
//! Progress and outcome lines go to the terminal through these macros so every
//! stage prints with the same glyphs. Diagnostic detail goes through `tracing`.

#[macro_export]
macro_rules! lab_println {
    () => {
        println!();
    };
    ($($arg:tt)*) => {
        println!("{}", format!($($arg)*));
    }
}

#[macro_export]
macro_rules! lab_error {
    ($($arg:tt)*) => {
        eprintln!("✗ {}", format!($($arg)*));
    }
}

#[macro_export]
macro_rules! lab_success {
    ($($arg:tt)*) => {
        println!("✓ {}", format!($($arg)*));
    };
}

#[macro_export]
macro_rules! lab_info {
    ($($arg:tt)*) => {
        println!("ℹ {}", format!($($arg)*));
    };
}

#[macro_export]
macro_rules! lab_warning {
    ($($arg:tt)*) => {
        eprintln!("⚠ {}", format!($($arg)*));
    };
}

/// Section banner printed before each stage.
#[macro_export]
macro_rules! lab_header {
    ($($arg:tt)*) => {
        println!();
        println!("{}", "=".repeat(42));
        println!("{}", format!($($arg)*));
        println!("{}", "=".repeat(42));
    };
}
