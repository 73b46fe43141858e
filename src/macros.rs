#![allow(unused_macros)]

/// Builds a [`crate::Error::Verification`] with source provenance.
///
/// ```rust, ignore
///  return Err(verification_error!(method, "stack underflow at @{}", offset));
/// ```
macro_rules! verification_error {
    // Single string version
    ($method:expr, $msg:expr) => {
        crate::Error::Verification {
            method: $method,
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($method:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Verification {
            method: $method,
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let data = read_lock!(my_rwlock);
///  println!("{}", data.some_field);
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut data = write_lock!(my_rwlock);
///  data.some_field = 42;
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}
