/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::{fmt::Display, io::ErrorKind};

#[derive(Debug, Clone)]
pub struct SessionError {
    /// standard error code
    exit_code: ExitCode,

    /// diagnostic message including location. Content should not be relied on.
    message: String,
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExitCode {
    /// a parameter had the wrong value or was out of bounds
    InvalidParameter = 1,
    /// growing a buffer overflowed or the allocator refused
    AllocationFailed = 2,
    /// the zstd library reported a failure (corruption, checksum, encode failure...)
    ZstdError = 3,
    /// the operation is not valid in the current session state
    InvalidState = 4,
    /// the data ended inside a frame
    IncompleteFrame = 5,
    OsError = 6,
    GeneralFailure = 7,
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}: {1}", self.exit_code, self.message)
    }
}

impl std::error::Error for SessionError {}

/// translates std::io::Error into SessionError
impl From<std::io::Error> for SessionError {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        match e.downcast::<SessionError>() {
            Ok(se) => se,
            Err(e) => {
                let caller = std::panic::Location::caller();
                SessionError {
                    exit_code: get_io_error_exit_code(&e),
                    message: format!("error {} at {}", e, caller),
                }
            }
        }
    }
}

/// translates SessionError into std::io::Error, which involves putting into a Box and using Other
impl From<SessionError> for std::io::Error {
    fn from(e: SessionError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

impl From<std::collections::TryReserveError> for SessionError {
    #[track_caller]
    fn from(e: std::collections::TryReserveError) -> Self {
        let mut e = SessionError::new(ExitCode::AllocationFailed, &e.to_string());
        e.add_context();
        e
    }
}

fn get_io_error_exit_code(e: &std::io::Error) -> ExitCode {
    match e.kind() {
        ErrorKind::OutOfMemory => ExitCode::AllocationFailed,
        ErrorKind::Other => ExitCode::GeneralFailure,
        _ => ExitCode::OsError,
    }
}

impl SessionError {
    pub fn new(exit_code: ExitCode, message: &str) -> SessionError {
        SessionError {
            exit_code,
            message: message.to_owned(),
        }
    }

    /// wraps an error code returned by the zstd library, keeping the library's own text
    pub fn zstd(operation: &str, code: usize) -> SessionError {
        SessionError {
            exit_code: ExitCode::ZstdError,
            message: format!(
                "{}: {}",
                operation,
                zstd::zstd_safe::get_error_name(code)
            ),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// appends the location of the caller to the message
    #[cold]
    #[inline(never)]
    #[track_caller]
    pub fn add_context(&mut self) {
        self.message
            .push_str(&format!("\n at {}", std::panic::Location::caller()));
    }
}

/// Adds the caller location to an error as it travels up the stack
pub trait AddContext<T> {
    #[track_caller]
    fn context(self) -> Result<T>;

    #[track_caller]
    fn with_context<FN: Fn() -> String>(self, f: FN) -> Result<T>;
}

impl<T, E: Into<SessionError>> AddContext<T> for core::result::Result<T, E> {
    #[track_caller]
    fn context(self) -> Result<T> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => {
                let mut e = e.into();
                e.add_context();
                Err(e)
            }
        }
    }

    #[track_caller]
    fn with_context<FN: Fn() -> String>(self, f: FN) -> Result<T> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => {
                let mut e = e.into();
                e.message.push_str(&format!("\n {}", f()));
                e.add_context();
                Err(e)
            }
        }
    }
}

#[cold]
#[track_caller]
pub fn err_exit_code<T>(error_code: ExitCode, message: &str) -> Result<T> {
    let mut e = SessionError::new(error_code, message);
    e.add_context();
    Err(e)
}

#[test]
fn test_error_translation() {
    // test wrapping inside an io error
    fn my_std_error() -> std::result::Result<(), std::io::Error> {
        Err(SessionError::new(ExitCode::InvalidState, "test error").into())
    }

    let e: SessionError = my_std_error().unwrap_err().into();
    assert_eq!(e.exit_code, ExitCode::InvalidState);
    assert_eq!(e.message, "test error");

    // an IO error should be translated into an OsError
    let e: SessionError =
        std::io::Error::new(std::io::ErrorKind::NotFound, "file not found").into();
    assert_eq!(e.exit_code, ExitCode::OsError);
}

#[test]
fn test_context_adds_location() {
    fn fails() -> Result<()> {
        err_exit_code(ExitCode::InvalidParameter, "bad value")
    }

    fn propagates() -> Result<()> {
        fails().context()
    }

    let e = propagates().unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
    assert!(e.message().starts_with("bad value"));
    // one location from err_exit_code, one from context()
    assert_eq!(e.message().matches("session_error.rs").count(), 2);
}

#[test]
fn test_zstd_error_keeps_library_text() {
    // a sentinel far outside the error range still produces a readable name
    let e = SessionError::zstd("decompress", usize::MAX - 9);
    assert_eq!(e.exit_code(), ExitCode::ZstdError);
    assert!(e.message().starts_with("decompress: "));
    assert!(e.message().len() > "decompress: ".len());
}
