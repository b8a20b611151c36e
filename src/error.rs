use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorType {
    FormatMismatch,
    Truncated,
    ChecksumInvalid,
    DeviceRejected,
    DeviceError,
    Timeout,
    InvalidIndex,
    InvalidValue,
    StreamConflict,
    RuntimeError,
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub error_type: ErrorType,
    pub message: String,
    /// Vendor error code, set for `DeviceError`.
    pub code: Option<u8>,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}; {}", self.error_type, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
            code: None,
        }
    }

    pub fn timeout() -> Self {
        Self::new(ErrorType::Timeout, "".to_string())
    }

    pub fn rejected() -> Self {
        Self::new(
            ErrorType::DeviceRejected,
            "device sent rejection".to_string(),
        )
    }

    pub fn device(code: u8) -> Self {
        Self {
            error_type: ErrorType::DeviceError,
            message: format!("device error code {:02x}", code),
            code: Some(code),
        }
    }

    pub fn invalid_index(index: u8, limit: u8) -> Self {
        Self::new(
            ErrorType::InvalidIndex,
            format!("index {} out of range (0..{})", index, limit),
        )
    }

    pub fn invalid_value(message: &str) -> Self {
        Self::new(ErrorType::InvalidValue, message.to_string())
    }

    pub fn conflict(message: &str) -> Self {
        Self::new(ErrorType::StreamConflict, message.to_string())
    }

    pub fn runtime(message: &str) -> Self {
        Self::new(ErrorType::RuntimeError, message.to_string())
    }
}
