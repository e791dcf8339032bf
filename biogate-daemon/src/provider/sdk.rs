//! Vendor SDK status codes.

use std::borrow::Cow;

use super::CaptureError;

/// How a vendor status code affects the current capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkCode {
    Success,
    /// Capture timed out inside the SDK because no finger was presented.
    NoInput,
    Failed(CaptureError),
}

/// Human-readable description of a vendor status code.
pub fn describe_sdk_code(code: u32) -> Cow<'static, str> {
    let text = match code {
        0 => "No error",
        1 => "SGFPM object creation failed",
        2 => "Function call failed",
        3 => "Invalid parameter",
        5 => "DLL loading failed",
        6 => "Device driver loading failed",
        7 => "Algorithm DLL loading failed",
        51 => "Cannot find driver sys file",
        52 => "Chip initialization failed",
        53 => "Image data lost",
        54 => "Capture timeout - no finger detected",
        55 => "Device not found",
        56 => "Driver file load failed",
        57 => "Wrong image - no valid fingerprint detected",
        58 => "Lack of USB bandwidth",
        101 => "Inadequate number of minutiae",
        102 => "Wrong template type",
        103 => "Error decoding template 1",
        104 => "Error decoding template 2",
        other => return Cow::Owned(format!("Unknown error code: {other}")),
    };
    Cow::Borrowed(text)
}

/// Map a vendor status code onto the capture outcome policy.
pub fn classify_sdk_code(code: u32) -> SdkCode {
    match code {
        0 => SdkCode::Success,
        54 => SdkCode::NoInput,
        53 | 57 | 101 => {
            SdkCode::Failed(CaptureError::ReadFailed(describe_sdk_code(code).into_owned()))
        }
        52 | 55 | 58 => SdkCode::Failed(CaptureError::Disconnected),
        _ => SdkCode::Failed(CaptureError::Sdk {
            code,
            message: describe_sdk_code(code).into_owned(),
        }),
    }
}
