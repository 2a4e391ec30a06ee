pub mod frame;

pub use frame::{encode_frame, read_frame, write_frame, DISCONNECT, MAX_FRAME_LEN, SHUTDOWN};

use thiserror::Error;

/// 콘솔 프레임 오류. 어느 것이든 해당 연결만 끊는다.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Closed,

    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("malformed length prefix")]
    MalformedLength,

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}
