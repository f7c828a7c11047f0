// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use crate::detection::DetectorError;
use crate::network::FrameError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Accept error = {0}")]
    Accept(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// connection-local errors
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("no complete request within {0:?}")]
    ReadTimeout(Duration),

    #[error("image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// client side
    #[error("connection closed without a reply")]
    NoReply,
}

impl AppError {
    /// Whether the error only ends the current client exchange.
    ///
    /// Everything else is a process-level failure.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            AppError::Frame(_)
                | AppError::ReadTimeout(_)
                | AppError::ImageDecode(_)
                | AppError::Detector(_)
                | AppError::Serialize(_)
                | AppError::IoError(_)
                | AppError::NoReply
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_local_classification() {
        assert!(AppError::Frame(FrameError::ShortHeader { received: 2 }).is_connection_local());
        assert!(AppError::ReadTimeout(Duration::from_secs(1)).is_connection_local());
        assert!(AppError::Detector(DetectorError::Backend("boom".into())).is_connection_local());

        let bind = AppError::Bind {
            address: "0.0.0.0:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(!bind.is_connection_local());
        assert!(bind.to_string().starts_with("failed to bind 0.0.0.0:1"));
    }
}
