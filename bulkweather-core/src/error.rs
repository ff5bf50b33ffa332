use serde::Serialize;
use thiserror::Error;

/// Errors produced by the resolution pipeline.
///
/// Only [`ResolveError::EmptyBatch`] ever escapes `execute` — everything else
/// is captured into the per-item result it belongs to.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid city name: {0}")]
    InvalidCityName(String),

    #[error("City not found: {0}")]
    CityNotFound(String),

    #[error("Circuit '{0}' is open, call rejected")]
    CircuitOpen(String),

    #[error("Request must contain a non-empty list of cities")]
    EmptyBatch,

    #[error("Batch of {got} cities exceeds the maximum of {max}")]
    BatchTooLarge { got: usize, max: usize },

    #[error("Unknown circuit gate '{0}'")]
    UnknownGate(String),

    #[error("Cache backend error: {0}")]
    Cache(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable wire codes attached to per-item results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCityName,
    CityNotFound,
    CircuitOpen,
    EmptyBatch,
    BatchTooLarge,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCityName => "INVALID_CITY_NAME",
            ErrorCode::CityNotFound => "CITY_NOT_FOUND",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::EmptyBatch => "EMPTY_BATCH",
            ErrorCode::BatchTooLarge => "BATCH_TOO_LARGE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl ResolveError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ResolveError::InvalidCityName(_) => ErrorCode::InvalidCityName,
            ResolveError::CityNotFound(_) => ErrorCode::CityNotFound,
            ResolveError::CircuitOpen(_) => ErrorCode::CircuitOpen,
            ResolveError::EmptyBatch => ErrorCode::EmptyBatch,
            ResolveError::BatchTooLarge { .. } => ErrorCode::BatchTooLarge,
            ResolveError::UnknownGate(_)
            | ResolveError::Cache(_)
            | ResolveError::Http(_)
            | ResolveError::Serialization(_)
            | ResolveError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status the enclosing boundary should answer with.
    ///
    /// The mapping is exhaustive by construction; adding a variant without
    /// deciding its status is a compile error.
    pub fn status_code(&self) -> u16 {
        match self {
            ResolveError::InvalidCityName(_)
            | ResolveError::EmptyBatch
            | ResolveError::BatchTooLarge { .. } => 400,
            ResolveError::CityNotFound(_) => 404,
            ResolveError::CircuitOpen(_) => 503,
            ResolveError::UnknownGate(_)
            | ResolveError::Cache(_)
            | ResolveError::Http(_)
            | ResolveError::Serialization(_)
            | ResolveError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_names() {
        assert_eq!(
            ResolveError::InvalidCityName("x".into()).code().as_str(),
            "INVALID_CITY_NAME"
        );
        assert_eq!(
            ResolveError::CityNotFound("x".into()).code().as_str(),
            "CITY_NOT_FOUND"
        );
        assert_eq!(
            ResolveError::CircuitOpen("weather_provider".into()).code().as_str(),
            "CIRCUIT_OPEN"
        );
    }

    #[test]
    fn code_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::CityNotFound).unwrap();
        assert_eq!(json, "\"CITY_NOT_FOUND\"");
    }

    #[test]
    fn validation_errors_map_to_400() {
        assert_eq!(ResolveError::EmptyBatch.status_code(), 400);
        assert_eq!(
            ResolveError::BatchTooLarge { got: 20, max: 15 }.status_code(),
            400
        );
        assert_eq!(ResolveError::InvalidCityName("!!".into()).status_code(), 400);
    }

    #[test]
    fn not_found_maps_to_404_and_open_circuit_to_503() {
        assert_eq!(ResolveError::CityNotFound("Atlantis".into()).status_code(), 404);
        assert_eq!(ResolveError::CircuitOpen("weather_provider".into()).status_code(), 503);
    }

    #[test]
    fn infrastructure_errors_map_to_500() {
        assert_eq!(ResolveError::Cache("boom".into()).status_code(), 500);
        assert_eq!(ResolveError::UnknownGate("nope".into()).status_code(), 500);
        assert_eq!(ResolveError::Internal("bug".into()).status_code(), 500);
    }
}
