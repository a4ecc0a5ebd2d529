use std::fmt;

/// Classified generation failure. Tells the caller *why* the stream failed
/// so it can show an actionable message instead of a raw transport error.
#[derive(Debug, Clone)]
pub struct GenerateError {
    pub kind: GenerateErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateErrorKind {
    /// Endpoint unreachable: connect refused, DNS failure, reset.
    ConnectionUnavailable,
    /// Connection-establishment or overall request deadline fired.
    Timeout,
    /// Explicit error frame, HTTP error status, or the stream ended
    /// without a completion marker.
    Protocol,
    /// Stream completed without yielding a single fragment.
    EmptyResponse,
    /// A generation is already in flight on this controller.
    Busy,
}

impl GenerateError {
    fn new(kind: GenerateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn connection_unavailable(message: impl Into<String>) -> Self {
        Self::new(GenerateErrorKind::ConnectionUnavailable, message)
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerateErrorKind::Timeout, message)
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::new(GenerateErrorKind::Protocol, message)
    }

    pub(crate) fn empty_response() -> Self {
        Self::new(
            GenerateErrorKind::EmptyResponse,
            "stream completed with zero fragments",
        )
    }

    pub(crate) fn busy() -> Self {
        Self::new(
            GenerateErrorKind::Busy,
            "a generation is already in flight",
        )
    }

    /// Classify a reqwest transport failure.
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::connection_unavailable(err.to_string())
        }
    }

    /// User-facing summary suitable for a notification bubble.
    pub fn user_message(&self) -> String {
        match self.kind {
            GenerateErrorKind::ConnectionUnavailable => {
                "Cannot reach the inference server. Make sure it is running and \
                 the configured base_url is correct."
                    .to_string()
            }
            GenerateErrorKind::Timeout => {
                "The inference server took too long to respond. Try again, or \
                 switch to a smaller model."
                    .to_string()
            }
            GenerateErrorKind::Protocol => {
                format!("The inference server sent an invalid response: {}", self.message)
            }
            GenerateErrorKind::EmptyResponse => {
                "The model returned an empty response. Try rephrasing your request.".to_string()
            }
            GenerateErrorKind::Busy => {
                "A response is already being generated. Wait for it to finish or \
                 cancel it first."
                    .to_string()
            }
        }
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation failed ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for GenerateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_distinct_per_kind() {
        let errors = [
            GenerateError::connection_unavailable("refused"),
            GenerateError::timeout("deadline"),
            GenerateError::protocol("bad frame"),
            GenerateError::empty_response(),
            GenerateError::busy(),
        ];
        for (i, a) in errors.iter().enumerate() {
            for b in errors.iter().skip(i + 1) {
                assert_ne!(a.user_message(), b.user_message());
            }
        }
    }

    #[test]
    fn protocol_message_carries_detail() {
        let err = GenerateError::protocol("server reported: model not found");
        assert!(err.user_message().contains("model not found"));
    }
}
