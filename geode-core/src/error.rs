//! Error types for Geode client operations.

use std::io;
use thiserror::Error;

/// The main error type for Geode client operations.
#[derive(Debug, Error)]
pub enum GeodeError {
    /// Connection-related errors (network failures, disconnections).
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol-related errors (unexpected message type or part shape).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout errors.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// The server requires credentials that were not supplied.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    /// The server rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Another client with the same durable id is already connected.
    #[error("duplicate durable client: {0}")]
    DuplicateDurableClient(String),

    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// The server only accepts SSL connections and the client is not
    /// configured for SSL.
    #[error("ssl required: {0}")]
    SslRequired(String),

    /// The authenticated principal may not perform the operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// An exception raised on the server and returned in an EXCEPTION reply.
    #[error("server exception{}: {message}", class_suffix(.class_name))]
    Server {
        /// Fully qualified server-side exception class, when reported.
        class_name: Option<String>,
        /// Server-supplied message.
        message: String,
    },

    /// No partition metadata or resolver result is available.
    #[error("routing unavailable: {0}")]
    RoutingUnavailable(String),

    /// The object is in a state that does not permit the operation.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An argument failed validation.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A continuous query with the same name is already registered.
    #[error("cq already exists: {0}")]
    CqExists(String),

    /// The continuous query has been closed.
    #[error("cq closed: {0}")]
    CqClosed(String),

    /// The continuous query is not running.
    #[error("cq not running: {0}")]
    CqNotRunning(String),

    /// The server rejected a continuous query request.
    #[error("cq query error: {0}")]
    CqQuery(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

const CLASS_MESSAGE_SEPARATOR: &str = ": ";

fn class_suffix(class_name: &Option<String>) -> String {
    class_name
        .as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default()
}

impl GeodeError {
    /// Translates the message part of an EXCEPTION reply into a typed error.
    ///
    /// Servers send `"<java class name>: <message>"`; the class name picks the
    /// variant and anything unrecognised becomes [`GeodeError::Server`].
    pub fn from_server_exception(text: &str) -> Self {
        let (class_name, message) = match text.split_once(CLASS_MESSAGE_SEPARATOR) {
            Some((class, msg)) if !class.contains(char::is_whitespace) => {
                (Some(class.to_string()), msg.to_string())
            }
            _ => (None, text.to_string()),
        };

        let simple = class_name
            .as_deref()
            .and_then(|c| c.rsplit('.').next())
            .unwrap_or_default();

        match simple {
            "NotAuthorizedException" => GeodeError::NotAuthorized(message),
            "AuthenticationRequiredException" => GeodeError::AuthenticationRequired(message),
            "AuthenticationFailedException" => GeodeError::AuthenticationFailed(message),
            "CqExistsException" => GeodeError::CqExists(message),
            "CqClosedException" => GeodeError::CqClosed(message),
            "CqException" | "CqQueryException" => GeodeError::CqQuery(message),
            _ => GeodeError::Server {
                class_name,
                message,
            },
        }
    }

    /// Returns true if the connection that produced this error must be discarded.
    ///
    /// A timeout or I/O failure leaves the stream at an unknown position.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            GeodeError::Timeout(_) | GeodeError::Connection(_) | GeodeError::Io(_)
        )
    }

    /// Returns true if the failed request may be retried on another server.
    pub fn is_retryable(&self) -> bool {
        self.is_connection_fatal()
    }
}

impl Clone for GeodeError {
    /// Copies the error; an I/O error keeps its kind and message.
    fn clone(&self) -> Self {
        match self {
            GeodeError::Connection(m) => GeodeError::Connection(m.clone()),
            GeodeError::Protocol(m) => GeodeError::Protocol(m.clone()),
            GeodeError::Serialization(m) => GeodeError::Serialization(m.clone()),
            GeodeError::Timeout(m) => GeodeError::Timeout(m.clone()),
            GeodeError::AuthenticationRequired(m) => GeodeError::AuthenticationRequired(m.clone()),
            GeodeError::AuthenticationFailed(m) => GeodeError::AuthenticationFailed(m.clone()),
            GeodeError::DuplicateDurableClient(m) => GeodeError::DuplicateDurableClient(m.clone()),
            GeodeError::HandshakeRejected(m) => GeodeError::HandshakeRejected(m.clone()),
            GeodeError::SslRequired(m) => GeodeError::SslRequired(m.clone()),
            GeodeError::NotAuthorized(m) => GeodeError::NotAuthorized(m.clone()),
            GeodeError::Server {
                class_name,
                message,
            } => GeodeError::Server {
                class_name: class_name.clone(),
                message: message.clone(),
            },
            GeodeError::RoutingUnavailable(m) => GeodeError::RoutingUnavailable(m.clone()),
            GeodeError::IllegalState(m) => GeodeError::IllegalState(m.clone()),
            GeodeError::IllegalArgument(m) => GeodeError::IllegalArgument(m.clone()),
            GeodeError::CqExists(m) => GeodeError::CqExists(m.clone()),
            GeodeError::CqClosed(m) => GeodeError::CqClosed(m.clone()),
            GeodeError::CqNotRunning(m) => GeodeError::CqNotRunning(m.clone()),
            GeodeError::CqQuery(m) => GeodeError::CqQuery(m.clone()),
            GeodeError::Configuration(m) => GeodeError::Configuration(m.clone()),
            GeodeError::Io(e) => GeodeError::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// A specialized `Result` type for Geode client operations.
pub type Result<T> = std::result::Result<T, GeodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = GeodeError::Connection("failed to connect to server".to_string());
        assert_eq!(
            err.to_string(),
            "connection error: failed to connect to server"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = GeodeError::Protocol("unknown message type 250".to_string());
        assert_eq!(err.to_string(), "protocol error: unknown message type 250");
    }

    #[test]
    fn test_timeout_error_display() {
        let err = GeodeError::Timeout("no reply within 15s".to_string());
        assert_eq!(err.to_string(), "timeout error: no reply within 15s");
    }

    #[test]
    fn test_handshake_error_displays() {
        assert_eq!(
            GeodeError::AuthenticationRequired("no credentials".into()).to_string(),
            "authentication required: no credentials"
        );
        assert_eq!(
            GeodeError::AuthenticationFailed("bad password".into()).to_string(),
            "authentication failed: bad password"
        );
        assert_eq!(
            GeodeError::DuplicateDurableClient("client-1".into()).to_string(),
            "duplicate durable client: client-1"
        );
        assert_eq!(
            GeodeError::HandshakeRejected("server shutting down".into()).to_string(),
            "handshake rejected: server shutting down"
        );
        assert_eq!(
            GeodeError::SslRequired("enable SSL".into()).to_string(),
            "ssl required: enable SSL"
        );
    }

    #[test]
    fn test_cq_error_displays() {
        assert_eq!(
            GeodeError::CqExists("cq1".into()).to_string(),
            "cq already exists: cq1"
        );
        assert_eq!(GeodeError::CqClosed("cq1".into()).to_string(), "cq closed: cq1");
        assert_eq!(
            GeodeError::CqNotRunning("cq1".into()).to_string(),
            "cq not running: cq1"
        );
    }

    #[test]
    fn test_server_error_display_with_class() {
        let err = GeodeError::Server {
            class_name: Some("org.apache.geode.cache.CacheWriterException".into()),
            message: "veto".into(),
        };
        assert_eq!(
            err.to_string(),
            "server exception (org.apache.geode.cache.CacheWriterException): veto"
        );
    }

    #[test]
    fn test_server_error_display_without_class() {
        let err = GeodeError::Server {
            class_name: None,
            message: "something failed".into(),
        };
        assert_eq!(err.to_string(), "server exception: something failed");
    }

    #[test]
    fn test_from_server_exception_not_authorized() {
        let err = GeodeError::from_server_exception(
            "org.apache.geode.security.NotAuthorizedException: not allowed to PUT",
        );
        assert!(matches!(err, GeodeError::NotAuthorized(ref m) if m == "not allowed to PUT"));
    }

    #[test]
    fn test_from_server_exception_cq_exists() {
        let err =
            GeodeError::from_server_exception("org.apache.geode.cache.query.CqExistsException: cq1");
        assert!(matches!(err, GeodeError::CqExists(_)));
    }

    #[test]
    fn test_from_server_exception_generic() {
        let err = GeodeError::from_server_exception(
            "org.apache.geode.cache.client.ServerOperationException: remote failure",
        );
        match err {
            GeodeError::Server {
                class_name,
                message,
            } => {
                assert_eq!(
                    class_name.as_deref(),
                    Some("org.apache.geode.cache.client.ServerOperationException")
                );
                assert_eq!(message, "remote failure");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_from_server_exception_plain_text() {
        let err = GeodeError::from_server_exception("region was destroyed: /Portfolios");
        match err {
            GeodeError::Server {
                class_name,
                message,
            } => {
                assert!(class_name.is_none());
                assert_eq!(message, "region was destroyed: /Portfolios");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_connection_fatal_classification() {
        assert!(GeodeError::Timeout("t".into()).is_connection_fatal());
        assert!(GeodeError::Connection("c".into()).is_connection_fatal());
        assert!(!GeodeError::Protocol("p".into()).is_connection_fatal());
        assert!(!GeodeError::CqClosed("q".into()).is_connection_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: GeodeError = io_err.into();
        assert!(matches!(err, GeodeError::Io(_)));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GeodeError>();
    }

    #[test]
    fn test_clone_keeps_variant() {
        let err = GeodeError::Server {
            class_name: Some("java.lang.IllegalStateException".into()),
            message: "bucket moved".into(),
        };
        assert_eq!(err.clone().to_string(), err.to_string());

        let io = GeodeError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        match io.clone() {
            GeodeError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
                assert_eq!(e.to_string(), "pipe closed");
            }
            other => panic!("unexpected clone {:?}", other),
        }
    }
}
