/// Configuration loading: defaults, TOML file, environment.
pub mod config;
/// Flexible logging (filters, console and file sinks).
pub mod logging;
/// Wire format: events and frame codec.
pub mod protocol;
/// Publishing side: publication sequencer and publisher.
pub mod publish;
/// Subscribing side: callbacks, registry, receive loop, pool.
pub mod subscribe;
/// Transport boundary and its TCP and in-memory implementations.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use self::config::Settings;
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Events and decoded messages.
pub use protocol::{BulkPayload, Event, Message, Payload};
/// Publisher API.
pub use publish::{PublicationSequencer, Publisher};
/// Error taxonomy.
pub use pubcast_error::{
    CallbackError, ConfigError, DecodeError, ErrorExt, FrameError, FramingError, PublishError,
    RegistrationError, StatusCode, TransportError,
};
/// Subscriber API.
pub use subscribe::{
    callback, Callback, CallbackRegistry, CallbackResult, SharedCallback, Subscriber,
    SubscriberConfig, SubscriberPool, SubscriberState,
};
/// Transports.
pub use transport::{Endpoint, MemoryHub, TcpConnector, TcpPublisher};
