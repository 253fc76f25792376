//! Session lifecycle: backoff connect, identity binding, inbound listening,
//! and the publish loop that ties them together.

pub mod backoff;
pub mod binder;
pub mod commands;
pub mod listener;
pub mod session_loop;

pub use backoff::{BackoffConnector, BackoffPolicy, BackoffState};
pub use binder::{BoundDeviceBinding, IdentityBinder};
pub use commands::{listen_for_config_messages, send_data_from_bound_device};
pub use listener::{DispatchHandler, InboundListener, LoggingConsumer, MessageConsumer};
pub use session_loop::{SessionLoop, SessionPhase, SessionReport};
