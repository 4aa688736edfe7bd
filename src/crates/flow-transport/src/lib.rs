pub mod commands;
pub mod encode;
pub mod error;
pub mod frames;
pub mod publisher;

pub use commands::{is_known_command, resolve_stop_criterion, StopArgs, StopCriterion, COMMAND_NAMES, VALID_STOP_MODES};
pub use encode::{encode_batch, Frame};
pub use error::{Result, TransportError};
pub use frames::{Request, Response, ResponseError, Topic, PROTOCOL_VERSION};
pub use publisher::{PublishEvent, PublisherBridge};
