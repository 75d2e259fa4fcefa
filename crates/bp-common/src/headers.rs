//! Well-known header names carried by audit and failure records.

pub const MESSAGE_ID: &str = "NServiceBus.MessageId";
pub const MESSAGE_INTENT: &str = "NServiceBus.MessageIntent";
pub const ENCLOSED_MESSAGE_TYPES: &str = "NServiceBus.EnclosedMessageTypes";
pub const CONVERSATION_ID: &str = "NServiceBus.ConversationId";
pub const CONTENT_TYPE: &str = "NServiceBus.ContentType";
pub const CONTROL_MESSAGE: &str = "NServiceBus.ControlMessage";

pub const ORIGINATING_ENDPOINT: &str = "NServiceBus.OriginatingEndpoint";
pub const PROCESSING_ENDPOINT: &str = "NServiceBus.ProcessingEndpoint";

pub const TIME_SENT: &str = "NServiceBus.TimeSent";
pub const PROCESSING_STARTED: &str = "NServiceBus.ProcessingStarted";
pub const PROCESSING_ENDED: &str = "NServiceBus.ProcessingEnded";

pub const EXCEPTION_TYPE: &str = "NServiceBus.ExceptionInfo.ExceptionType";
pub const EXCEPTION_MESSAGE: &str = "NServiceBus.ExceptionInfo.Message";
pub const EXCEPTION_SOURCE: &str = "NServiceBus.ExceptionInfo.Source";
pub const EXCEPTION_STACK_TRACE: &str = "NServiceBus.ExceptionInfo.StackTrace";
pub const TIME_OF_FAILURE: &str = "NServiceBus.TimeOfFailure";
pub const FAILED_QUEUE: &str = "NServiceBus.FailedQ";

/// Explicit unique id stamped by the platform; wins over the computed one.
pub const UNIQUE_MESSAGE_ID: &str = "Backplane.UniqueMessageId";
/// Present on a retried message; names the failure record being retried.
pub const RETRY_UNIQUE_MESSAGE_ID: &str = "Backplane.Retry.UniqueMessageId";
