pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod locator;
pub mod models;
pub mod pipe;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::config::{PipeConfig, Variant};
    pub use crate::error::{ErrorKind, PipeError};
    pub use crate::models::{chat_message, ConversationPayload, ModelEntry, UserContext};
    pub use crate::pipe::ImagePipe;
    pub use crate::telemetry::Telemetry;
    pub use crate::{dispatch, format, locator, server, telemetry};
}
