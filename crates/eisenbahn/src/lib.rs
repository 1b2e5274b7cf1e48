pub mod error;
pub mod message;
pub mod messages;
pub mod pipeline;
pub mod reqrep;
pub mod traits;
pub mod transport;

pub use error::EisenbahnError;
pub use message::Message;
pub use messages::execution;
pub use messages::ingest;
pub use messages::registry;
pub use messages::topics;
pub use pipeline::{ZmqPipelineReceiver, ZmqPipelineSender};
pub use reqrep::{ReplyToken, ZmqRequestClient, ZmqRequestServer};
pub use traits::{PipelineReceiver, PipelineSender, RequestHandler, RequestSender};
pub use transport::Transport;
