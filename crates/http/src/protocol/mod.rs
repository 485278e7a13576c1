//! Core HTTP protocol types.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: what the request decoder
//!   produces
//! - [`RequestHeader`]: the parsed request head plus connection semantics
//! - [`ResponseHead`]: the response head handed to the header encoder
//! - [`ParseError`] / [`SendError`]: request side and response side failures

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;
pub use request::has_token;

mod response;
pub use response::ResponseHead;
pub use response::status_allows_body;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
