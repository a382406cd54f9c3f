//! A zero-copy view over an RFC 5322 / MIME message.
//!
//! [`parse`] turns a byte buffer into a [`MessageContent`] tree: headers are
//! indexed but not copied, and multipart/message-rfc822 bodies are recursively
//! split into child [`MessageContent`] nodes that borrow from the same buffer.

pub mod content;
pub mod contenttype;
pub mod header;
pub mod lines;

pub use content::{parse, MessageBody, MessageContent, Walk};
pub use contenttype::ContentType;
pub use header::MessageHeader;
