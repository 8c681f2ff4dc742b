//! Wire-level mini-protocol for combined model responses

pub mod parser;

pub use parser::{ParseError, ParserEvent, ResponseParser, TABLE_CLOSE, TABLE_OPEN};
