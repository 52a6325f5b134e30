//! Hand-written CSV reading.
//!
//! - [`tokenizer`] - bespoke quote/backslash scanner producing raw fields
//! - [`encoding`] - charset decoding/encoding and delimiter detection

pub mod encoding;
pub mod tokenizer;

pub use encoding::{
    decode_content, detect_delimiter, detect_encoding, encode_content, format_delimiter,
    AUTO_CHARSET,
};
pub use tokenizer::{bom_len, clean_field, count_rows, split_line, RawLine, Tokenizer};
