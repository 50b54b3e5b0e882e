//! Tensor codec for JSON fixtures
//!
//! Every tensor is written as `{shape, dtype, data}` where `data` is the
//! standard base64 encoding of its row-major little-endian bytes:
//! - `TensorJson`: one encoded tensor record
//! - `TensorFixture`: a `config` entry plus ordered tensor records

mod fixture_file;
mod tensor_json;

pub use fixture_file::TensorFixture;
pub use tensor_json::{decode_tensor, dtype_name, encode_tensor, parse_dtype_name, TensorJson};
