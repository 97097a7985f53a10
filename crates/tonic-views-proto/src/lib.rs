#![doc = include_str!("../README.md")]

use prost::Message;
use prost_types::FileDescriptorSet;

pub mod test {
    tonic::include_proto!("test");
}

pub use test::{Empty, GetPayload, User, test_service_client::TestServiceClient};

/// Fully-qualified name of the demo service.
pub const TEST_SERVICE: &str = "test.TestService";

/// Encoded descriptor set of `test.proto`.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/test_descriptor.bin"));

/// Decodes [`FILE_DESCRIPTOR_SET`].
///
/// # Errors
///
/// Fails only if the embedded bytes are corrupt.
pub fn file_descriptor_set() -> Result<FileDescriptorSet, prost::DecodeError> {
    FileDescriptorSet::decode(FILE_DESCRIPTOR_SET)
}
