//! Serialization primitives for Geode's binary format.

mod cacheable;
mod data_input;
mod data_output;
pub mod modified_utf8;
mod traits;

pub use cacheable::{CacheableValue, DsCode, CLIENT_PROXY_MEMBERSHIP_ID, OBJECT_ARRAY_ELEMENT_CLASS};
pub use data_input::{DataInput, ObjectDataInput};
pub use data_output::{DataOutput, ObjectDataOutput};
pub use traits::{Deserializable, Serializable};
