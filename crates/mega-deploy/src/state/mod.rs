//! The durable execution-state model.
//!
//! Everything in this module is plain data: it is built exclusively by the reducer from journal
//! messages and serialized verbatim, so every type here derives `Serialize`/`Deserialize` and
//! `PartialEq`.

mod deployment;
pub use deployment::*;

mod execution;
pub use execution::*;

mod interaction;
pub use interaction::*;

mod result;
pub use result::*;

/// Serializes `u128` values as decimal strings.
///
/// Values nested in internally tagged enums are buffered by serde, and the buffer does not
/// support 128-bit integers.
pub(crate) mod u128_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<u128, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}
