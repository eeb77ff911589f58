//! Identifiers (spec.md §3 "Identifiers").
//!
//! Entities created inside the core mint a random 128-bit value and render it
//! as hyphen-grouped hex with the UUIDv4 version/variant bits set, matching
//! `original_source/media-proxy/src/mesh/uuid.cc` byte-for-byte. Identifiers
//! that arrive from the agent (group/bridge/conn ids in `Config`) are opaque
//! strings and are wrapped in the same newtypes without re-validating shape,
//! following the `kernel::ids` newtype-with-`parse` idiom from `spark-core`.

use rand::RngCore;
use std::fmt;
use std::sync::Arc;

/// Generates a random UUIDv4, hyphen-grouped lowercase hex.
///
/// Mirrors `generate_uuid_v4()` in the original C++ implementation: 16
/// random bytes, version nibble forced to `4`, variant bits forced to the
/// RFC 4122 `10` pattern.
pub fn generate_uuid_v4() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    let mut out = String::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if i == 4 || i == 6 || i == 8 || i == 10 {
            out.push('-');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(value: impl Into<Arc<str>>) -> Self {
                Self(value.into())
            }

            pub fn generated() -> Self {
                Self(Arc::from(generate_uuid_v4()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    ConnectionId,
    "Identifier for a local (SDK-facing) connection, minted by `LocalManager`."
);
opaque_id!(
    GroupId,
    "Identifier for a multipoint group, taken verbatim from the agent config."
);
opaque_id!(
    BridgeId,
    "Identifier for a leaf bridge, taken verbatim from the agent config."
);
