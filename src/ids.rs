//! ULID-backed identifier newtypes.
//!
//! Both identifiers share one implementation: sortable, collision-free,
//! serialized as the canonical 26-character ULID string.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

macro_rules! ulid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(Ulid);

        impl $name {
            pub fn new() -> Self {
                $name(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map($name)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_newtype! {
    /// Per-request identifier for tracing and correlation.
    RequestId
}

ulid_newtype! {
    /// Stable identifier for a streaming client connection, assigned at
    /// upgrade.
    ClientId
}

impl RequestId {
    /// Parse a client-supplied correlation header, minting a fresh id when
    /// the header is absent or not a ULID.
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let request_id = RequestId::new();
        assert_eq!(request_id, request_id.to_string().parse().unwrap());

        let client_id = ClientId::new();
        assert_eq!(client_id, client_id.to_string().parse().unwrap());
    }

    #[test]
    fn correlation_header_falls_back_to_fresh_id() {
        let forged = RequestId::from_header_or_new(Some("not-a-ulid"));
        let absent = RequestId::from_header_or_new(None);
        assert_ne!(forged, absent);

        let reused = RequestId::new();
        let parsed = RequestId::from_header_or_new(Some(&reused.to_string()));
        assert_eq!(parsed, reused);
    }
}
