//! CBOR payload of the `Auth` frame.

use crate::WireError;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Credentials as carried in an `Auth` frame
#[derive(Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Account name
    pub username: Vec<u8>,
    /// Device identifier within the account
    pub device: Vec<u8>,
    /// Device secret
    pub secret: Vec<u8>,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("device", &String::from_utf8_lossy(&self.device))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl AuthRequest {
    /// Encode as a canonical CBOR map (keys in sorted order)
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let map: BTreeMap<&str, &[u8]> = [
            ("device", self.device.as_slice()),
            ("secret", self.secret.as_slice()),
            ("username", self.username.as_slice()),
        ]
        .into_iter()
        .collect();

        let value = ciborium::Value::Map(
            map.into_iter()
                .map(|(k, v)| {
                    (
                        ciborium::Value::Text(k.to_string()),
                        ciborium::Value::Bytes(v.to_vec()),
                    )
                })
                .collect(),
        );

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).map_err(|_| WireError::Meta)?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR; every field must be present as a byte string
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let value: ciborium::Value = ciborium::from_reader(raw).map_err(|_| WireError::Meta)?;

        let ciborium::Value::Map(entries) = value else {
            return Err(WireError::Meta);
        };

        let mut fields = BTreeMap::new();
        for (key, value) in entries {
            if let (ciborium::Value::Text(key), ciborium::Value::Bytes(value)) = (key, value) {
                fields.insert(key, value);
            }
        }

        let mut take = |key: &str| fields.remove(key).ok_or(WireError::Meta);
        Ok(Self {
            username: take("username")?,
            device: take("device")?,
            secret: take("secret")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuthRequest {
        AuthRequest {
            username: b"alice".to_vec(),
            device: b"sensor-7".to_vec(),
            secret: b"s3cr3t".to_vec(),
        }
    }

    #[test]
    fn test_auth_request_cbor() {
        let encoded = request().encode().unwrap();
        assert_eq!(AuthRequest::decode(&encoded).unwrap(), request());
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let value = ciborium::Value::Map(vec![(
            ciborium::Value::Text("username".into()),
            ciborium::Value::Bytes(b"alice".to_vec()),
        )]);
        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).unwrap();

        assert_eq!(AuthRequest::decode(&buf), Err(WireError::Meta));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", request());
        assert!(rendered.contains("sensor-7"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
