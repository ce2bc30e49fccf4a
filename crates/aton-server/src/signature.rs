//! Signing authority adapter.
//!
//! A transmitted Message 21 is stamped with its transmission time and sent
//! to the signing authority. The stamp is the message bits packed into bytes
//! followed by the UNIX timestamp as a big-endian `i64`.
//!
//! Software-radio stations sign the SHA-256 digest of the stamp; VDES-1000
//! stations sign the stamp itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use aton_core::config::SignerSettings;
use aton_protocol::EncodedMessage;

use crate::error::SigningError;

/// A request to the signing authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    /// Identifier of the message being signed.
    pub message_id: String,
    pub mmsi: String,
    pub algorithm: String,
    pub entity_type: String,
    pub payload: Vec<u8>,
}

/// Anything able to produce a signature.
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn generate(&self, request: SignatureRequest) -> Result<Vec<u8>, SigningError>;
}

/// Signing authority reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSignatureProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignatureProvider {
    pub fn new(settings: &SignerSettings) -> Result<Self, SigningError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, message_id: &str) -> String {
        format!(
            "{}/api/signature/entity/generate/{}",
            self.base_url, message_id
        )
    }
}

#[async_trait]
impl SignatureProvider for HttpSignatureProvider {
    async fn generate(&self, request: SignatureRequest) -> Result<Vec<u8>, SigningError> {
        let res = self
            .client
            .post(self.endpoint(&request.message_id))
            .query(&[
                ("mmsi", request.mmsi.as_str()),
                ("algorithm", request.algorithm.as_str()),
                ("entityType", request.entity_type.as_str()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(request.payload)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(SigningError::Status(res.status().as_u16()));
        }

        let signature = res.bytes().await?;
        if signature.is_empty() {
            return Err(SigningError::EmptySignature);
        }
        Ok(signature.to_vec())
    }
}

/// What is handed to the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampEncoding {
    /// SHA-256 digest of the stamp.
    Digest,
    /// The stamp bytes as they are.
    Raw,
}

/// A signature together with the timestamp it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub signature: Vec<u8>,
    pub timestamp: i64,
}

impl SignedPayload {
    /// Payload of the Message 6/8 carrying the signature.
    ///
    /// The two low-order bytes of the timestamp follow the signature.
    pub fn to_ais_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.signature.len() + 2);
        payload.extend_from_slice(&self.signature);
        payload.extend_from_slice(&self.timestamp.to_be_bytes()[6..]);
        payload
    }

    /// Payload of the VDE data channel: the bare signature.
    pub fn to_vde_payload(&self) -> Vec<u8> {
        self.signature.clone()
    }
}

/// Stamp an encoded message with its transmission time.
pub fn stamp(message: &EncodedMessage, timestamp: i64) -> Vec<u8> {
    let mut stamped = message.to_bytes();
    stamped.extend_from_slice(&timestamp.to_be_bytes());
    stamped
}

/// SHA-256 of a stamped message.
pub fn digest(stamped: &[u8]) -> Vec<u8> {
    Sha256::digest(stamped).to_vec()
}

/// Shapes signing requests for the advertisers.
#[derive(Clone)]
pub struct SignatureAdapter {
    provider: Arc<dyn SignatureProvider>,
    algorithm: String,
    entity_type: String,
}

impl SignatureAdapter {
    pub fn new(provider: Arc<dyn SignatureProvider>, settings: &SignerSettings) -> Self {
        Self {
            provider,
            algorithm: settings.algorithm.clone(),
            entity_type: settings.entity_type.clone(),
        }
    }

    /// Sign a transmitted message.
    pub async fn sign(
        &self,
        uid: &str,
        mmsi: u32,
        message: &EncodedMessage,
        timestamp: i64,
        encoding: StampEncoding,
    ) -> Result<SignedPayload, SigningError> {
        let stamped = stamp(message, timestamp);
        let payload = match encoding {
            StampEncoding::Digest => digest(&stamped),
            StampEncoding::Raw => stamped,
        };
        debug!(
            "Requesting signature for {} over {}",
            uid,
            hex::encode(&payload)
        );

        let signature = self
            .provider
            .generate(SignatureRequest {
                message_id: uid.to_string(),
                mmsi: mmsi.to_string(),
                algorithm: self.algorithm.clone(),
                entity_type: self.entity_type.clone(),
                payload,
            })
            .await?;

        debug!("Signature for {}: {}", uid, hex::encode(&signature));
        Ok(SignedPayload {
            signature,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aton_protocol::encode_message8;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records requests and answers with a fixed signature.
    struct RecordingProvider {
        requests: Mutex<Vec<SignatureRequest>>,
    }

    #[async_trait]
    impl SignatureProvider for RecordingProvider {
        async fn generate(&self, request: SignatureRequest) -> Result<Vec<u8>, SigningError> {
            self.requests.lock().unwrap().push(request);
            Ok(vec![0xDE, 0xAD, 0xBE, 0xEF])
        }
    }

    fn adapter() -> (Arc<RecordingProvider>, SignatureAdapter) {
        let provider = Arc::new(RecordingProvider {
            requests: Mutex::new(Vec::new()),
        });
        let adapter = SignatureAdapter::new(provider.clone(), &SignerSettings::default());
        (provider, adapter)
    }

    #[test]
    fn test_stamp_layout() {
        let msg = encode_message8(123456789, b"XXX").unwrap();
        let stamped = stamp(&msg, 0x0102_0304_0506_0708);

        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 11); // 84 padded bits
        assert_eq!(&stamped[..11], bytes.as_slice());
        assert_eq!(&stamped[11..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_digest_is_sha256() {
        assert_eq!(
            hex::encode(digest(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_ais_payload_appends_low_timestamp_bytes() {
        let signed = SignedPayload {
            signature: vec![0xAA, 0xBB],
            timestamp: 0x6000_1234,
        };
        assert_eq!(signed.to_ais_payload(), vec![0xAA, 0xBB, 0x12, 0x34]);
        assert_eq!(signed.to_vde_payload(), vec![0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_sign_digest_request() {
        let (provider, adapter) = adapter();
        let msg = encode_message8(123456789, b"XXX").unwrap();

        let signed = adapter
            .sign("aton-1", 123456789, &msg, 1_700_000_000, StampEncoding::Digest)
            .await
            .unwrap();
        assert_eq!(signed.signature, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(signed.timestamp, 1_700_000_000);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message_id, "aton-1");
        assert_eq!(requests[0].mmsi, "123456789");
        assert_eq!(requests[0].algorithm, "SHA256withECDSA");
        assert_eq!(requests[0].entity_type, "device");
        assert_eq!(requests[0].payload, digest(&stamp(&msg, 1_700_000_000)));
    }

    #[tokio::test]
    async fn test_sign_raw_request() {
        let (provider, adapter) = adapter();
        let msg = encode_message8(123456789, b"XXX").unwrap();

        adapter
            .sign("aton-1", 123456789, &msg, 42, StampEncoding::Raw)
            .await
            .unwrap();
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].payload, stamp(&msg, 42));
    }

    #[test]
    fn test_http_endpoint() {
        let settings = SignerSettings {
            url: "http://signer.local:8444/".to_string(),
            ..Default::default()
        };
        let provider = HttpSignatureProvider::new(&settings).unwrap();
        assert_eq!(
            provider.endpoint("aton-1"),
            "http://signer.local:8444/api/signature/entity/generate/aton-1"
        );
    }
}
