//! HTTP-Redirect Binding implementation.

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{SamlError, SamlResult};

use super::{DecodedMessage, SamlMessageType};

/// Upper bound on an inflated redirect message, against deflate bombs.
const MAX_INFLATED_LEN: u64 = 512 * 1024;

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes a SAML message into a redirect URL.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SamlResult<String> {
        let compressed = deflate_compress(xml.as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed);

        let separator = if destination.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}{}={}",
            destination,
            separator,
            message_type.form_param(),
            urlencoding::encode(&encoded)
        );

        if let Some(rs) = relay_state {
            url.push_str("&RelayState=");
            url.push_str(&urlencoding::encode(rs));
        }

        Ok(url)
    }

    /// Decodes a SAML message from already URL-decoded query values.
    ///
    /// # Errors
    ///
    /// Returns an error if neither parameter is present, or if base64
    /// decoding, inflation or UTF-8 conversion fails.
    pub fn decode(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<DecodedMessage> {
        let (encoded, message_type) = match (saml_request, saml_response) {
            (Some(req), _) => (req, SamlMessageType::Request),
            (None, Some(resp)) => (resp, SamlMessageType::Response),
            (None, None) => {
                return Err(SamlError::InvalidRequest(
                    "No SAMLRequest or SAMLResponse parameter".to_string(),
                ));
            }
        };

        let compressed = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        let xml_bytes = deflate_decompress(&compressed)?;
        let xml = String::from_utf8(xml_bytes)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
        })
    }

    /// Decodes a message from a full redirect URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or decoding fails.
    pub fn decode_url(url: &str) -> SamlResult<DecodedMessage> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid URL: {e}")))?;
        let params: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        super::decode_params(crate::types::SamlBinding::HttpRedirect, &params)
    }
}

/// Compresses data using raw DEFLATE (no zlib header).
fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SamlError::Deflate(format!("Compression error: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SamlError::Deflate(format!("Compression finish error: {e}")))
}

/// Decompresses raw DEFLATE data.
fn deflate_decompress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    DeflateDecoder::new(data)
        .take(MAX_INFLATED_LEN + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| SamlError::Deflate(format!("Decompression error: {e}")))?;
    if decompressed.len() as u64 > MAX_INFLATED_LEN {
        return Err(SamlError::Deflate("message too large".to_string()));
    }
    Ok(decompressed)
}
