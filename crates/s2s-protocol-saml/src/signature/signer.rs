//! XML Signature creation.

use base64::Engine;

use crate::error::{SamlError, SamlResult};

use crate::xml::dom::XmlElement;

use super::{build_signed_info, canonicalize, find_by_id, pem_to_der, SignatureConfig};

/// XML document signer.
#[derive(Clone)]
pub struct XmlSigner {
    private_key_der: Vec<u8>,
    certificate_der: Option<Vec<u8>>,
    config: SignatureConfig,
}

impl std::fmt::Debug for XmlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlSigner")
            .field("certificate", &self.certificate_der.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl XmlSigner {
    /// Creates a signer from a DER private key (PKCS#1 or PKCS#8) and an
    /// optional DER certificate.
    #[must_use]
    pub fn new(private_key_der: Vec<u8>, certificate_der: Option<Vec<u8>>) -> Self {
        Self {
            private_key_der,
            certificate_der,
            config: SignatureConfig::default(),
        }
    }

    /// Creates a signer from PEM-encoded key and certificate.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if no private key block is found.
    pub fn from_pem(private_key_pem: &str, certificate_pem: Option<&str>) -> SamlResult<Self> {
        let private_key_der = pem_to_der(private_key_pem, "PRIVATE KEY")
            .or_else(|| pem_to_der(private_key_pem, "RSA PRIVATE KEY"))
            .ok_or_else(|| SamlError::Crypto("Invalid private key PEM".to_string()))?;

        let certificate_der = certificate_pem.and_then(|pem| pem_to_der(pem, "CERTIFICATE"));

        Ok(Self::new(private_key_der, certificate_der))
    }

    /// Sets the signature configuration.
    #[must_use]
    pub fn with_config(mut self, config: SignatureConfig) -> Self {
        self.config = config;
        self
    }

    /// Signs the element whose `ID` is `reference_id` and returns the
    /// document with a `<ds:Signature>` inserted after that element's
    /// `Issuer` (or directly after its start tag when it has none).
    ///
    /// # Errors
    ///
    /// Returns `SignatureCreation` if the element cannot be located, its ID
    /// is not unique, or the RSA operation fails.
    pub fn sign(&self, xml: &str, reference_id: &str) -> SamlResult<String> {
        let root = XmlElement::parse(xml)
            .map_err(|e| SamlError::SignatureCreation(format!("Unreadable document: {e}")))?;
        let element = find_by_id(&root, reference_id)
            .filter(|element| element.start_tag_end < element.span.end)
            .ok_or_else(|| {
                SamlError::SignatureCreation(format!(
                    "Element with ID '{reference_id}' not found or not unique"
                ))
            })?;

        let canonical_element = canonicalize(&xml[element.span.clone()]);
        let digest = s2s_crypto::digest(self.config.algorithm.hash(), canonical_element.as_bytes());
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(digest);

        let signed_info = build_signed_info(
            reference_id,
            &digest_b64,
            self.config.algorithm,
            self.config.canonicalization,
        );
        let signature_value = s2s_crypto::rsa_sign(
            &self.private_key_der,
            canonicalize(&signed_info).as_bytes(),
            self.config.algorithm.rsa(),
        )
        .map_err(|e| SamlError::SignatureCreation(e.to_string()))?;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature_value);

        let signature_element = self.signature_element(&signed_info, &signature_b64);
        let insert_at = element
            .child("Issuer")
            .map_or(element.start_tag_end, |issuer| issuer.span.end);

        let mut signed = String::with_capacity(xml.len() + signature_element.len());
        signed.push_str(&xml[..insert_at]);
        signed.push_str(&signature_element);
        signed.push_str(&xml[insert_at..]);
        Ok(signed)
    }

    fn signature_element(&self, signed_info: &str, signature_b64: &str) -> String {
        let key_info = match (&self.certificate_der, self.config.include_certificate) {
            (Some(cert), true) => format!(
                "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
                base64::engine::general_purpose::STANDARD.encode(cert)
            ),
            _ => String::new(),
        };

        format!(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{signed_info}<ds:SignatureValue>{signature_b64}</ds:SignatureValue>{key_info}</ds:Signature>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pem_requires_key_block() {
        let err = XmlSigner::from_pem("not a pem", None).unwrap_err();
        assert!(matches!(err, SamlError::Crypto(_)));
    }

    #[test]
    fn sign_unknown_id_fails() {
        let signer = XmlSigner::new(vec![1, 2, 3], None);
        let err = signer.sign("<a ID=\"_x\"></a>", "_y").unwrap_err();
        assert!(matches!(err, SamlError::SignatureCreation(_)));
    }

    #[test]
    fn sign_requires_unique_id() {
        let signer = XmlSigner::new(vec![1, 2, 3], None);
        let err = signer
            .sign(r#"<r><a ID="_x"></a><b><a ID='_x'></a></b></r>"#, "_x")
            .unwrap_err();
        assert!(matches!(err, SamlError::SignatureCreation(_)));
    }
}
