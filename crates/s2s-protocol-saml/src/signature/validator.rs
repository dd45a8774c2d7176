//! XML Signature validation.

use std::ops::Range;

use base64::Engine;
use x509_parser::prelude::*;

use crate::error::{SamlError, SamlResult};

use crate::xml::dom::XmlElement;

use super::{
    build_signed_info, canonicalize, pem_to_der, CanonicalizationAlgorithm, SignatureAlgorithm,
    XmlSignature,
};

/// XML signature validator bound to a set of trusted certificates.
#[derive(Debug, Clone)]
pub struct XmlSignatureValidator {
    trusted_certificates: Vec<Vec<u8>>,
}

impl XmlSignatureValidator {
    /// Creates a validator trusting the given DER certificates.
    #[must_use]
    pub fn new(trusted_certificates: Vec<Vec<u8>>) -> Self {
        Self {
            trusted_certificates,
        }
    }

    /// Creates a validator from PEM-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if a PEM block is invalid.
    pub fn from_pem(certificates_pem: &[&str]) -> SamlResult<Self> {
        let certs = certificates_pem
            .iter()
            .map(|pem| {
                pem_to_der(pem, "CERTIFICATE")
                    .ok_or_else(|| SamlError::Crypto("Invalid certificate PEM".to_string()))
            })
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self::new(certs))
    }

    /// Validates the enveloped signature of a document.
    ///
    /// The signed element is the document root, or else the first of its
    /// direct `Assertion` children, that carries a `Signature` child. Its
    /// reference must name that element, and no other element in the
    /// document may carry the same ID. On success the parsed signature is
    /// returned; callers must check that [`XmlSignature::reference_id`]
    /// names the element they rely on.
    ///
    /// # Errors
    ///
    /// Returns `SignatureInvalid` when the document carries no signature in
    /// an accepted position, the reference is ambiguous, the digest does
    /// not match, or no trusted certificate verifies it.
    pub fn validate(&self, xml: &str) -> SamlResult<XmlSignature> {
        if self.trusted_certificates.is_empty() {
            return Err(SamlError::SignatureInvalid(
                "No trusted certificates configured".to_string(),
            ));
        }

        let root = XmlElement::parse(xml)?;
        let (signed, signature_element) = enveloped_signature(&root)?;
        let signature = read_signature(signature_element)?;

        if signed.attr("ID") != Some(signature.reference_id()) {
            return Err(SamlError::SignatureInvalid(format!(
                "Reference '{}' does not name the signed element",
                signature.reference_uri
            )));
        }
        if root.count_id(signature.reference_id()) != 1 {
            return Err(SamlError::SignatureInvalid(format!(
                "Referenced element '{}' is not unique",
                signature.reference_id()
            )));
        }
        verify_digest(xml, signed, signature_element, &signature)?;

        let signed_info = build_signed_info(
            signature.reference_id(),
            &signature.digest_value,
            signature.algorithm,
            signature.canonicalization,
        );
        let signature_bytes = base64::engine::general_purpose::STANDARD
            .decode(&signature.signature_value)
            .map_err(|e| SamlError::SignatureInvalid(format!("Invalid signature encoding: {e}")))?;

        let data = canonicalize(&signed_info);
        let verified = self.candidate_certificates(&signature)?.iter().any(|cert| {
            public_key_from_cert(cert).is_ok_and(|key| {
                s2s_crypto::rsa_verify(&key, data.as_bytes(), &signature_bytes, signature.algorithm.rsa())
            })
        });

        if verified {
            Ok(signature)
        } else {
            Err(SamlError::SignatureInvalid(
                "Signature verification failed with all trusted certificates".to_string(),
            ))
        }
    }

    /// The embedded certificate if it is trusted, else every trusted one.
    fn candidate_certificates(&self, signature: &XmlSignature) -> SamlResult<Vec<Vec<u8>>> {
        if let Some(cert_b64) = &signature.x509_certificate {
            let cert_der = base64::engine::general_purpose::STANDARD
                .decode(cert_b64)
                .map_err(|e| {
                    SamlError::SignatureInvalid(format!("Invalid certificate encoding: {e}"))
                })?;
            if self.trusted_certificates.contains(&cert_der) {
                return Ok(vec![cert_der]);
            }
        }
        Ok(self.trusted_certificates.clone())
    }
}

/// The root, or else its first direct `Assertion` child, that carries a
/// `Signature` child, paired with that signature.
fn enveloped_signature(root: &XmlElement) -> SamlResult<(&XmlElement, &XmlElement)> {
    std::iter::once(root)
        .chain(root.children("Assertion"))
        .find_map(|element| element.child("Signature").map(|signature| (element, signature)))
        .ok_or_else(|| SamlError::SignatureInvalid("No Signature element found".to_string()))
}

/// Digests the signed element's source text without its signature.
fn verify_digest(
    xml: &str,
    signed: &XmlElement,
    signature_element: &XmlElement,
    signature: &XmlSignature,
) -> SamlResult<()> {
    let source = |range: Range<usize>| {
        xml.get(range)
            .ok_or_else(|| SamlError::SignatureInvalid("Signed element out of bounds".to_string()))
    };
    let element = format!(
        "{}{}",
        source(signed.span.start..signature_element.span.start)?,
        source(signature_element.span.end..signed.span.end)?
    );
    let digest = s2s_crypto::digest(signature.algorithm.hash(), canonicalize(&element).as_bytes());
    let calculated = base64::engine::general_purpose::STANDARD.encode(digest);

    if calculated == signature.digest_value {
        Ok(())
    } else {
        Err(SamlError::SignatureInvalid("Digest value mismatch".to_string()))
    }
}

/// Reads the signature parameters from a parsed `Signature` element.
fn read_signature(element: &XmlElement) -> SamlResult<XmlSignature> {
    let missing = |what: &str| SamlError::SignatureInvalid(format!("No {what} found"));
    let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();

    let signed_info = element.child("SignedInfo").ok_or_else(|| missing("SignedInfo"))?;

    let algorithm = signed_info
        .child("SignatureMethod")
        .and_then(|method| method.attr("Algorithm"))
        .and_then(SignatureAlgorithm::from_uri)
        .ok_or_else(|| SamlError::SignatureInvalid("Unsupported signature algorithm".to_string()))?;

    let canonicalization = signed_info
        .child("CanonicalizationMethod")
        .and_then(|method| method.attr("Algorithm"))
        .and_then(CanonicalizationAlgorithm::from_uri)
        .unwrap_or_default();

    let reference = signed_info.child("Reference").ok_or_else(|| missing("Reference"))?;
    let reference_uri = reference
        .attr("URI")
        .ok_or_else(|| missing("Reference URI"))?
        .to_string();
    let digest_value = reference
        .child("DigestValue")
        .map(|value| strip(value.text()))
        .ok_or_else(|| missing("DigestValue"))?;

    let signature_value = element
        .child("SignatureValue")
        .map(|value| strip(value.text()))
        .ok_or_else(|| missing("SignatureValue"))?;

    let x509_certificate = element
        .child("KeyInfo")
        .and_then(|info| info.child("X509Data"))
        .and_then(|data| data.child("X509Certificate"))
        .map(|cert| strip(cert.text()));

    Ok(XmlSignature {
        algorithm,
        canonicalization,
        reference_uri,
        digest_value,
        signature_value,
        x509_certificate,
    })
}

/// Extracts the PKCS#1 RSA public key carried by an X.509 certificate.
fn public_key_from_cert(cert_der: &[u8]) -> SamlResult<Vec<u8>> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| SamlError::Crypto(format!("Failed to parse certificate: {e}")))?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}
