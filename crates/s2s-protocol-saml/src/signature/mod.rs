//! Enveloped XML signatures for SAML messages.
//!
//! Signing and validation share one SignedInfo template and one
//! canonical form (whitespace-normalized text with the `Signature` element
//! removed). Signed elements are resolved on the parsed tree and digested
//! over their exact source bytes. The proxy only exchanges documents it serializes compactly
//! itself or that its peers produced with the same rules.

mod signer;
mod validator;

pub use signer::*;
pub use validator::*;

use base64::Engine;
use s2s_crypto::{HashAlgorithm, RsaAlgorithm};

use crate::xml::dom::XmlElement;

const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-256.
    #[default]
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        self.rsa().xml_dsig_uri()
    }

    /// Returns the corresponding digest algorithm URI.
    #[must_use]
    pub const fn digest_uri(&self) -> &'static str {
        match self {
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        [Self::RsaSha256, Self::RsaSha384, Self::RsaSha512]
            .into_iter()
            .find(|alg| alg.uri() == uri)
    }

    /// Parses a configuration name such as `rsa-sha256`, or a URI.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rsa-sha256" => Some(Self::RsaSha256),
            "rsa-sha384" => Some(Self::RsaSha384),
            "rsa-sha512" => Some(Self::RsaSha512),
            _ => Self::from_uri(value),
        }
    }

    pub(crate) const fn rsa(&self) -> RsaAlgorithm {
        match self {
            Self::RsaSha256 => RsaAlgorithm::Rs256,
            Self::RsaSha384 => RsaAlgorithm::Rs384,
            Self::RsaSha512 => RsaAlgorithm::Rs512,
        }
    }

    pub(crate) const fn hash(&self) -> HashAlgorithm {
        match self {
            Self::RsaSha256 => HashAlgorithm::Sha256,
            Self::RsaSha384 => HashAlgorithm::Sha384,
            Self::RsaSha512 => HashAlgorithm::Sha512,
        }
    }
}

/// Canonicalization algorithm advertised in SignedInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanonicalizationAlgorithm {
    /// Exclusive C14N without comments.
    #[default]
    ExclusiveC14N,
    /// C14N without comments.
    C14N,
}

impl CanonicalizationAlgorithm {
    /// Returns the URI for this canonicalization algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::ExclusiveC14N => "http://www.w3.org/2001/10/xml-exc-c14n#",
            Self::C14N => "http://www.w3.org/TR/2001/REC-xml-c14n-20010315",
        }
    }

    /// Parses a canonicalization algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        [Self::ExclusiveC14N, Self::C14N]
            .into_iter()
            .find(|alg| alg.uri() == uri)
    }
}

/// Signature configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureConfig {
    /// Signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// Canonicalization algorithm.
    pub canonicalization: CanonicalizationAlgorithm,
    /// Whether to embed the signing certificate in KeyInfo.
    pub include_certificate: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::RsaSha256,
            canonicalization: CanonicalizationAlgorithm::ExclusiveC14N,
            include_certificate: true,
        }
    }
}

/// Parts of a signature extracted from a signed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSignature {
    /// Signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// Canonicalization algorithm.
    pub canonicalization: CanonicalizationAlgorithm,
    /// Reference URI, `#` followed by the signed element's ID.
    pub reference_uri: String,
    /// Base64 digest value.
    pub digest_value: String,
    /// Base64 signature value.
    pub signature_value: String,
    /// Embedded base64 certificate, if any.
    pub x509_certificate: Option<String>,
}

impl XmlSignature {
    /// Returns the ID of the signed element.
    #[must_use]
    pub fn reference_id(&self) -> &str {
        self.reference_uri
            .strip_prefix('#')
            .unwrap_or(&self.reference_uri)
    }
}

/// Extracts DER data from the first PEM block with the given label.
#[must_use]
pub fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = pem.find(&begin)? + begin.len();
    let end_pos = start + pem[start..].find(&end)?;

    let b64_data: String = pem[start..end_pos]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD.decode(b64_data).ok()
}

/// Builds the SignedInfo element for a reference to `reference_id`.
fn build_signed_info(
    reference_id: &str,
    digest_b64: &str,
    algorithm: SignatureAlgorithm,
    canonicalization: CanonicalizationAlgorithm,
) -> String {
    format!(
        concat!(
            r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#,
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
            r#"<ds:SignatureMethod Algorithm="{sig}"/>"#,
            r##"<ds:Reference URI="#{id}">"##,
            r#"<ds:Transforms>"#,
            r#"<ds:Transform Algorithm="{enveloped}"/>"#,
            r#"<ds:Transform Algorithm="{c14n}"/>"#,
            r#"</ds:Transforms>"#,
            r#"<ds:DigestMethod Algorithm="{digest}"/>"#,
            r#"<ds:DigestValue>{value}</ds:DigestValue>"#,
            r#"</ds:Reference>"#,
            r#"</ds:SignedInfo>"#
        ),
        c14n = canonicalization.uri(),
        sig = algorithm.uri(),
        id = reference_id,
        enveloped = ENVELOPED_SIGNATURE,
        digest = algorithm.digest_uri(),
        value = digest_b64,
    )
}

/// Whitespace-normalizing canonical form.
fn canonicalize(xml: &str) -> String {
    xml.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves the element carrying `ID="reference_id"`. The ID must occur
/// exactly once in the document.
fn find_by_id<'a>(root: &'a XmlElement, reference_id: &str) -> Option<&'a XmlElement> {
    if root.count_id(reference_id) != 1 {
        return None;
    }
    root.descendants()
        .into_iter()
        .find(|element| element.attr("ID") == Some(reference_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_uris_round_trip() {
        for alg in [
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
        ] {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()), Some(alg));
        }
        assert_eq!(
            SignatureAlgorithm::parse("RSA-SHA512"),
            Some(SignatureAlgorithm::RsaSha512)
        );
        assert_eq!(SignatureAlgorithm::from_uri("urn:unknown"), None);
    }

    #[test]
    fn pem_to_der_extraction() {
        let pem = "-----BEGIN CERTIFICATE-----\nTUlJ\n-----END CERTIFICATE-----";
        assert_eq!(pem_to_der(pem, "CERTIFICATE"), Some(b"MII".to_vec()));
        assert_eq!(pem_to_der(pem, "PRIVATE KEY"), None);
    }

    #[test]
    fn find_by_id_resolves_single_element() {
        let xml = r#"<samlp:Response ID="_r"><saml:Assertion ID="_a"><x/></saml:Assertion></samlp:Response>"#;
        let root = XmlElement::parse(xml).unwrap();
        let assertion = find_by_id(&root, "_a").unwrap();
        assert_eq!(&xml[assertion.span.clone()], r#"<saml:Assertion ID="_a"><x/></saml:Assertion>"#);
        assert!(find_by_id(&root, "_b").is_none());
    }

    #[test]
    fn find_by_id_rejects_duplicates_in_any_quoting() {
        let root = XmlElement::parse(r#"<r><a ID="_x"></a><b><a ID='_x'/></b></r>"#).unwrap();
        assert!(find_by_id(&root, "_x").is_none());
    }

    #[test]
    fn canonical_form_normalizes_whitespace() {
        assert_eq!(
            canonicalize("  <element>   content   </element>  "),
            "<element> content </element>"
        );
    }
}
