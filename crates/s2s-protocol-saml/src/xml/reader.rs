//! Parsing of SAML protocol messages.

use chrono::{DateTime, Utc};

use super::dom::XmlElement;
use crate::error::{SamlError, SamlResult};
use crate::types::{
    Assertion, Attribute, AttributeStatement, AuthnContext, AuthnRequest, AuthnStatement,
    Conditions, NameId, NameIdPolicy, Response, Status, Subject, SubjectConfirmation,
    SubjectConfirmationData,
};

/// Parses an `AuthnRequest` document.
///
/// # Errors
///
/// Returns an error if the XML is malformed, the root is not an
/// `AuthnRequest`, or required attributes are missing.
pub fn parse_authn_request(xml: &str) -> SamlResult<AuthnRequest> {
    let root = XmlElement::parse(xml)?;
    if root.name != "AuthnRequest" {
        return Err(SamlError::InvalidRequest(format!(
            "expected AuthnRequest, found {}",
            root.name
        )));
    }

    let issuer = root
        .child("Issuer")
        .map(|i| i.text().to_string())
        .ok_or_else(|| SamlError::MissingElement("Issuer".to_string()))?;

    let request = AuthnRequest {
        id: required_attr(&root, "ID")?.to_string(),
        version: required_attr(&root, "Version")?.to_string(),
        issue_instant: parse_instant(required_attr(&root, "IssueInstant")?)?,
        issuer,
        destination: root.attr("Destination").map(String::from),
        assertion_consumer_service_url: root
            .attr("AssertionConsumerServiceURL")
            .map(String::from),
        protocol_binding: root.attr("ProtocolBinding").map(String::from),
        name_id_policy: root.child("NameIDPolicy").map(|policy| NameIdPolicy {
            format: policy.attr("Format").map(String::from),
            allow_create: policy.attr("AllowCreate").map(parse_bool),
        }),
        force_authn: root.attr("ForceAuthn").is_some_and(parse_bool),
        is_passive: root.attr("IsPassive").is_some_and(parse_bool),
    };
    request.validate()?;
    Ok(request)
}

/// Parses a `Response` document.
///
/// # Errors
///
/// Returns an error if the XML is malformed, the root is not a `Response`,
/// required elements are missing, or an assertion is encrypted.
pub fn parse_response(xml: &str) -> SamlResult<Response> {
    let root = XmlElement::parse(xml)?;
    if root.name != "Response" {
        return Err(SamlError::InvalidResponse(format!(
            "expected Response, found {}",
            root.name
        )));
    }
    if root.child("EncryptedAssertion").is_some() {
        return Err(SamlError::InvalidResponse(
            "encrypted assertions are not supported".to_string(),
        ));
    }

    let status = root
        .child("Status")
        .ok_or_else(|| SamlError::MissingElement("Status".to_string()))?;
    let code = status
        .child("StatusCode")
        .ok_or_else(|| SamlError::MissingElement("StatusCode".to_string()))?;

    Ok(Response {
        id: required_attr(&root, "ID")?.to_string(),
        in_response_to: root.attr("InResponseTo").map(String::from),
        issue_instant: parse_instant(required_attr(&root, "IssueInstant")?)?,
        issuer: root.child("Issuer").map(|i| i.text().to_string()),
        destination: root.attr("Destination").map(String::from),
        status: Status {
            code: required_attr(code, "Value")?.to_string(),
            sub_code: code
                .child("StatusCode")
                .and_then(|sub| sub.attr("Value"))
                .map(String::from),
            message: status.child("StatusMessage").map(|m| m.text().to_string()),
        },
        assertions: root
            .children("Assertion")
            .map(parse_assertion)
            .collect::<SamlResult<Vec<_>>>()?,
    })
}

fn parse_assertion(element: &XmlElement) -> SamlResult<Assertion> {
    let issuer = element
        .child("Issuer")
        .map(|i| i.text().to_string())
        .ok_or_else(|| SamlError::MissingElement("Assertion/Issuer".to_string()))?;

    Ok(Assertion {
        id: required_attr(element, "ID")?.to_string(),
        issue_instant: parse_instant(required_attr(element, "IssueInstant")?)?,
        issuer,
        subject: element.child("Subject").map(parse_subject).transpose()?,
        conditions: element.child("Conditions").map(parse_conditions).transpose()?,
        authn_statements: element
            .children("AuthnStatement")
            .map(parse_authn_statement)
            .collect::<SamlResult<Vec<_>>>()?,
        attribute_statements: element
            .children("AttributeStatement")
            .map(parse_attribute_statement)
            .collect(),
    })
}

fn parse_subject(element: &XmlElement) -> SamlResult<Subject> {
    let name_id = element.child("NameID").map(|n| NameId {
        value: n.text().to_string(),
        format: n.attr("Format").map(String::from),
        name_qualifier: n.attr("NameQualifier").map(String::from),
        sp_name_qualifier: n.attr("SPNameQualifier").map(String::from),
    });

    let mut confirmations = Vec::new();
    for confirmation in element.children("SubjectConfirmation") {
        let data = match confirmation.child("SubjectConfirmationData") {
            Some(data) => Some(SubjectConfirmationData {
                recipient: data.attr("Recipient").map(String::from),
                in_response_to: data.attr("InResponseTo").map(String::from),
                not_on_or_after: data.attr("NotOnOrAfter").map(parse_instant).transpose()?,
            }),
            None => None,
        };
        confirmations.push(SubjectConfirmation {
            method: required_attr(confirmation, "Method")?.to_string(),
            data,
        });
    }

    Ok(Subject {
        name_id,
        confirmations,
    })
}

fn parse_conditions(element: &XmlElement) -> SamlResult<Conditions> {
    Ok(Conditions {
        not_before: element.attr("NotBefore").map(parse_instant).transpose()?,
        not_on_or_after: element.attr("NotOnOrAfter").map(parse_instant).transpose()?,
        audiences: element
            .children("AudienceRestriction")
            .flat_map(|r| r.children("Audience"))
            .map(|a| a.text().to_string())
            .collect(),
    })
}

fn parse_authn_statement(element: &XmlElement) -> SamlResult<AuthnStatement> {
    let context = element.child("AuthnContext").map_or_else(AuthnContext::default, |ctx| {
        AuthnContext {
            class_ref: ctx
                .child("AuthnContextClassRef")
                .map(|c| c.text().to_string()),
            authenticating_authorities: ctx
                .children("AuthenticatingAuthority")
                .map(|a| a.text().to_string())
                .collect(),
        }
    });

    Ok(AuthnStatement {
        authn_instant: parse_instant(required_attr(element, "AuthnInstant")?)?,
        session_index: element.attr("SessionIndex").map(String::from),
        context,
    })
}

fn parse_attribute_statement(element: &XmlElement) -> AttributeStatement {
    AttributeStatement {
        attributes: element
            .children("Attribute")
            .filter_map(|attribute| {
                Some(Attribute {
                    name: attribute.attr("Name")?.to_string(),
                    name_format: attribute.attr("NameFormat").map(String::from),
                    friendly_name: attribute.attr("FriendlyName").map(String::from),
                    values: attribute
                        .children("AttributeValue")
                        .map(|v| v.text().to_string())
                        .collect(),
                })
            })
            .collect(),
    }
}

fn required_attr<'a>(element: &'a XmlElement, name: &str) -> SamlResult<&'a str> {
    element
        .attr(name)
        .ok_or_else(|| SamlError::MissingElement(format!("{}@{}", element.name, name)))
}

fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SamlError::XmlParse(format!("invalid instant '{value}': {e}")))
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1")
}
