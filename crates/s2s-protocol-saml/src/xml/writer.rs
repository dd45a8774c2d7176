//! Serialization of SAML protocol messages.
//!
//! Output is compact (no indentation) and uses the `samlp`/`saml`
//! prefixes, with both namespaces declared on the root element. The
//! response issuer is written first so an enveloped signature can be
//! inserted directly after it.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;

use crate::types::{
    Assertion, AuthnRequest, NameId, Response, Status, Subject, SAMLP_NS, SAML_NS,
};

/// Serializes an `AuthnRequest`.
#[must_use]
pub fn write_authn_request(request: &AuthnRequest) -> String {
    let mut out = XmlBuffer::default();
    let issue_instant = instant(&request.issue_instant);

    out.open(
        "samlp:AuthnRequest",
        &[
            ("xmlns:samlp", Some(SAMLP_NS)),
            ("xmlns:saml", Some(SAML_NS)),
            ("ID", Some(request.id.as_str())),
            ("Version", Some(request.version.as_str())),
            ("IssueInstant", Some(issue_instant.as_str())),
            ("Destination", request.destination.as_deref()),
            (
                "AssertionConsumerServiceURL",
                request.assertion_consumer_service_url.as_deref(),
            ),
            ("ProtocolBinding", request.protocol_binding.as_deref()),
            ("ForceAuthn", request.force_authn.then_some("true")),
            ("IsPassive", request.is_passive.then_some("true")),
        ],
    );
    out.text_element("saml:Issuer", &[], &request.issuer);
    if let Some(policy) = &request.name_id_policy {
        let allow_create = policy.allow_create.map(|b| if b { "true" } else { "false" });
        out.empty(
            "samlp:NameIDPolicy",
            &[("Format", policy.format.as_deref()), ("AllowCreate", allow_create)],
        );
    }
    out.close("samlp:AuthnRequest");
    out.finish()
}

/// Serializes a `Response` with its assertions.
#[must_use]
pub fn write_response(response: &Response) -> String {
    let mut out = XmlBuffer::default();
    let issue_instant = instant(&response.issue_instant);

    out.open(
        "samlp:Response",
        &[
            ("xmlns:samlp", Some(SAMLP_NS)),
            ("xmlns:saml", Some(SAML_NS)),
            ("ID", Some(response.id.as_str())),
            ("Version", Some("2.0")),
            ("IssueInstant", Some(issue_instant.as_str())),
            ("Destination", response.destination.as_deref()),
            ("InResponseTo", response.in_response_to.as_deref()),
        ],
    );
    if let Some(issuer) = &response.issuer {
        out.text_element("saml:Issuer", &[], issuer);
    }
    write_status(&mut out, &response.status);
    for assertion in &response.assertions {
        write_assertion(&mut out, assertion);
    }
    out.close("samlp:Response");
    out.finish()
}

fn write_status(out: &mut XmlBuffer, status: &Status) {
    out.open("samlp:Status", &[]);
    match &status.sub_code {
        Some(sub_code) => {
            out.open("samlp:StatusCode", &[("Value", Some(status.code.as_str()))]);
            out.empty("samlp:StatusCode", &[("Value", Some(sub_code.as_str()))]);
            out.close("samlp:StatusCode");
        }
        None => out.empty("samlp:StatusCode", &[("Value", Some(status.code.as_str()))]),
    }
    if let Some(message) = &status.message {
        out.text_element("samlp:StatusMessage", &[], message);
    }
    out.close("samlp:Status");
}

fn write_assertion(out: &mut XmlBuffer, assertion: &Assertion) {
    let issue_instant = instant(&assertion.issue_instant);
    out.open(
        "saml:Assertion",
        &[
            ("ID", Some(assertion.id.as_str())),
            ("Version", Some("2.0")),
            ("IssueInstant", Some(issue_instant.as_str())),
        ],
    );
    out.text_element("saml:Issuer", &[], &assertion.issuer);

    if let Some(subject) = &assertion.subject {
        write_subject(out, subject);
    }

    if let Some(conditions) = &assertion.conditions {
        let not_before = conditions.not_before.as_ref().map(instant);
        let not_on_or_after = conditions.not_on_or_after.as_ref().map(instant);
        out.open(
            "saml:Conditions",
            &[
                ("NotBefore", not_before.as_deref()),
                ("NotOnOrAfter", not_on_or_after.as_deref()),
            ],
        );
        if !conditions.audiences.is_empty() {
            out.open("saml:AudienceRestriction", &[]);
            for audience in &conditions.audiences {
                out.text_element("saml:Audience", &[], audience);
            }
            out.close("saml:AudienceRestriction");
        }
        out.close("saml:Conditions");
    }

    for statement in &assertion.authn_statements {
        let authn_instant = instant(&statement.authn_instant);
        out.open(
            "saml:AuthnStatement",
            &[
                ("AuthnInstant", Some(authn_instant.as_str())),
                ("SessionIndex", statement.session_index.as_deref()),
            ],
        );
        out.open("saml:AuthnContext", &[]);
        if let Some(class_ref) = &statement.context.class_ref {
            out.text_element("saml:AuthnContextClassRef", &[], class_ref);
        }
        for authority in &statement.context.authenticating_authorities {
            out.text_element("saml:AuthenticatingAuthority", &[], authority);
        }
        out.close("saml:AuthnContext");
        out.close("saml:AuthnStatement");
    }

    for statement in &assertion.attribute_statements {
        out.open("saml:AttributeStatement", &[]);
        for attribute in &statement.attributes {
            out.open(
                "saml:Attribute",
                &[
                    ("Name", Some(attribute.name.as_str())),
                    ("NameFormat", attribute.name_format.as_deref()),
                    ("FriendlyName", attribute.friendly_name.as_deref()),
                ],
            );
            for value in &attribute.values {
                out.text_element("saml:AttributeValue", &[], value);
            }
            out.close("saml:Attribute");
        }
        out.close("saml:AttributeStatement");
    }

    out.close("saml:Assertion");
}

fn write_subject(out: &mut XmlBuffer, subject: &Subject) {
    out.open("saml:Subject", &[]);
    if let Some(name_id) = &subject.name_id {
        write_name_id(out, name_id);
    }
    for confirmation in &subject.confirmations {
        out.open("saml:SubjectConfirmation", &[("Method", Some(confirmation.method.as_str()))]);
        if let Some(data) = &confirmation.data {
            let not_on_or_after = data.not_on_or_after.as_ref().map(instant);
            out.empty(
                "saml:SubjectConfirmationData",
                &[
                    ("NotOnOrAfter", not_on_or_after.as_deref()),
                    ("Recipient", data.recipient.as_deref()),
                    ("InResponseTo", data.in_response_to.as_deref()),
                ],
            );
        }
        out.close("saml:SubjectConfirmation");
    }
    out.close("saml:Subject");
}

fn write_name_id(out: &mut XmlBuffer, name_id: &NameId) {
    out.text_element(
        "saml:NameID",
        &[
            ("Format", name_id.format.as_deref()),
            ("NameQualifier", name_id.name_qualifier.as_deref()),
            ("SPNameQualifier", name_id.sp_name_qualifier.as_deref()),
        ],
        &name_id.value,
    );
}

fn instant(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

type Attrs<'a> = [(&'a str, Option<&'a str>)];

/// Append-only XML text builder. Attributes with a `None` value are omitted.
#[derive(Default)]
struct XmlBuffer {
    buf: String,
}

impl XmlBuffer {
    fn start_tag(&mut self, name: &str, attrs: &Attrs<'_>) {
        self.buf.push('<');
        self.buf.push_str(name);
        for (key, value) in attrs {
            if let Some(value) = value {
                self.buf.push(' ');
                self.buf.push_str(key);
                self.buf.push_str("=\"");
                self.buf.push_str(&escape(*value));
                self.buf.push('"');
            }
        }
    }

    fn open(&mut self, name: &str, attrs: &Attrs<'_>) {
        self.start_tag(name, attrs);
        self.buf.push('>');
    }

    fn empty(&mut self, name: &str, attrs: &Attrs<'_>) {
        self.start_tag(name, attrs);
        self.buf.push_str("/>");
    }

    fn close(&mut self, name: &str) {
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
    }

    fn text_element(&mut self, name: &str, attrs: &Attrs<'_>, text: &str) {
        self.open(name, attrs);
        self.buf.push_str(&escape(text));
        self.close(name);
    }

    fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AttributeMap, AttributeStatement, AuthnContext, AuthnStatement, Conditions,
        SubjectConfirmation,
    };
    use crate::xml::{parse_authn_request, parse_response};

    #[test]
    fn authn_request_is_readable_back() {
        let request = AuthnRequest::new("https://proxy.example.com/proxy.xml")
            .with_destination("https://idp.example.com/sso")
            .with_acs_url("https://proxy.example.com/acs/post");
        let xml = write_authn_request(&request);

        assert!(xml.starts_with("<samlp:AuthnRequest "));
        let parsed = parse_authn_request(&xml).unwrap();
        assert_eq!(parsed.id, request.id);
        assert_eq!(parsed.destination, request.destination);
        assert_eq!(
            parsed.assertion_consumer_service_url,
            request.assertion_consumer_service_url
        );
    }

    #[test]
    fn response_issuer_precedes_status() {
        let response = Response::success("https://proxy.example.com/proxy.xml");
        let xml = write_response(&response);
        let issuer = xml.find("</saml:Issuer>").unwrap();
        let status = xml.find("<samlp:Status>").unwrap();
        assert!(issuer < status);
    }

    #[test]
    fn special_characters_are_escaped() {
        let mut attributes = AttributeMap::new();
        attributes.insert("cn".to_string(), vec!["Tom & \"Jerry\" <3".to_string()]);
        let assertion = Assertion::new("https://proxy.example.com/proxy.xml")
            .with_subject(
                Subject::new(NameId::new("user"))
                    .with_confirmation(SubjectConfirmation::bearer("https://sp/acs", None, 5)),
            )
            .with_conditions(Conditions::with_validity(5).with_audience("https://sp"))
            .with_authn_statement(AuthnStatement::new(
                AuthnContext::new("urn:ac").with_authority("https://idp"),
            ))
            .with_attribute_statement(AttributeStatement::from_map(&attributes));
        let response = Response::success("https://proxy.example.com/proxy.xml")
            .in_response_to("_r")
            .with_assertion(assertion);

        let xml = write_response(&response);
        assert!(!xml.contains("Tom & "));

        let parsed = parse_response(&xml).unwrap();
        assert_eq!(parsed.attributes()["cn"], vec!["Tom & \"Jerry\" <3"]);
        assert_eq!(
            parsed.authn_info()[0].authenticating_authorities,
            vec!["https://idp"]
        );
    }
}
