//! Reply parsing.
//!
//! Replies are scanned with a handful of patterns rather than a full XML
//! parser; only the elements the client acts on are extracted. Junos may
//! prefix elements with a namespace (`<xnm:error>`), which the patterns allow.

use crate::error::{Error, Result, RpcError};
use regex::Regex;
use std::sync::LazyLock;

static RPC_ERROR: LazyLock<Regex> = LazyLock::new(|| element_pattern("rpc-error"));
static SEVERITY: LazyLock<Regex> = LazyLock::new(|| element_pattern("error-severity"));
static TAG: LazyLock<Regex> = LazyLock::new(|| element_pattern("error-tag"));
static MESSAGE: LazyLock<Regex> = LazyLock::new(|| element_pattern("error-message"));
static PATH: LazyLock<Regex> = LazyLock::new(|| element_pattern("error-path"));
static BAD_ELEMENT: LazyLock<Regex> = LazyLock::new(|| element_pattern("bad-element"));
static CONFIGURATION_SET: LazyLock<Regex> =
    LazyLock::new(|| element_pattern("configuration-set"));
static CONFIGURATION_OUTPUT: LazyLock<Regex> =
    LazyLock::new(|| element_pattern("configuration-output"));
static SESSION_ID: LazyLock<Regex> = LazyLock::new(|| element_pattern("session-id"));
static OK: LazyLock<Regex> = LazyLock::new(|| empty_pattern("ok"));
static COMMIT_SUCCESS: LazyLock<Regex> = LazyLock::new(|| empty_pattern("commit-success"));
static MESSAGE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:[\w-]+:)?rpc-reply\b[^>]*\bmessage-id="([^"]*)""#).expect("valid pattern")
});

/// `<tag ...>content</tag>`, any namespace prefix, content captured
fn element_pattern(tag: &str) -> Regex {
    Regex::new(&format!(
        r"(?s)<(?:[\w-]+:)?{tag}\b[^>]*?(?:/>|>(.*?)</(?:[\w-]+:)?{tag}>)"
    ))
    .expect("valid pattern")
}

/// `<tag/>` or `<tag></tag>`
fn empty_pattern(tag: &str) -> Regex {
    Regex::new(&format!(
        r"<(?:[\w-]+:)?{tag}\s*(?:/>|>\s*</(?:[\w-]+:)?{tag}>)"
    ))
    .expect("valid pattern")
}

/// Undo XML escaping, including numeric character references.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Element text: CDATA sections are taken verbatim, the rest is unescaped.
pub fn text_content(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<![CDATA[") {
        out.push_str(&unescape(&rest[..start]));
        let section = &rest[start + "<![CDATA[".len()..];
        let Some(end) = section.find("]]>") else {
            out.push_str(section);
            return out;
        };
        out.push_str(&section[..end]);
        rest = &section[end + "]]>".len()..];
    }
    out.push_str(&unescape(rest));
    out
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| text_content(m.as_str()).trim().to_string())
}

/// A parsed `<rpc-reply>`.
#[derive(Debug, Clone)]
pub struct Reply {
    raw: String,
    warnings: Vec<RpcError>,
}

impl Reply {
    /// Parse a reply, failing when it carries an error-severity `<rpc-error>`.
    pub fn parse(operation: &str, raw: &str) -> Result<Self> {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            rpc_errors(raw).into_iter().partition(RpcError::is_error);
        if !errors.is_empty() {
            return Err(Error::Rpc {
                operation: operation.to_string(),
                errors,
            });
        }
        for warning in &warnings {
            log::debug!("{}: device warning: {}", operation, warning);
        }
        Ok(Self {
            raw: raw.to_string(),
            warnings,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Warnings the device attached to an otherwise successful reply
    pub fn warnings(&self) -> &[RpcError] {
        &self.warnings
    }

    pub fn message_id(&self) -> Option<String> {
        message_id(&self.raw)
    }

    pub fn is_ok(&self) -> bool {
        OK.is_match(&self.raw)
    }

    /// Whether a commit reported success (`<commit-success/>` or `<ok/>`)
    pub fn commit_succeeded(&self) -> bool {
        COMMIT_SUCCESS.is_match(&self.raw) || self.is_ok()
    }

    /// Text of `<configuration-set>`; empty when the element is empty
    pub fn configuration_set(&self) -> Option<String> {
        CONFIGURATION_SET.captures(&self.raw).map(|c| {
            c.get(1)
                .map(|m| text_content(m.as_str()).trim().to_string())
                .unwrap_or_default()
        })
    }

    /// Text of `<configuration-output>`; `None` when absent or blank
    pub fn configuration_output(&self) -> Option<String> {
        capture(&CONFIGURATION_OUTPUT, &self.raw).filter(|s| !s.is_empty())
    }
}

/// Every `<rpc-error>` in a reply, warnings included.
pub fn rpc_errors(raw: &str) -> Vec<RpcError> {
    RPC_ERROR
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|body| {
            let body = body.as_str();
            RpcError {
                tag: capture(&TAG, body),
                severity: capture(&SEVERITY, body).unwrap_or_else(|| "error".to_string()),
                message: capture(&MESSAGE, body)
                    .unwrap_or_else(|| "unspecified error".to_string()),
                path: capture(&BAD_ELEMENT, body).or_else(|| capture(&PATH, body)),
            }
        })
        .collect()
}

/// `message-id` of a raw `<rpc-reply>`, read without judging its content.
pub fn message_id(raw: &str) -> Option<String> {
    capture(&MESSAGE_ID, raw)
}

/// Session id from the server `<hello>`.
pub fn session_id(hello: &str) -> Option<String> {
    capture(&SESSION_ID, hello)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("PE1 eth1 &lt;-&gt; PE3 eth1"), "PE1 eth1 <-> PE3 eth1");
        assert_eq!(unescape("a &amp;&amp; b &#34;q&#x22;"), "a && b \"q\"");
        assert_eq!(unescape("AT&T; & more"), "AT&T; & more");
    }

    #[test]
    fn test_configuration_set() {
        let raw = r#"<rpc-reply xmlns:junos="http://xml.juniper.net/junos/23.2R1/junos" message-id="102">
<configuration-set>
set interfaces eth1 unit 0 description "PE1 eth1 &lt;-&gt; PE3 eth1"
set interfaces eth1 unit 0 family iso
</configuration-set>
</rpc-reply>"#;
        let reply = Reply::parse("get-configuration", raw).unwrap();
        assert_eq!(
            reply.configuration_set().unwrap(),
            "set interfaces eth1 unit 0 description \"PE1 eth1 <-> PE3 eth1\"\nset interfaces eth1 unit 0 family iso"
        );
        assert_eq!(reply.message_id().as_deref(), Some("102"));
    }

    #[test]
    fn test_empty_configuration_set() {
        let empty = "<rpc-reply><configuration-set/></rpc-reply>";
        let reply = Reply::parse("get-configuration", empty).unwrap();
        assert_eq!(reply.configuration_set().as_deref(), Some(""));
        let reply = Reply::parse("get-configuration", "<rpc-reply><ok/></rpc-reply>").unwrap();
        assert_eq!(reply.configuration_set(), None);
    }

    #[test]
    fn test_rpc_error_fails() {
        let raw = r#"<rpc-reply message-id="103">
<rpc-error>
<error-type>protocol</error-type>
<error-tag>lock-denied</error-tag>
<error-severity>error</error-severity>
<error-message>
configuration database locked by:
  root terminal pts/0 (pid 4242) on since 2024-05-01 10:00:00 UTC
</error-message>
</rpc-error>
</rpc-reply>"#;
        match Reply::parse("lock", raw) {
            Err(Error::Rpc { operation, errors }) => {
                assert_eq!(operation, "lock");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].is_lock_denied());
                assert!(errors[0].message.starts_with("configuration database locked"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_warnings_are_ignored() {
        let raw = r#"<rpc-reply>
<load-configuration-results>
<rpc-error>
<error-severity>warning</error-severity>
<error-message>statement not found</error-message>
</rpc-error>
<ok/>
</load-configuration-results>
</rpc-reply>"#;
        let reply = Reply::parse("load-configuration", raw).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.warnings().len(), 1);
    }

    #[test]
    fn test_namespaced_error_with_bad_element() {
        let raw = r#"<rpc-reply><xnm:rpc-error><xnm:error-severity>error</xnm:error-severity>
<xnm:error-info><xnm:bad-element>descriptoin</xnm:bad-element></xnm:error-info>
<xnm:error-message>syntax error</xnm:error-message></xnm:rpc-error></rpc-reply>"#;
        let errors = rpc_errors(raw);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "syntax error");
        assert_eq!(errors[0].path.as_deref(), Some("descriptoin"));
    }

    #[test]
    fn test_configuration_output() {
        let changed = r#"<rpc-reply><configuration-information><configuration-output>
[edit interfaces eth1 unit 0]
+   description "PE1 eth1 &lt;-&gt; PE3 eth1";
</configuration-output></configuration-information></rpc-reply>"#;
        let reply = Reply::parse("diff", changed).unwrap();
        assert!(reply.configuration_output().unwrap().contains("<->"));

        let unchanged = "<rpc-reply><configuration-information><configuration-output>\n\
            </configuration-output></configuration-information></rpc-reply>";
        assert_eq!(Reply::parse("diff", unchanged).unwrap().configuration_output(), None);
    }

    #[test]
    fn test_commit_results() {
        let success = r#"<rpc-reply><commit-results><routing-engine junos:style="normal">
<name>re0</name><commit-success/></routing-engine></commit-results></rpc-reply>"#;
        assert!(Reply::parse("commit", success).unwrap().commit_succeeded());
        let ok = "<rpc-reply><ok/></rpc-reply>";
        assert!(Reply::parse("commit", ok).unwrap().commit_succeeded());
        let silent = "<rpc-reply><commit-results/></rpc-reply>";
        assert!(!Reply::parse("commit", silent).unwrap().commit_succeeded());
    }

    #[test]
    fn test_namespaced_ok() {
        let raw = r#"<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="104">
<nc:ok/>
</nc:rpc-reply>"#;
        let reply = Reply::parse("unlock", raw).unwrap();
        assert!(reply.is_ok());
        assert!(reply.commit_succeeded());
        assert_eq!(reply.message_id().as_deref(), Some("104"));
        assert!(Reply::parse("unlock", "<rpc-reply><nc:ok></nc:ok></rpc-reply>").unwrap().is_ok());
        assert!(!Reply::parse("unlock", "<rpc-reply><okay/></rpc-reply>").unwrap().is_ok());
    }

    #[test]
    fn test_cdata_sections() {
        assert_eq!(text_content("a <![CDATA[<b> & c]]> &amp; d"), "a <b> & c & d");
        assert_eq!(text_content("<![CDATA[unterminated"), "unterminated");

        let raw = r#"<rpc-reply message-id="102"><configuration-set><![CDATA[
set interfaces eth1 unit 0 description "PE1 eth1 <-> PE3 eth1"
set system host-name pe1
]]></configuration-set></rpc-reply>"#;
        let reply = Reply::parse("get-configuration", raw).unwrap();
        assert_eq!(
            reply.configuration_set().unwrap(),
            "set interfaces eth1 unit 0 description \"PE1 eth1 <-> PE3 eth1\"\n\
             set system host-name pe1"
        );

        let failed = r#"<rpc-reply><rpc-error><error-severity>error</error-severity>
<error-message><![CDATA[missing ';' & more]]></error-message></rpc-error></rpc-reply>"#;
        assert_eq!(rpc_errors(failed)[0].message, "missing ';' & more");
    }

    #[test]
    fn test_message_id_of_error_reply() {
        let raw = r#"<rpc-reply message-id="101"><rpc-error><error-severity>error</error-severity>
<error-message>late</error-message></rpc-error></rpc-reply>"#;
        assert_eq!(message_id(raw).as_deref(), Some("101"));
        assert_eq!(message_id("<rpc-reply><ok/></rpc-reply>"), None);
    }

    #[test]
    fn test_session_id() {
        let hello = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
<capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>
<session-id>27700</session-id></hello>"#;
        assert_eq!(session_id(hello).as_deref(), Some("27700"));
    }
}
