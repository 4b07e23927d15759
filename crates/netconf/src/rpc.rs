//! Request rendering.
//!
//! Requests are small and fixed in shape, so they're built as strings.
//! Everything interpolated goes through [`escape`].

/// Base namespace for `<hello>` and `<rpc>`
pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Keywords whose next token is a list key, rendered as `<name>`
const KEYED: &[&str] = &["interface", "unit", "user", "file", "group", "neighbor"];

/// Escape text for inclusion in XML content or attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Client `<hello>` advertising base 1.0.
pub fn hello() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="{BASE_NS}"><capabilities><capability>{BASE_NS}</capability></capabilities></hello>"#
    )
}

/// Wrap an operation in an `<rpc>` envelope.
pub fn envelope(message_id: u64, operation: &str) -> String {
    format!(r#"<rpc message-id="{message_id}" xmlns="{BASE_NS}">{operation}</rpc>"#)
}

/// Read configuration in `set` format, restricted to `roots` when given.
pub fn get_configuration(roots: &[&str]) -> String {
    let filter = render_filter(roots);
    if filter.is_empty() {
        r#"<get-configuration format="set"/>"#.to_string()
    } else {
        format!(
            r#"<get-configuration format="set"><configuration>{filter}</configuration></get-configuration>"#
        )
    }
}

pub fn lock_candidate() -> String {
    "<lock><target><candidate/></target></lock>".to_string()
}

pub fn unlock_candidate() -> String {
    "<unlock><target><candidate/></target></unlock>".to_string()
}

/// Stage `set`/`delete` statements in the candidate.
pub fn load_set(text: &str) -> String {
    format!(
        r#"<load-configuration action="set" format="text"><configuration-set>{}</configuration-set></load-configuration>"#,
        escape(text)
    )
}

/// Ask for the candidate's differences against the active configuration.
pub fn compare_rollback() -> String {
    r#"<get-configuration compare="rollback" rollback="0" format="text"/>"#.to_string()
}

pub fn commit(log: &str) -> String {
    format!(
        "<commit-configuration><log>{}</log></commit-configuration>",
        escape(log)
    )
}

pub fn discard_changes() -> String {
    "<discard-changes/>".to_string()
}

pub fn close_session() -> String {
    "<close-session/>".to_string()
}

/// A node of the subtree filter.
#[derive(Debug, PartialEq, Eq)]
struct Node {
    tag: String,
    key: Option<String>,
    children: Vec<Node>,
}

impl Node {
    fn child(&mut self, tag: &str, key: Option<&str>) -> &mut Node {
        let pos = self
            .children
            .iter()
            .position(|c| c.tag == tag && c.key.as_deref() == key);
        let index = match pos {
            Some(i) => i,
            None => {
                self.children.push(Node {
                    tag: tag.to_string(),
                    key: key.map(str::to_string),
                    children: Vec::new(),
                });
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    fn render(&self, out: &mut String) {
        let tag = escape(&self.tag);
        if self.key.is_none() && self.children.is_empty() {
            out.push_str(&format!("<{tag}/>"));
            return;
        }
        out.push_str(&format!("<{tag}>"));
        if let Some(key) = &self.key {
            out.push_str(&format!("<name>{}</name>", escape(key)));
        }
        for child in &self.children {
            child.render(out);
        }
        out.push_str(&format!("</{tag}>"));
    }
}

/// Render configuration path prefixes as a Junos subtree filter.
///
/// `interfaces eth1` becomes `<interfaces><interface><name>eth1</name></interface></interfaces>`;
/// roots sharing a prefix are merged into one tree.
pub fn render_filter(roots: &[&str]) -> String {
    let mut top = Node {
        tag: String::new(),
        key: None,
        children: Vec::new(),
    };

    for root in roots {
        let tokens: Vec<&str> = root.split_whitespace().collect();
        let mut node = &mut top;
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let next = tokens.get(i + 1).copied();
            if token == "interfaces" && next.is_some() {
                node = node.child("interfaces", None).child("interface", next);
                i += 2;
            } else if KEYED.contains(&token) && next.is_some() {
                node = node.child(token, next);
                i += 2;
            } else {
                node = node.child(token, None);
                i += 1;
            }
        }
    }

    let mut out = String::new();
    for child in &top.children {
        child.render(&mut out);
    }
    out
}
