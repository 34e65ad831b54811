//! `org.freedesktop.DBus.Introspectable.Introspect` XML generation.
//!
//! Grounded on `SPEC_FULL.md` §4.5; the teacher has no introspection
//! surface (it never exposes a typed interface to describe), so the
//! generator itself is new, but it walks exactly the `Interface::MEMBERS`
//! data `macros.rs`'s `interface!` macro already builds in declaration
//! order, and reuses `signature.rs`'s types for the per-argument signature
//! strings it writes into each `<arg>` element.

use std::fmt::Write as _;

use crate::interface::Member;

pub(crate) const INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
pub(crate) const INTROSPECT: &str = "Introspect";

/// Render the introspection XML document for one object exposing a single
/// interface `name` with the given `members`.
pub(crate) fn describe(name: &str, members: &'static [Member]) -> String {
    let mut xml = String::new();

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN""#);
    xml.push('\n');
    xml.push_str(r#" "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">"#);
    xml.push('\n');
    xml.push_str("<node>\n");

    write_standard_interface(&mut xml, INTERFACE, &[("Introspect", &[("xml_data", "s", "out")])]);
    write_standard_interface(
        &mut xml,
        crate::properties::INTERFACE,
        &[
            ("Get", &[("interface_name", "s", "in"), ("property_name", "s", "in"), ("value", "v", "out")]),
            (
                "Set",
                &[("interface_name", "s", "in"), ("property_name", "s", "in"), ("value", "v", "in")],
            ),
            ("GetAll", &[("interface_name", "s", "in"), ("properties", "a{sv}", "out")]),
        ],
    );

    let _ = writeln!(xml, "  <interface name=\"{name}\">");

    for member in members {
        match member {
            Member::Method(info) => {
                let _ = writeln!(xml, "    <method name=\"{}\">", info.name);
                write_args(&mut xml, (info.in_signature)().as_str(), "in");
                write_args(&mut xml, (info.out_signature)().as_str(), "out");
                xml.push_str("    </method>\n");
            }
            Member::Signal(info) => {
                let _ = writeln!(xml, "    <signal name=\"{}\">", info.name);
                write_args(&mut xml, (info.signature)().as_str(), "out");
                xml.push_str("    </signal>\n");
            }
            Member::Property(info) => {
                let access = if info.access.is_writable() { "readwrite" } else { "read" };
                let _ = writeln!(
                    xml,
                    "    <property name=\"{}\" type=\"{}\" access=\"{access}\"/>",
                    info.name,
                    (info.signature)().as_str()
                );
            }
        }
    }

    xml.push_str("  </interface>\n");
    xml.push_str("</node>\n");
    xml
}

fn write_standard_interface(xml: &mut String, name: &str, methods: &[(&str, &[(&str, &str, &str)])]) {
    let _ = writeln!(xml, "  <interface name=\"{name}\">");
    for (method, args) in methods {
        let _ = writeln!(xml, "    <method name=\"{method}\">");
        for (arg_name, ty, direction) in *args {
            let _ = writeln!(xml, "      <arg name=\"{arg_name}\" type=\"{ty}\" direction=\"{direction}\"/>");
        }
        xml.push_str("    </method>\n");
    }
    xml.push_str("  </interface>\n");
}

fn write_args(xml: &mut String, signature: &str, direction: &str) {
    for ty in split_complete_types(signature) {
        let _ = writeln!(xml, "      <arg type=\"{ty}\" direction=\"{direction}\"/>");
    }
}

/// Split a signature string into its top-level complete types, e.g.
/// `"s(ii)a{sv}"` into `["s", "(ii)", "a{sv}"]`.
fn split_complete_types(signature: &str) -> Vec<&str> {
    let bytes = signature.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let len = complete_type_len(&bytes[i..]);
        out.push(&signature[i..i + len]);
        i += len;
    }

    out
}

fn complete_type_len(sig: &[u8]) -> usize {
    match sig[0] {
        b'a' => 1 + complete_type_len(&sig[1..]),
        b'(' => {
            let mut i = 1;
            while sig[i] != b')' {
                i += complete_type_len(&sig[i..]);
            }
            i + 1
        }
        b'{' => {
            let mut i = 1;
            while sig[i] != b'}' {
                i += complete_type_len(&sig[i..]);
            }
            i + 1
        }
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_nested_types() {
        assert_eq!(split_complete_types("s(ii)a{sv}"), vec!["s", "(ii)", "a{sv}"]);
    }

    #[test]
    fn splits_empty_signature() {
        assert!(split_complete_types("").is_empty());
    }
}
