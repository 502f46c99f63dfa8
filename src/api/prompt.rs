//! Chat-history serialization into the agent-facing XML prompt.

use super::openai::ChatMessage;

/// Render messages as the `<chat_history>` document the extension pastes
/// into the chat UI.
///
/// Each message becomes one four-space-indented `<message>` element whose
/// content sits in a CDATA section framed by newlines. A `]]>` inside the
/// content is split across adjacent CDATA sections.
pub fn messages_to_xml(messages: &[ChatMessage]) -> String {
    let mut doc = String::from("<chat_history>");
    for message in messages {
        let role = message.role.as_deref().unwrap_or_default();
        let content = message.content.as_deref().unwrap_or_default();

        doc.push_str("\n    <message role=\"");
        doc.push_str(&escape_attribute(role));
        doc.push_str("\"><![CDATA[\n");
        doc.push_str(&content.replace("]]>", "]]]]><![CDATA[>"));
        doc.push_str("\n]]></message>");
    }
    doc.push_str("\n</chat_history>");
    doc
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: Some(role.to_string()),
            content: Some(content.to_string()),
        }
    }

    #[test]
    fn single_message_document() {
        let xml = messages_to_xml(&[message("user", "Hello")]);
        assert_eq!(
            xml,
            "<chat_history>\n    <message role=\"user\"><![CDATA[\nHello\n]]></message>\n</chat_history>"
        );
    }

    #[test]
    fn messages_keep_their_order() {
        let xml = messages_to_xml(&[
            message("system", "You are helpful"),
            message("user", "Hello"),
        ]);
        let system = xml.find("role=\"system\"").unwrap();
        let user = xml.find("role=\"user\"").unwrap();
        assert!(system < user);
        assert!(xml.starts_with("<chat_history>"));
        assert!(xml.ends_with("</chat_history>"));
    }

    #[test]
    fn multiline_content_is_preserved_verbatim() {
        let xml = messages_to_xml(&[message("user", "line one\nline two")]);
        assert!(xml.contains("<![CDATA[\nline one\nline two\n]]>"));
    }

    #[test]
    fn cdata_terminator_is_split() {
        let xml = messages_to_xml(&[message("user", "a]]>b")]);
        assert!(xml.contains("a]]]]><![CDATA[>b"));
        // The document still closes a balanced CDATA section.
        assert!(xml.contains("\n]]></message>"));
    }

    #[test]
    fn role_attribute_is_escaped() {
        let xml = messages_to_xml(&[message("us\"er", "x")]);
        assert!(xml.contains("role=\"us&quot;er\""));
    }
}
