//! TipTap (ProseMirror JSON) document handling.
//!
//! Page content is stored as the editor's JSON document. Search and
//! listings need plain text, which is derived here whenever content is
//! written.

use serde_json::{json, Value};

/// Node types that end a line of text.
const BLOCK_NODES: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "codeBlock",
    "listItem",
    "taskItem",
    "bulletList",
    "orderedList",
    "taskList",
    "table",
    "tableRow",
    "tableCell",
    "tableHeader",
    "horizontalRule",
    "callout",
    "details",
    "detailsSummary",
    "detailsContent",
    "image",
];

/// An empty TipTap document.
pub fn empty_doc() -> Value {
    json!({ "type": "doc", "content": [] })
}

/// Build a document with one paragraph per non-empty line of `text`.
pub fn doc_from_text(text: &str) -> Value {
    let content: Vec<Value> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| json!({ "type": "paragraph", "content": [{ "type": "text", "text": l }] }))
        .collect();
    json!({ "type": "doc", "content": content })
}

/// Accept an incoming content value, returning the document to store.
///
/// `null` becomes an empty document and a bare string is converted with
/// [`doc_from_text`]. Anything else must be an object with `"type": "doc"`.
pub fn normalize_doc(value: Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(empty_doc()),
        Value::String(s) => Ok(doc_from_text(&s)),
        Value::Object(ref obj) => match obj.get("type").and_then(Value::as_str) {
            Some("doc") => Ok(value),
            Some(other) => Err(format!(
                "content must be a TipTap document (type \"doc\"), got type \"{}\"",
                other
            )),
            None => Err("content must be a TipTap document with a \"type\" field".to_string()),
        },
        _ => Err("content must be a TipTap document object".to_string()),
    }
}

/// Extract the plain text of a TipTap document.
///
/// Text leaves are concatenated, block nodes end a line, `hardBreak`
/// becomes a newline and mentions contribute their label. Blank lines are
/// dropped.
pub fn extract_text(doc: &Value) -> String {
    let mut out = String::new();
    walk(doc, &mut out);

    out.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn walk(node: &Value, out: &mut String) {
    let obj = match node {
        Value::Object(obj) => obj,
        Value::Array(items) => {
            for item in items {
                walk(item, out);
            }
            return;
        }
        _ => return,
    };

    let node_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
    match node_type {
        "text" => {
            if let Some(text) = obj.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        "hardBreak" => out.push('\n'),
        "mention" => {
            let attrs = obj.get("attrs");
            let label = attrs
                .and_then(|a| a.get("label"))
                .or_else(|| attrs.and_then(|a| a.get("id")))
                .and_then(Value::as_str);
            if let Some(label) = label {
                out.push('@');
                out.push_str(label);
            }
        }
        _ => {}
    }

    if let Some(children) = obj.get("content").and_then(Value::as_array) {
        for child in children {
            walk(child, out);
        }
    }

    if BLOCK_NODES.contains(&node_type) {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_paragraphs_and_headings() {
        let doc = json!({
            "type": "doc",
            "content": [
                { "type": "heading", "attrs": { "level": 1 }, "content": [{ "type": "text", "text": "Chest pain" }] },
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "Document " },
                    { "type": "text", "marks": [{ "type": "bold" }], "text": "onset" },
                    { "type": "text", "text": " and radiation." }
                ]}
            ]
        });
        assert_eq!(extract_text(&doc), "Chest pain\nDocument onset and radiation.");
    }

    #[test]
    fn test_extract_lists_and_breaks() {
        let doc = json!({
            "type": "doc",
            "content": [
                { "type": "bulletList", "content": [
                    { "type": "listItem", "content": [{ "type": "paragraph", "content": [{ "type": "text", "text": "ROS" }] }] },
                    { "type": "listItem", "content": [{ "type": "paragraph", "content": [
                        { "type": "text", "text": "HPI" },
                        { "type": "hardBreak" },
                        { "type": "text", "text": "PMH" }
                    ] }] }
                ]},
                { "type": "paragraph", "content": [{ "type": "mention", "attrs": { "id": "u1", "label": "Dr. Lee" } }] }
            ]
        });
        assert_eq!(extract_text(&doc), "ROS\nHPI\nPMH\n@Dr. Lee");
    }

    #[test]
    fn test_extract_empty_doc() {
        assert_eq!(extract_text(&empty_doc()), "");
        assert_eq!(extract_text(&Value::Null), "");
    }

    #[test]
    fn test_normalize_doc_variants() {
        assert_eq!(normalize_doc(Value::Null).unwrap(), empty_doc());

        let doc = normalize_doc(json!("line one\n\nline two")).unwrap();
        assert_eq!(extract_text(&doc), "line one\nline two");

        assert!(normalize_doc(json!({ "type": "paragraph" })).is_err());
        assert!(normalize_doc(json!([1, 2])).is_err());
        assert!(normalize_doc(json!({ "content": [] })).is_err());
    }
}
