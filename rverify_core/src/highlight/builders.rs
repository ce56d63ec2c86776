//! One presentation tree per content type, indexed by the locators the
//! matching comparator reports.

use super::tree::{HighlightTree, NodeId};
use super::HighlightOptions;
use crate::comparators::table::parse_csv;
use crate::comparators::text::{line_locator, task_lines, task_locator, FULL_TEXT_LOCATOR};
use crate::comparators::{json, primitives, xml};
use crate::rules::path::{json_element, json_member};
use crate::table::{decode_tables, Table};
use roxmltree::Node;
use rverify_common::{ContentType, VerifyError};
use serde_json::Value;
use std::collections::HashMap;

pub fn build(
    content_type: ContentType,
    text: &str,
    side: &str,
    options: &HighlightOptions,
) -> Result<HighlightTree, VerifyError> {
    match content_type {
        ContentType::Json => json_tree(text, side, options),
        ContentType::Xml | ContentType::MaskedXml => xml_tree(text, side, options),
        ContentType::Table => Ok(table_tree(decode_tables(text)?, options)),
        ContentType::Csv => Ok(table_tree(vec![parse_csv(text, side)?], options)),
        ContentType::PlainText => Ok(lines_tree(text.lines(), line_locator)),
        ContentType::TaskList => Ok(lines_tree(task_lines(text), task_locator)),
        ContentType::FullText => Ok(HighlightTree::new(
            FULL_TEXT_LOCATOR,
            Some(text.to_string()),
            Some(FULL_TEXT_LOCATOR.to_string()),
        )),
        ContentType::Primitives => Ok(HighlightTree::new(
            primitives::VALUE_LOCATOR,
            Some(text.to_string()),
            Some(primitives::VALUE_LOCATOR.to_string()),
        )),
        ContentType::Xsd | ContentType::Container => {
            Err(VerifyError::ComparatorNotFound(content_type.to_string()))
        }
    }
}

fn json_tree(text: &str, side: &str, options: &HighlightOptions) -> Result<HighlightTree, VerifyError> {
    let mut value = json::parse_document(text, side)?;
    if options.case_insensitive_keys {
        value = json::lowercase_keys(value);
    }
    let mut tree = HighlightTree::new(json::ROOT, json_leaf(&value), Some(json::ROOT.to_string()));
    add_json(&mut tree, HighlightTree::ROOT, &value, json::ROOT);
    Ok(tree)
}

fn json_leaf(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) if map.is_empty() => Some("{}".to_string()),
        Value::Array(items) if items.is_empty() => Some("[]".to_string()),
        Value::Object(_) | Value::Array(_) => None,
        other => Some(json::render(other)),
    }
}

fn add_json(tree: &mut HighlightTree, parent: NodeId, value: &Value, path: &str) {
    match value {
        Value::Object(map) => {
            for (key, member) in map {
                let locator = json_member(path, key);
                let id = tree.add_child(parent, key.as_str(), json_leaf(member), Some(locator.clone()));
                add_json(tree, id, member, &locator);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                let locator = json_element(path, idx);
                let id = tree.add_child(parent, "", json_leaf(item), Some(locator.clone()));
                add_json(tree, id, item, &locator);
            }
        }
        _ => {}
    }
}

fn xml_tree(text: &str, side: &str, options: &HighlightOptions) -> Result<HighlightTree, VerifyError> {
    let document = xml::parse_document(text, side)?;
    let root = document.root_element();
    let name = xml_name(&xml::element_name(root), options);
    let mut tree = HighlightTree::new(name.clone(), None, Some(name.clone()));
    add_element(&mut tree, HighlightTree::ROOT, root, &name, options);
    Ok(tree)
}

fn xml_name(name: &str, options: &HighlightOptions) -> String {
    if options.case_insensitive_keys {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}

fn add_element(
    tree: &mut HighlightTree,
    id: NodeId,
    element: Node<'_, '_>,
    locator: &str,
    options: &HighlightOptions,
) {
    for attr in element.attributes() {
        let name = xml_name(&xml::attribute_name(element, &attr), options);
        tree.add_child(
            id,
            format!("@{}", name),
            Some(attr.value().to_string()),
            Some(format!("{}/@{}", locator, name)),
        );
    }

    let text = xml::own_text(element);
    if !text.is_empty() {
        tree.add_child(id, "text()", Some(text), Some(format!("{}/text()", locator)));
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for child in element.children().filter(|c| c.is_element()) {
        let name = xml_name(&xml::element_name(child), options);
        let count = seen.entry(name.clone()).or_insert(0);
        let child_locator = format!("{}/{}[{}]", locator, name, count);
        *count += 1;
        let child_id = tree.add_child(id, name, None, Some(child_locator.clone()));
        add_element(tree, child_id, child, &child_locator, options);
    }
}

fn table_tree(tables: Vec<Table>, options: &HighlightOptions) -> HighlightTree {
    let mut tree = HighlightTree::new("tables", None, None);
    for mut table in tables {
        if !table.is_consistent() {
            table.expand_table_to_max_row_size(&options.column_prefix);
        }
        let table_id = tree.add_child(
            HighlightTree::ROOT,
            table.name.as_str(),
            None,
            Some(table.name.clone()),
        );

        let header = tree.add_child(table_id, "header", None, Some(format!("{}/header", table.name)));
        for (c, name) in table.headers.iter().enumerate() {
            tree.add_child(header, "", Some(name.clone()), Some(table.column_locator(c)));
        }

        for (r, row) in table.rows.iter().enumerate() {
            let row_id = tree.add_child(table_id, "", None, Some(table.row_locator(r)));
            for (c, cell) in row.iter().enumerate() {
                let name = table.headers.get(c).cloned().unwrap_or_default();
                tree.add_child(row_id, name, Some(cell.clone()), Some(table.cell_locator(r, c)));
            }
        }
    }
    tree
}

fn lines_tree<'a, I>(lines: I, locator: fn(usize) -> String) -> HighlightTree
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tree = HighlightTree::new("lines", None, None);
    for (idx, line) in lines.into_iter().enumerate() {
        tree.add_child(HighlightTree::ROOT, "", Some(line.to_string()), Some(locator(idx)));
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> HighlightOptions {
        HighlightOptions::default()
    }

    #[test]
    fn test_json_paths() {
        let tree = build(ContentType::Json, r#"{"a": {"b": [1, {"c": "x"}]}}"#, "expected", &options()).unwrap();
        let c = tree.find_by_path("$.a.b[1].c").unwrap();
        assert_eq!(tree.node(c).value.as_deref(), Some("x"));
        assert_eq!(tree.depth(c), 4);
        assert!(tree.find_by_path("$.a.b[0]").is_some());
    }

    #[test]
    fn test_json_case_insensitive_paths() {
        let mut options = options();
        options.case_insensitive_keys = true;
        let tree = build(ContentType::Json, r#"{"Name": "x"}"#, "expected", &options).unwrap();
        let id = tree.find_by_path("$.name").unwrap();
        assert_eq!(tree.node(id).name, "name");
    }

    #[test]
    fn test_xml_paths() {
        let tree = build(
            ContentType::Xml,
            r#"<root><item id="1">a</item><other/><item id="2">b</item></root>"#,
            "expected",
            &options(),
        )
        .unwrap();
        let text = tree.find_by_path("parent:root/item[1]/text()").unwrap();
        assert_eq!(tree.node(text).value.as_deref(), Some("b"));
        let attr = tree.find_by_path("parent:root/item[0]/@id").unwrap();
        assert_eq!(tree.node(attr).value.as_deref(), Some("1"));
        assert!(tree.find_by_path("root/other[0]").is_some());
    }

    #[test]
    fn test_table_paths() {
        let tree = build(
            ContentType::Table,
            r#"{"name": "t", "headers": ["id"], "rows": [["1", "extra"]]}"#,
            "expected",
            &options(),
        )
        .unwrap();
        assert!(tree.find_by_path("t/column[1]").is_some());
        let cell = tree.find_by_path("t/row[0]/column[1]").unwrap();
        assert_eq!(tree.node(cell).value.as_deref(), Some("extra"));
        assert_eq!(tree.node(cell).name, "column_1");
    }

    #[test]
    fn test_text_paths() {
        let tree = build(ContentType::TaskList, "a\n\n b \n", "expected", &options()).unwrap();
        let task = tree.find_by_path("task[1]").unwrap();
        assert_eq!(tree.node(task).value.as_deref(), Some("b"));

        let tree = build(ContentType::FullText, "whole", "expected", &options()).unwrap();
        assert_eq!(tree.find_by_path("text"), Some(HighlightTree::ROOT));
    }

    #[test]
    fn test_unsupported_types() {
        let err = build(ContentType::Xsd, "", "expected", &options()).unwrap_err();
        assert!(matches!(err, VerifyError::ComparatorNotFound(_)));
    }
}
