//! Analyzer report scraping
//!
//! Pulls the three query sections out of a pgbadger HTML report by their
//! fixed element ids and re-serializes each as a sanitized snippet: script
//! and style subtrees are dropped, along with event-handler attributes and
//! `javascript:` URLs, so the snippets are safe to embed in a page.

use std::io;

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use tracing::warn;

pub const SLOWEST_SECTION_ID: &str = "slowest-individual-queries";
pub const TIME_CONSUMING_SECTION_ID: &str = "time-consuming-queries";
pub const MOST_FREQUENT_SECTION_ID: &str = "most-frequent-queries";

const DISALLOWED_ELEMENTS: [&str; 6] = ["script", "style", "iframe", "object", "embed", "form"];

/// The scraped report sections. A section missing from the report is `None`.
#[derive(Debug, Clone, Default)]
pub struct ReportSections {
    pub slowest: Option<String>,
    pub time_consuming: Option<String>,
    pub most_frequent: Option<String>,
}

/// Scrape the three named query sections out of an analyzer HTML report.
pub fn report_sections(html: &[u8]) -> ReportSections {
    let dom = match parse(html) {
        Ok(dom) => dom,
        Err(err) => {
            warn!("analyzer report is not readable as HTML: {}", err);
            return ReportSections::default();
        }
    };
    ReportSections {
        slowest: extract_section(&dom.document, SLOWEST_SECTION_ID),
        time_consuming: extract_section(&dom.document, TIME_CONSUMING_SECTION_ID),
        most_frequent: extract_section(&dom.document, MOST_FREQUENT_SECTION_ID),
    }
}

fn parse(html: &[u8]) -> io::Result<RcDom> {
    parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .read_from(&mut &*html)
}

/// Locate the element with the given id, sanitize its subtree and
/// serialize it back to an HTML snippet.
fn extract_section(root: &Handle, id: &str) -> Option<String> {
    let node = find_by_id(root, id)?;
    sanitize(&node);
    let mut buf = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::IncludeNode,
        ..Default::default()
    };
    match serialize(&mut buf, &SerializableHandle::from(node), opts) {
        Ok(()) => String::from_utf8(buf).ok(),
        Err(err) => {
            warn!("section '{}' not serializable: {}", id, err);
            None
        }
    }
}

fn find_by_id(handle: &Handle, id: &str) -> Option<Handle> {
    if let NodeData::Element { attrs, .. } = &handle.data {
        let matches = attrs
            .borrow()
            .iter()
            .any(|attr| attr.name.local.as_ref() == "id" && attr.value.as_ref() == id);
        if matches {
            return Some(handle.clone());
        }
    }
    for child in handle.children.borrow().iter() {
        if let Some(found) = find_by_id(child, id) {
            return Some(found);
        }
    }
    None
}

/// Strip active content in place: disallowed elements, comments,
/// event-handler attributes and `javascript:` URLs.
fn sanitize(handle: &Handle) {
    if let NodeData::Element { attrs, .. } = &handle.data {
        attrs.borrow_mut().retain(|attr| {
            let name = attr.name.local.as_ref();
            if name.starts_with("on") {
                return false;
            }
            if (name == "href" || name == "src")
                && attr
                    .value
                    .trim_start()
                    .to_ascii_lowercase()
                    .starts_with("javascript:")
            {
                return false;
            }
            true
        });
    }

    handle.children.borrow_mut().retain(|child| match &child.data {
        NodeData::Element { name, .. } => !DISALLOWED_ELEMENTS.contains(&name.local.as_ref()),
        NodeData::Comment { .. } => false,
        _ => true,
    });

    for child in handle.children.borrow().iter() {
        sanitize(child);
    }
}
