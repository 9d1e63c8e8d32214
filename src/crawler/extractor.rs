//! Selector-driven extraction
//!
//! Turns a fetched HTML document into an [`Item`] plus the outbound links to
//! offer to the frontier. For each field the task selector is used when
//! present; otherwise a fixed, ordered list of generic probes is tried and the
//! first non-empty match wins. A field nothing matches is left empty; a
//! missing field never fails the item.

use crate::crawler::text::{
    clean_text, detect_language, normalize_lang_attr, parse_count, parse_date,
};
use crate::item::Item;
use crate::task::{Field, FieldSelectors};
use crate::url::{extract_domain, resolve_and_normalize};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use url::Url;

/// One generic fallback probe
#[derive(Debug, Clone, Copy)]
enum Probe {
    /// Visible text of the first matching element
    Text(&'static str),
    /// Attribute value of the first matching element
    Attr(&'static str, &'static str),
}

use Probe::{Attr, Text};

const TITLE_PROBES: &[Probe] = &[
    Text("title"),
    Text("h1"),
    Text(".title"),
    Text(".headline"),
    Attr("meta[property='og:title']", "content"),
    Attr("meta[name='twitter:title']", "content"),
];

const CONTENT_PROBES: &[Probe] = &[
    Text(".content"),
    Text(".article-content"),
    Text(".post-content"),
    Text(".entry-content"),
    Text(".main-content"),
    Text("article"),
    Text(".article-body"),
    Text(".post-body"),
    Text("main"),
    Text("body"),
];

const DESCRIPTION_PROBES: &[Probe] = &[
    Attr("meta[name='description']", "content"),
    Attr("meta[property='og:description']", "content"),
    Attr("meta[name='twitter:description']", "content"),
    Text(".description"),
    Text(".summary"),
    Text(".excerpt"),
];

const AUTHOR_PROBES: &[Probe] = &[
    Text(".author"),
    Text(".by-author"),
    Text(".post-author"),
    Text(".article-author"),
    Attr("meta[name='author']", "content"),
    Attr("meta[property='article:author']", "content"),
    Text(".byline"),
    Text(".writer"),
];

const PUBLISH_DATE_PROBES: &[Probe] = &[
    Attr("meta[property='article:published_time']", "content"),
    Attr("meta[name='publish_date']", "content"),
    Attr("meta[itemprop='datePublished']", "content"),
    Text(".publish-date"),
    Text(".date"),
    Text(".post-date"),
    Text(".article-date"),
    Attr("time[datetime]", "datetime"),
    Text("time"),
];

const CATEGORY_PROBES: &[Probe] = &[
    Attr("meta[property='article:section']", "content"),
    Text(".category"),
];

const KEYWORD_META: &str = "meta[name='keywords']";
const KEYWORD_ELEMENTS: &str = ".tag, .keyword, .label";
const TAG_ELEMENTS: &str = ".tag, .tags a, .category";
const VIDEO_SOURCES: &str = "video[src], video source[src], iframe[src*='youtube.com'], \
                             iframe[src*='youtu.be'], iframe[src*='vimeo.com']";

const VIEW_COUNT_PROBES: &[Probe] = &[
    Text(".view-count"),
    Text(".views-count"),
    Text(".views"),
    Text(".read-count"),
];
const COMMENT_COUNT_PROBES: &[Probe] = &[Text(".comment-count"), Text(".comments-count")];
const LIKE_COUNT_PROBES: &[Probe] = &[Text(".like-count"), Text(".likes-count"), Text(".likes")];
const SHARE_COUNT_PROBES: &[Probe] = &[
    Text(".share-count"),
    Text(".shares-count"),
    Text(".shares"),
];

const LANGUAGE_META: &str = "meta[http-equiv='content-language']";
const IMAGE_ELEMENTS: &str = "img[src], img[data-src]";
const LINK_ELEMENTS: &str = "a[href]";

const PROBE_TABLES: &[&[Probe]] = &[
    TITLE_PROBES,
    CONTENT_PROBES,
    DESCRIPTION_PROBES,
    AUTHOR_PROBES,
    PUBLISH_DATE_PROBES,
    CATEGORY_PROBES,
    VIEW_COUNT_PROBES,
    COMMENT_COUNT_PROBES,
    LIKE_COUNT_PROBES,
    SHARE_COUNT_PROBES,
];

const ELEMENT_SELECTORS: &[&str] = &[
    KEYWORD_META,
    KEYWORD_ELEMENTS,
    TAG_ELEMENTS,
    VIDEO_SOURCES,
    LANGUAGE_META,
    IMAGE_ELEMENTS,
    LINK_ELEMENTS,
];

/// Every built-in selector, parsed once per process
static BUILTIN_SELECTORS: Lazy<HashMap<&'static str, Selector>> = Lazy::new(|| {
    PROBE_TABLES
        .iter()
        .flat_map(|table| table.iter().map(Probe::selector))
        .chain(ELEMENT_SELECTORS.iter().copied())
        .filter_map(|raw| match Selector::parse(raw) {
            Ok(sel) => Some((raw, sel)),
            Err(e) => {
                tracing::error!(selector = raw, error = ?e, "built-in selector does not parse");
                None
            }
        })
        .collect()
});

impl Probe {
    fn selector(&self) -> &'static str {
        match *self {
            Text(sel) | Attr(sel, _) => sel,
        }
    }
}

/// Elements whose text is never part of the visible content
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements that separate words when their text is joined
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "section", "article", "header", "footer", "nav", "aside", "main", "blockquote", "pre",
    "table", "figure", "figcaption",
];

/// A fetched page handed to the extractor
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    /// URL the frontier dispatched
    pub url: &'a Url,
    /// URL after redirects; relative links resolve against it
    pub final_url: &'a Url,
    pub body: &'a str,
    pub fetched_at: DateTime<Utc>,
}

/// Extracted record and the candidate links for the frontier
#[derive(Debug, Clone)]
pub struct Extraction {
    pub item: Item,
    /// Absolute, normalized, de-duplicated in document order
    pub links: Vec<Url>,
}

#[derive(Debug, Clone, Default)]
struct CompiledSelectors {
    item: Option<Selector>,
    title: Option<Selector>,
    content: Option<Selector>,
    description: Option<Selector>,
    keywords: Option<Selector>,
    author: Option<Selector>,
    links: Option<Selector>,
    images: Option<Selector>,
}

/// Per-task extractor holding the compiled task selectors
#[derive(Debug, Clone)]
pub struct Extractor {
    selectors: CompiledSelectors,
}

impl Extractor {
    /// Compiles the task selectors
    ///
    /// # Returns
    ///
    /// * `Err(CrawlError::Validation)` - A selector does not parse
    pub fn new(selectors: &FieldSelectors) -> Result<Self, CrawlError> {
        let compile = |field: Field| -> Result<Option<Selector>, CrawlError> {
            selectors
                .get(field)
                .map(|raw| {
                    Selector::parse(raw).map_err(|e| {
                        CrawlError::Validation(format!(
                            "invalid {} selector '{}': {:?}",
                            field.key(),
                            raw,
                            e
                        ))
                    })
                })
                .transpose()
        };

        Ok(Self {
            selectors: CompiledSelectors {
                item: compile(Field::Item)?,
                title: compile(Field::Title)?,
                content: compile(Field::Content)?,
                description: compile(Field::Description)?,
                keywords: compile(Field::Keywords)?,
                author: compile(Field::Author)?,
                links: compile(Field::Links)?,
                images: compile(Field::Images)?,
            },
        })
    }

    /// Extracts an item and the outbound links from a page
    pub fn extract(&self, page: &Page<'_>) -> Extraction {
        let document = Html::parse_document(page.body);
        let root = document.root_element();
        let s = &self.selectors;

        // The item selector narrows every field lookup to its first match
        let scope = s
            .item
            .as_ref()
            .and_then(|sel| root.select(sel).next())
            .unwrap_or(root);

        let mut item = Item::new(page.url.as_str());
        item.timestamp = page.fetched_at;
        item.source = extract_domain(page.url).unwrap_or_default();

        item.title = field_text(scope, s.title.as_ref(), TITLE_PROBES);
        item.content = field_text(scope, s.content.as_ref(), CONTENT_PROBES);
        if item.content.is_empty() {
            item.content = visible_text(scope);
        }
        item.description = field_text(scope, s.description.as_ref(), DESCRIPTION_PROBES);
        item.author = field_text(scope, s.author.as_ref(), AUTHOR_PROBES);
        item.category = first_probe(scope, CATEGORY_PROBES).unwrap_or_default();

        item.publish_date = PUBLISH_DATE_PROBES
            .iter()
            .filter_map(|probe| probe_values(scope, *probe).into_iter().next())
            .find_map(|raw| parse_date(&raw, page.fetched_at));

        for keyword in extract_keywords(scope, s.keywords.as_ref()) {
            item.add_keyword(keyword);
        }
        for tag in all_texts(scope, TAG_ELEMENTS) {
            item.add_tag(tag);
        }

        let links = discover_links(root, page.final_url);
        match &s.links {
            Some(sel) => {
                for el in scope.select(sel) {
                    let href = el.value().attr("href").or_else(|| el.value().attr("src"));
                    if let Some(url) = href.and_then(|h| resolve_link(h, page.final_url)) {
                        item.add_link(url.as_str());
                    }
                }
            }
            None => {
                for url in &links {
                    item.add_link(url.as_str());
                }
            }
        }

        for image in extract_images(scope, s.images.as_ref(), page.final_url) {
            item.add_image(image);
        }
        for el in select_all(scope, VIDEO_SOURCES) {
            if let Some(src) = el.value().attr("src").and_then(|v| join(page.final_url, v)) {
                item.add_video(src);
            }
        }

        item.language = detect_page_language(&document, &item);

        item.view_count = first_count(scope, VIEW_COUNT_PROBES);
        item.comment_count = first_count(scope, COMMENT_COUNT_PROBES);
        item.like_count = first_count(scope, LIKE_COUNT_PROBES);
        item.share_count = first_count(scope, SHARE_COUNT_PROBES);

        Extraction { item, links }
    }
}

/// Task selector first, then the fallback probes
fn field_text(scope: ElementRef<'_>, task: Option<&Selector>, probes: &[Probe]) -> String {
    if let Some(sel) = task {
        if let Some(value) = scope
            .select(sel)
            .map(element_value)
            .find(|v| !v.is_empty())
        {
            return value;
        }
    }
    first_probe(scope, probes).unwrap_or_default()
}

fn first_probe(scope: ElementRef<'_>, probes: &[Probe]) -> Option<String> {
    probes
        .iter()
        .find_map(|probe| probe_values(scope, *probe).into_iter().next())
}

/// Non-empty values of a probe, in document order
fn probe_values(scope: ElementRef<'_>, probe: Probe) -> Vec<String> {
    let attr = match probe {
        Text(_) => None,
        Attr(_, attr) => Some(attr),
    };

    select_all(scope, probe.selector())
        .into_iter()
        .map(|el| match attr {
            Some(name) => el.value().attr(name).map(clean_text).unwrap_or_default(),
            None => visible_text(el),
        })
        .filter(|v| !v.is_empty())
        .collect()
}

/// Text of an element chosen by a task selector; `<meta>` yields its content
fn element_value(el: ElementRef<'_>) -> String {
    if el.value().name() == "meta" {
        el.value().attr("content").map(clean_text).unwrap_or_default()
    } else {
        visible_text(el)
    }
}

/// Matches of a built-in selector; an unparsable one matches nothing
fn select_all<'a>(scope: ElementRef<'a>, selector: &'static str) -> Vec<ElementRef<'a>> {
    match BUILTIN_SELECTORS.get(selector) {
        Some(sel) => scope.select(sel).collect(),
        None => Vec::new(),
    }
}

fn all_texts(scope: ElementRef<'_>, selector: &'static str) -> Vec<String> {
    select_all(scope, selector)
        .into_iter()
        .map(visible_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Cleaned text of an element, skipping script-like children
fn visible_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(el, &mut raw);
    clean_text(&raw)
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if HIDDEN_ELEMENTS.contains(&name) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if BLOCK_ELEMENTS.contains(&name) {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn extract_keywords(scope: ElementRef<'_>, task: Option<&Selector>) -> Vec<String> {
    let raw: Vec<String> = match task {
        Some(sel) => scope.select(sel).map(element_value).collect(),
        None => {
            let meta = probe_values(scope, Attr(KEYWORD_META, "content"));
            if meta.is_empty() {
                all_texts(scope, KEYWORD_ELEMENTS)
            } else {
                meta
            }
        }
    };

    raw.iter()
        .flat_map(|value| value.split([',', '，']))
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

fn extract_images(scope: ElementRef<'_>, task: Option<&Selector>, base: &Url) -> Vec<String> {
    let elements: Vec<ElementRef<'_>> = match task {
        Some(sel) => scope.select(sel).collect(),
        None => select_all(scope, IMAGE_ELEMENTS),
    };

    elements
        .into_iter()
        .filter_map(|el| {
            let value = el.value();
            value
                .attr("src")
                .or_else(|| value.attr("data-src"))
                .or_else(|| value.attr("content"))
                .filter(|src| !src.trim().starts_with("data:"))
                .and_then(|src| join(base, src))
        })
        .collect()
}

/// All followable `a[href]` links of the document
fn discover_links(root: ElementRef<'_>, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    select_all(root, LINK_ELEMENTS)
        .into_iter()
        .filter(|el| el.value().attr("download").is_none())
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_link(href, base))
        .filter(|url| seen.insert(url.as_str().to_string()))
        .collect()
}

/// Resolves a link href to a normalized absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel:, data: schemes
/// - fragment-only links (same page anchors)
/// - anything that does not resolve to http(s)
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    resolve_and_normalize(base, href).ok()
}

/// Resolves a media reference to an absolute http(s) URL, keeping its query
fn join(base: &Url, src: &str) -> Option<String> {
    let url = base.join(src.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn detect_page_language(document: &Html, item: &Item) -> String {
    let declared = document
        .root_element()
        .value()
        .attr("lang")
        .and_then(normalize_lang_attr)
        .or_else(|| {
            probe_values(
                document.root_element(),
                Attr(LANGUAGE_META, "content"),
            )
            .first()
            .and_then(|v| normalize_lang_attr(v))
        });

    declared
        .or_else(|| {
            let sample = format!("{} {}", item.title, item.content);
            detect_language(&sample).map(str::to_string)
        })
        .unwrap_or_default()
}

fn first_count(scope: ElementRef<'_>, probes: &[Probe]) -> u64 {
    probes
        .iter()
        .flat_map(|probe| probe_values(scope, *probe))
        .find_map(|v| parse_count(&v))
        .unwrap_or(0)
}
