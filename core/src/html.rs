use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Node, Selector};

use crate::tokenizer::normalize_text;

pub const EMPTY_TITLE: &str = "EMPTY_TITLE";

lazy_static! {
    static ref SEL_TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref SEL_BODY: Selector = Selector::parse("body").expect("valid selector");
    static ref SEL_LINK: Selector = Selector::parse("a[href]").expect("valid selector");
    static ref SEL_ID: Selector = Selector::parse("[id]").expect("valid selector");
    static ref SEL_NAMED: Selector = Selector::parse("a[name]").expect("valid selector");
}

/// Elements whose text is taken as the prose surrounding an inline link.
const BLOCKS: &[&str] = &[
    "p", "li", "dd", "dt", "td", "th", "div", "blockquote", "pre", "section", "article",
    "h1", "h2", "h3", "h4", "h5", "h6", "caption", "figcaption", "body",
];

/// An `a[href]` element as found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    /// Entity-decoded, whitespace-normalized label.
    pub text: String,
    /// Normalized text of the nearest enclosing block element.
    pub context: String,
}

/// Parsed HTML document. Not `Send`: parse it on the worker that uses it.
pub struct HtmlPage {
    doc: Html,
}

impl HtmlPage {
    pub fn parse(markup: &str) -> Self {
        Self { doc: Html::parse_document(markup) }
    }

    pub fn title(&self) -> String {
        let title = self
            .doc
            .select(&SEL_TITLE)
            .next()
            .map(|t| normalize_text(&t.text().collect::<String>()))
            .unwrap_or_default();
        if title.is_empty() { EMPTY_TITLE.to_string() } else { title }
    }

    pub fn plain_text(&self) -> String {
        match self.doc.select(&SEL_BODY).next() {
            Some(body) => element_text(body),
            None => element_text(self.doc.root_element()),
        }
    }

    pub fn anchors(&self) -> Vec<Anchor> {
        self.doc
            .select(&SEL_LINK)
            .filter_map(|a| {
                let href = a.value().attr("href")?.trim().to_string();
                let text = element_text(a);
                let context = enclosing_block(a).map(element_text).unwrap_or_else(|| text.clone());
                Some(Anchor { href, text, context })
            })
            .collect()
    }

    /// Text of the subsection starting at the element whose `id` (or, for older pages,
    /// `<a name>`) is `fragment`, running over following siblings up to the next element
    /// carrying an `id`. `None` when no such element exists or the subsection is empty.
    pub fn fragment_text(&self, fragment: &str) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }
        let start = self
            .doc
            .select(&SEL_ID)
            .find(|e| e.value().attr("id") == Some(fragment))
            .or_else(|| self.doc.select(&SEL_NAMED).find(|e| e.value().attr("name") == Some(fragment)))?;

        let mut raw = element_text(start);
        let mut next = start.next_sibling();
        while let Some(node) = next {
            match node.value() {
                Node::Text(t) => raw.push_str(t),
                Node::Element(e) => {
                    if e.attr("id").is_some() {
                        break;
                    }
                    if let Some(el) = ElementRef::wrap(node) {
                        raw.push(' ');
                        raw.push_str(&element_text(el));
                        raw.push(' ');
                    }
                }
                _ => {}
            }
            next = node.next_sibling();
        }
        let text = normalize_text(&raw);
        if text.is_empty() { None } else { Some(text) }
    }
}

/// Text of an element with block boundaries kept as word breaks; inline markup joins seamlessly.
fn element_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(t) => raw.push_str(t),
            Node::Element(e) if e.name() == "br" || BLOCKS.contains(&e.name()) => raw.push(' '),
            _ => {}
        }
    }
    normalize_text(&raw)
}

fn enclosing_block(a: ElementRef<'_>) -> Option<ElementRef<'_>> {
    a.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| BLOCKS.contains(&e.value().name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> The  Page </title></head><body>
        <div class="nav"><a href="index.html">Home</a></div>
        <p>Call the <a href="B.html#make">make&nbsp;widget</a> function &amp; friends.</p>
        <h2 id="first">First</h2>
        <p>alpha beta</p>
        <p>gamma</p>
        <h2 id="second">Second</h2>
        <p>delta</p>
        <a name="legacy"></a><p>old style anchor text</p>
    </body></html>"#;

    #[test]
    fn title_and_fallback() {
        assert_eq!(HtmlPage::parse(PAGE).title(), "The Page");
        assert_eq!(HtmlPage::parse("<p>x</p>").title(), EMPTY_TITLE);
    }

    #[test]
    fn anchors_carry_block_context() {
        let page = HtmlPage::parse(PAGE);
        let anchors = page.anchors();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].text, "Home");
        assert_eq!(anchors[0].context, "Home");
        assert_eq!(anchors[1].href, "B.html#make");
        assert_eq!(anchors[1].text, "make widget");
        assert_eq!(anchors[1].context, "Call the make widget function & friends.");
    }

    #[test]
    fn fragment_stops_at_next_id() {
        let page = HtmlPage::parse(PAGE);
        assert_eq!(page.fragment_text("first").as_deref(), Some("First alpha beta gamma"));
        assert_eq!(page.fragment_text("second").as_deref(), Some("Second delta old style anchor text"));
        assert_eq!(page.fragment_text("legacy").as_deref(), Some("old style anchor text"));
        assert_eq!(page.fragment_text("missing"), None);
    }

    #[test]
    fn plain_text_is_normalized() {
        let text = HtmlPage::parse(PAGE).plain_text();
        assert!(text.starts_with("Home Call the make widget function & friends."));
        assert!(!text.contains("  "));
    }
}
