use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static MULTI_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

// ── Public API ───────────────────────────────────────────────────────────────

/// Render a product page's DOM to markdown so the storefront extractors can
/// work on headings, plain text and image URLs line by line.
pub fn html_to_markdown(html: &str, base_url: &str) -> String {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let markdown = match document.select(&BODY_SELECTOR).next() {
        Some(body) => walk_children(body, base.as_ref()),
        None => walk_children(document.root_element(), base.as_ref()),
    };

    MULTI_NEWLINE_RE
        .replace_all(&markdown, "\n\n")
        .trim()
        .to_string()
}

// ── DOM tree walker ──────────────────────────────────────────────────────────

fn walk_element(el: ElementRef<'_>, base: Option<&Url>) -> String {
    let name = el.value().name();

    if matches!(
        name,
        "script" | "style" | "noscript" | "svg" | "template" | "iframe" | "head"
    ) {
        return String::new();
    }

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = normalize_text(&walk_children(el, base));
            if text.is_empty() {
                return String::new();
            }
            format!("\n\n{} {}\n\n", "#".repeat(level), text)
        }

        "img" => match resolve_img_src(el, base) {
            Some(src) => {
                let alt = el.value().attr("alt").unwrap_or("").trim();
                format!("![{}]({})\n", alt, src)
            }
            None => String::new(),
        },

        "a" => {
            let content = walk_children(el, base);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            match el.value().attr("href").and_then(|h| resolve(base, h)) {
                Some(href) => format!("[{}]({})", trimmed, href),
                None => trimmed.to_string(),
            }
        }

        "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "table"
        | "tr" => {
            let content = walk_children(el, base);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            format!("\n{}\n", trimmed)
        }

        "li" => {
            let content = walk_children(el, base);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            format!("\n- {}\n", trimmed)
        }

        "td" | "th" => format!("{} ", walk_children(el, base).trim()),

        "strong" | "b" => {
            let content = walk_children(el, base);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            format!("**{}**", trimmed)
        }

        "br" => "\n".to_string(),
        "hr" => "\n---\n".to_string(),

        _ => walk_children(el, base),
    }
}

fn walk_children(el: ElementRef<'_>, base: Option<&Url>) -> String {
    let mut result = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let collapsed = normalize_text(&text.text);
                if collapsed.is_empty() {
                    continue;
                }
                if text.text.starts_with(char::is_whitespace) && !result.ends_with(' ') {
                    result.push(' ');
                }
                result.push_str(&collapsed);
                if text.text.ends_with(char::is_whitespace) {
                    result.push(' ');
                }
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    result.push_str(&walk_element(child_el, base));
                }
            }
            _ => {}
        }
    }
    result
}

// ── Image helpers ────────────────────────────────────────────────────────────

fn resolve_img_src(el: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let v = el.value();

    // Lazy-loading attributes first, then src, then the widest srcset entry.
    let src = ["data-src", "data-original", "src"]
        .iter()
        .find_map(|a| v.attr(a))
        .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
        .map(|s| s.trim().to_string())
        .or_else(|| {
            v.attr("srcset")
                .or_else(|| v.attr("data-srcset"))
                .and_then(best_src_from_srcset)
        })?;

    resolve(base, &src)
}

fn best_src_from_srcset(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split_whitespace();
            let url = pieces.next()?;
            let score = pieces
                .next()
                .and_then(|d| d.strip_suffix('w').or_else(|| d.strip_suffix('x')))
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0);
            Some((score, url))
        })
        .fold(None::<(f64, &str)>, |best, candidate| match best {
            Some(b) if b.0 > candidate.0 => Some(b),
            _ => Some(candidate),
        })
        .map(|(_, url)| url.to_string())
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

/// Collapse whitespace runs into single spaces and trim.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head><title>Oats</title><style>.x{}</style></head>
          <body>
            <nav><a href="/cart">My Cart</a></nav>
            <h1>Rolled   Oats 1 kg</h1>
            <p>Whole grain <strong>oats</strong>.</p>
            <img src="/images/front.jpg" alt="Front">
            <img data-src="https://cdn.example.com/back.jpg" src="data:image/gif;base64,AAAA">
            <img srcset="https://cdn.example.com/s.jpg 200w, https://cdn.example.com/l.jpg 800w">
            <ul><li>High fibre</li><li>No sugar</li></ul>
            <script>var tracking = true;</script>
          </body>
        </html>"#;

    #[test]
    fn test_headings_and_text() {
        let md = html_to_markdown(PAGE, "https://shop.example.com/p/1");
        assert!(md.contains("# Rolled Oats 1 kg"));
        assert!(md.contains("Whole grain **oats**."));
        assert!(md.contains("- High fibre"));
        assert!(md.contains("My Cart"));
        assert!(!md.contains("tracking"));
        assert!(!md.contains(".x{}"));
    }

    #[test]
    fn test_images_resolved() {
        let md = html_to_markdown(PAGE, "https://shop.example.com/p/1");
        assert!(md.contains("![Front](https://shop.example.com/images/front.jpg)"));
        assert!(md.contains("(https://cdn.example.com/back.jpg)"));
        assert!(md.contains("(https://cdn.example.com/l.jpg)"));
        assert!(!md.contains("data:image"));
    }

    #[test]
    fn test_heading_on_own_line() {
        let md = html_to_markdown("<body><div>Intro<h2>Details</h2>Body</div></body>", "https://a.b/");
        assert!(md.lines().any(|l| l == "## Details"));
    }

    #[test]
    fn test_srcset_picks_widest() {
        assert_eq!(
            best_src_from_srcset("a.jpg 1x, b.jpg 3x, c.jpg 2x"),
            Some("b.jpg".to_string())
        );
        assert_eq!(best_src_from_srcset(""), None);
    }
}
