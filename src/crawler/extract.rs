//! HTML extraction for catalog pages
//!
//! Three page shapes matter: the index sidebar (category list), category
//! listing pages (product links plus a next-page link), and product detail
//! pages (the full record). All link extraction joins hrefs against the
//! page URL they were found on, since the catalog uses relative links
//! throughout.

use std::collections::HashMap;

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use crate::crawler::ExtractError;
use crate::model::{CatalogRecord, RecordStatus};

fn selector(s: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(s).map_err(|_| ExtractError::Selector(s))
}

/// Extracts (name, url) pairs from the index sidebar category list
pub fn extract_categories(html: &str, page_url: &Url) -> Vec<(String, Url)> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(".side_categories ul.nav li ul li a") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|a| {
            let name = a.text().collect::<String>().trim().to_string();
            let href = a.value().attr("href")?;
            let url = page_url.join(href).ok()?;
            (!name.is_empty()).then_some((name, url))
        })
        .collect()
}

/// Extracts product detail-page links from a category listing page
pub fn extract_item_links(html: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("article.product_pod h3 a") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            page_url.join(href).ok()
        })
        .collect()
}

/// Finds the next-page link on a category listing page, if any
pub fn next_page_url(html: &str, page_url: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("li.next a").ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    page_url.join(href).ok()
}

/// Extracts a full catalog record from a product detail page
///
/// The caller overrides `category`, `http_status`, and `response_time_secs`
/// with crawl context; this function fills what the markup provides.
pub fn extract_record(html: &str, page_url: &Url) -> Result<CatalogRecord, ExtractError> {
    let document = Html::parse_document(html);

    let root = document
        .select(&selector("article.product_page")?)
        .next()
        .ok_or(ExtractError::MissingElement("article.product_page"))?;

    let title = root
        .select(&selector("h1")?)
        .next()
        .map(|h1| h1.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(ExtractError::MissingElement("h1"))?;

    let info = product_info_table(&root)?;

    let price_incl_tax = parse_price(&info, "Price (incl. tax)", "price_incl_tax")?;
    let price_excl_tax = parse_price(&info, "Price (excl. tax)", "price_excl_tax")?;
    let availability = info.get("Availability").cloned();
    let num_reviews = info
        .get("Number of reviews")
        .and_then(|v| v.parse::<u32>().ok());

    Ok(CatalogRecord {
        source_url: page_url.to_string(),
        title,
        category: breadcrumb_category(&document),
        description: product_description(&document),
        price_incl_tax,
        price_excl_tax,
        availability,
        num_reviews,
        rating: Some(star_rating(&root)),
        image_url: image_url(&root, page_url),
        content_fingerprint: hex::encode(Sha256::digest(html.as_bytes())),
        snapshot_ref: None,
        last_crawled_at: Utc::now(),
        status: RecordStatus::Success,
        http_status: None,
        response_time_secs: None,
    })
}

/// Reads the key/value product information table
fn product_info_table(root: &ElementRef<'_>) -> Result<HashMap<String, String>, ExtractError> {
    let rows = selector("table.table-striped tr")?;
    let th = selector("th")?;
    let td = selector("td")?;

    let mut info = HashMap::new();
    for row in root.select(&rows) {
        let key = row
            .select(&th)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string());
        let value = row
            .select(&td)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string());
        if let (Some(key), Some(value)) = (key, value) {
            info.insert(key, value);
        }
    }
    Ok(info)
}

/// Parses a price cell; missing is fine, malformed or non-positive is not
fn parse_price(
    info: &HashMap<String, String>,
    key: &str,
    field: &'static str,
) -> Result<Option<f64>, ExtractError> {
    let Some(raw) = info.get(key) else {
        return Ok(None);
    };
    // Strip the currency symbol, which may be mangled by encoding
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let price = cleaned.parse::<f64>().ok().filter(|p| *p > 0.0);
    match price {
        Some(p) => Ok(Some(p)),
        None => Err(ExtractError::InvalidPrice {
            field,
            value: raw.clone(),
        }),
    }
}

/// Category is the third breadcrumb entry: Home / Books / <category>
fn breadcrumb_category(document: &Html) -> Option<String> {
    let selector = Selector::parse("ul.breadcrumb li a").ok()?;
    let anchor = document.select(&selector).nth(2)?;
    let name = anchor.text().collect::<String>().trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// The description is the paragraph following the `#product_description`
/// heading, not inside it
fn product_description(document: &Html) -> Option<String> {
    let selector = Selector::parse("#product_description").ok()?;
    let heading = document.select(&selector).next()?;
    let paragraph = heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "p")?;
    let text = paragraph.text().collect::<String>().trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Star rating encoded as a class word on `p.star-rating`, 0 when absent
fn star_rating(root: &ElementRef<'_>) -> u8 {
    let Ok(selector) = Selector::parse("p.star-rating") else {
        return 0;
    };
    let Some(element) = root.select(&selector).next() else {
        return 0;
    };
    for class in element.value().classes() {
        match class {
            "One" => return 1,
            "Two" => return 2,
            "Three" => return 3,
            "Four" => return 4,
            "Five" => return 5,
            _ => {}
        }
    }
    0
}

fn image_url(root: &ElementRef<'_>, page_url: &Url) -> Option<String> {
    let selector = Selector::parse(".item.active img").ok()?;
    let src = root.select(&selector).next()?.value().attr("src")?;
    page_url.join(src).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_PAGE: &str = r#"
<html><body>
<ul class="breadcrumb">
  <li><a href="/">Home</a></li>
  <li><a href="/catalogue/category/books_1/index.html">Books</a></li>
  <li><a href="/catalogue/category/books/poetry_23/index.html">Poetry</a></li>
  <li class="active">A Light in the Attic</li>
</ul>
<article class="product_page">
  <div class="item active"><img src="../../media/cache/attic.jpg"/></div>
  <div class="product_main">
    <h1>A Light in the Attic</h1>
    <p class="star-rating Three"></p>
  </div>
  <div id="product_description"><h2>Product Description</h2></div>
  <p>It's hard to imagine a world without A Light in the Attic.</p>
  <table class="table table-striped">
    <tr><th>UPC</th><td>a897fe39b1053632</td></tr>
    <tr><th>Price (excl. tax)</th><td>£51.77</td></tr>
    <tr><th>Price (incl. tax)</th><td>£51.77</td></tr>
    <tr><th>Availability</th><td>In stock (22 available)</td></tr>
    <tr><th>Number of reviews</th><td>0</td></tr>
  </table>
</article>
</body></html>"#;

    fn page_url() -> Url {
        Url::parse("https://example.com/catalogue/a-light-in-the-attic_1000/index.html").unwrap()
    }

    #[test]
    fn test_extract_record_full() {
        let record = extract_record(DETAIL_PAGE, &page_url()).unwrap();
        assert_eq!(record.title, "A Light in the Attic");
        assert_eq!(record.category.as_deref(), Some("Poetry"));
        assert_eq!(record.price_incl_tax, Some(51.77));
        assert_eq!(record.price_excl_tax, Some(51.77));
        assert_eq!(
            record.availability.as_deref(),
            Some("In stock (22 available)")
        );
        assert_eq!(record.num_reviews, Some(0));
        assert_eq!(record.rating, Some(3));
        assert!(record
            .description
            .as_deref()
            .unwrap()
            .starts_with("It's hard to imagine"));
        assert!(record
            .image_url
            .as_deref()
            .unwrap()
            .ends_with("/media/cache/attic.jpg"));
        assert_eq!(record.content_fingerprint.len(), 64);
    }

    #[test]
    fn test_extract_record_missing_root() {
        let err = extract_record("<html><body></body></html>", &page_url()).unwrap_err();
        assert!(matches!(err, ExtractError::MissingElement(_)));
    }

    #[test]
    fn test_extract_record_rejects_zero_price() {
        let html = DETAIL_PAGE.replace("£51.77", "£0.00");
        let err = extract_record(&html, &page_url()).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPrice { .. }));
    }

    #[test]
    fn test_extract_record_missing_price_row_is_none() {
        let html = DETAIL_PAGE
            .replace("<tr><th>Price (excl. tax)</th><td>£51.77</td></tr>", "");
        let record = extract_record(&html, &page_url()).unwrap();
        assert_eq!(record.price_excl_tax, None);
        assert_eq!(record.price_incl_tax, Some(51.77));
    }

    #[test]
    fn test_extract_categories() {
        let html = r#"
<div class="side_categories">
  <ul class="nav nav-list">
    <li><a href="catalogue/category/books_1/index.html">Books</a>
      <ul>
        <li><a href="catalogue/category/books/travel_2/index.html"> Travel </a></li>
        <li><a href="catalogue/category/books/poetry_23/index.html"> Poetry </a></li>
      </ul>
    </li>
  </ul>
</div>"#;
        let base = Url::parse("https://example.com/index.html").unwrap();
        let categories = extract_categories(html, &base);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].0, "Travel");
        assert_eq!(
            categories[1].1.as_str(),
            "https://example.com/catalogue/category/books/poetry_23/index.html"
        );
    }

    #[test]
    fn test_extract_item_links_and_pagination() {
        let html = r#"
<article class="product_pod"><h3><a href="../../../attic_1000/index.html">Attic</a></h3></article>
<article class="product_pod"><h3><a href="../../../soumission_998/index.html">Soumission</a></h3></article>
<ul class="pager"><li class="next"><a href="page-2.html">next</a></li></ul>"#;
        let page =
            Url::parse("https://example.com/catalogue/category/books/poetry_23/index.html")
                .unwrap();

        let links = extract_item_links(html, &page);
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].as_str(),
            "https://example.com/catalogue/attic_1000/index.html"
        );

        let next = next_page_url(html, &page).unwrap();
        assert_eq!(
            next.as_str(),
            "https://example.com/catalogue/category/books/poetry_23/page-2.html"
        );

        assert!(next_page_url("<html></html>", &page).is_none());
    }
}
