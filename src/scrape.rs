//! Precinct-level results from the Board of Elections ward pages.
//!
//! Every ward page has the same table layout, with each cell value wrapped
//! in a `<b>` tag. The precinct rows are a fixed number of tags wide and sit
//! between a fixed number of heading and footer tags, so the decoder reads
//! values at fixed offsets and checks that each one is a number.

use crate::config::ScrapeConfig;
use crate::results::ResultTable;
use crate::types::{Candidate, ResultRow, RowKey};
use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use std::ops::RangeInclusive;
use tracing::{info, warn};

/// Anything that can produce the precinct rows for one ward.
pub trait ResultSource {
    fn ward_rows(&self, ward: u32) -> Result<Vec<ResultRow>>;
}

pub trait PageFetcher {
    fn fetch_ward_page(&self, ward: u32) -> Result<String>;
}

/// Blocking GET against a URL template containing `{ward}`.
pub struct HttpFetcher {
    client: Client,
    url_template: String,
}

impl HttpFetcher {
    pub fn new(url_template: &str) -> Result<Self> {
        if !url_template.contains("{ward}") {
            bail!("URL template {:?} has no {{ward}} placeholder", url_template);
        }
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpFetcher { client, url_template: url_template.to_string() })
    }

    pub fn url_for(&self, ward: u32) -> String {
        self.url_template.replace("{ward}", &ward.to_string())
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch_ward_page(&self, ward: u32) -> Result<String> {
        let url = self.url_for(ward);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("Request failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("HTTP error from {}", url))?;
        response
            .text()
            .with_context(|| format!("Failed to read body of {}", url))
    }
}

/// Where the values live among the bold tags of a ward page.
#[derive(Debug, Clone, PartialEq)]
pub struct TagLayout {
    pub leading_tags: usize,
    pub fixed_tags: usize,
    pub row_width: usize,
    pub candidate_stride: usize,
}

impl TagLayout {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        TagLayout {
            leading_tags: config.leading_tags,
            fixed_tags: config.fixed_tags,
            row_width: config.row_width,
            candidate_stride: config.candidate_stride,
        }
    }

    fn check(&self, candidates: usize) -> Result<()> {
        if self.row_width == 0 || self.candidate_stride == 0 {
            bail!("Row width and candidate stride must be positive");
        }
        if self.leading_tags > self.fixed_tags {
            bail!("Leading tags exceed the fixed tag count");
        }
        if candidates * self.candidate_stride >= self.row_width {
            bail!(
                "{} candidates at stride {} do not fit in a row of {} tags",
                candidates,
                self.candidate_stride,
                self.row_width
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPage {
    pub rows: Vec<ResultRow>,
    /// Tags left over after the last whole row; non-zero means the layout
    /// did not match.
    pub leftover_tags: usize,
}

/// Decode the bold tag texts of one ward page. A row is the precinct number
/// followed by candidate counts every `candidate_stride` tags; votes cast is
/// the sum of the counts.
pub fn decode_bold_tags(
    tags: &[String],
    ward: u32,
    candidates: &[Candidate],
    layout: &TagLayout,
) -> Result<DecodedPage> {
    layout.check(candidates.len())?;

    if tags.len() < layout.fixed_tags {
        warn!(
            "Ward {} page has {} bold tags, fewer than the {} fixed ones",
            ward,
            tags.len(),
            layout.fixed_tags
        );
        return Ok(DecodedPage { rows: Vec::new(), leftover_tags: tags.len() });
    }

    let data_tags = tags.len() - layout.fixed_tags;
    let nrows = data_tags / layout.row_width;
    let leftover_tags = data_tags % layout.row_width;
    if leftover_tags != 0 {
        warn!(
            "Pattern for number of precincts broken in ward {} ({} tags left over)",
            ward, leftover_tags
        );
    }

    let value = |index: usize| -> Result<u32> {
        let text = tags
            .get(index)
            .ok_or_else(|| anyhow!("Ward {}: tag {} out of range", ward, index))?;
        text.trim()
            .replace(',', "")
            .parse()
            .map_err(|_| anyhow!("Ward {}: tag {} is {:?}, expected a number", ward, index, text))
    };

    let mut rows = Vec::with_capacity(nrows);
    for i in 0..nrows {
        let start = layout.leading_tags + i * layout.row_width;
        let precinct = value(start)?;
        let votes = (1..=candidates.len())
            .map(|j| value(start + j * layout.candidate_stride))
            .collect::<Result<Vec<u32>>>()?;
        let votes_cast = votes.iter().sum();
        rows.push(ResultRow { key: RowKey::precinct(ward, precinct), votes, votes_cast });
    }

    Ok(DecodedPage { rows, leftover_tags })
}

/// Text content of every `<b>...</b>` element, in document order.
pub fn bold_texts(html: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(rel) = lower[from..].find("<b") {
        let start = from + rel;
        let after = start + 2;
        // `<b>` or `<b attr=...>`, not `<br>` or `<body>`.
        let is_bold = matches!(lower.as_bytes().get(after), Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r'));
        if !is_bold {
            from = after;
            continue;
        }
        let Some(open_end) = lower[after..].find('>').map(|i| after + i + 1) else {
            break;
        };
        let Some(close) = lower[open_end..].find("</b>").map(|i| open_end + i) else {
            break;
        };
        out.push(normalize_entities(&strip_tags(&html[open_end..close])));
        from = close + 4;
    }
    out
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_entities(s: &str) -> String {
    s.replace("&nbsp;", " ").replace("&amp;", "&").trim().to_string()
}

/// Fixed-offset reader over fetched ward pages.
pub struct BoldTagSource<F> {
    fetcher: F,
    candidates: Vec<Candidate>,
    layout: TagLayout,
}

impl<F: PageFetcher> BoldTagSource<F> {
    pub fn new(fetcher: F, candidates: Vec<Candidate>, layout: TagLayout) -> Self {
        BoldTagSource { fetcher, candidates, layout }
    }
}

impl<F: PageFetcher> ResultSource for BoldTagSource<F> {
    fn ward_rows(&self, ward: u32) -> Result<Vec<ResultRow>> {
        let html = self.fetcher.fetch_ward_page(ward)?;
        let tags = bold_texts(&html);
        let page = decode_bold_tags(&tags, ward, &self.candidates, &self.layout)?;
        Ok(page.rows)
    }
}

/// Collect the rows of every ward in `wards`, one request at a time.
pub fn scrape_precincts<S: ResultSource + ?Sized>(
    source: &S,
    wards: RangeInclusive<u32>,
    candidates: &[Candidate],
) -> Result<ResultTable> {
    let mut table = ResultTable::new(candidates.to_vec());
    for ward in wards {
        let rows = source
            .ward_rows(ward)
            .with_context(|| format!("Failed to scrape ward {}", ward))?;
        info!("Ward {}: {} precincts", ward, rows.len());
        for row in rows {
            table.insert(row)?;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Election;
    use std::collections::HashMap;

    fn layout() -> TagLayout {
        TagLayout::from_config(&ScrapeConfig::default())
    }

    /// 13 heading tags, `rows` precinct rows of 12, 25 footer tags.
    fn synthetic_tags(rows: &[(u32, [u32; 5])]) -> Vec<String> {
        let mut tags: Vec<String> = (0..13).map(|i| format!("Heading {}", i)).collect();
        for (precinct, counts) in rows {
            tags.push(precinct.to_string());
            tags.push("999".to_string());
            for c in counts {
                tags.push(c.to_string());
                tags.push("12.5%".to_string());
            }
        }
        tags.extend((0..25).map(|i| format!("Footer {}", i)));
        tags
    }

    fn page(tags: &[String]) -> String {
        let mut html = String::from("<html><body><table>");
        for t in tags {
            html.push_str(&format!("<tr><td><B>{}</B></td></tr><br>", t));
        }
        html.push_str("</table></body></html>");
        html
    }

    #[test]
    fn decodes_rows_at_fixed_offsets() {
        let tags = synthetic_tags(&[(1, [100, 5, 6, 80, 9]), (2, [1, 2, 3, 4, 5])]);
        let decoded = decode_bold_tags(&tags, 7, Election::Mayor2015.candidates(), &layout()).unwrap();
        assert_eq!(decoded.leftover_tags, 0);
        assert_eq!(decoded.rows.len(), 2);
        assert_eq!(decoded.rows[0].key, RowKey::precinct(7, 1));
        assert_eq!(decoded.rows[0].votes, vec![100, 5, 6, 80, 9]);
        assert_eq!(decoded.rows[0].votes_cast, 200);
        assert_eq!(decoded.rows[1].votes_cast, 15);
    }

    #[test]
    fn uneven_tag_count_drops_partial_row() {
        let mut tags = synthetic_tags(&[(1, [1, 1, 1, 1, 1]), (2, [2, 2, 2, 2, 2])]);
        tags.push("Footnote".into());
        let decoded = decode_bold_tags(&tags, 3, Election::Mayor2015.candidates(), &layout()).unwrap();
        assert_eq!(decoded.leftover_tags, 1);
        assert_eq!(decoded.rows.len(), 2);
    }

    #[test]
    fn short_page_yields_no_rows() {
        let tags: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let decoded = decode_bold_tags(&tags, 1, Election::Mayor2015.candidates(), &layout()).unwrap();
        assert!(decoded.rows.is_empty());
    }

    #[test]
    fn non_numeric_cell_is_a_structure_error() {
        let mut tags = synthetic_tags(&[(1, [1, 2, 3, 4, 5])]);
        tags[13 + 4] = "WILLIE WILSON".to_string();
        let err = decode_bold_tags(&tags, 9, Election::Mayor2015.candidates(), &layout()).unwrap_err();
        assert!(err.to_string().contains("tag 17"), "{}", err);
    }

    #[test]
    fn layout_must_fit_candidates() {
        let narrow = TagLayout { row_width: 6, ..layout() };
        assert!(decode_bold_tags(&[], 1, Election::Mayor2015.candidates(), &narrow).is_err());
    }

    #[test]
    fn bold_texts_skips_br_and_body() {
        let html = "<body><br><b>12</b><BR/><b class=x> 1,204 &nbsp;</b><b><font>3</font></b><bdi>no</bdi>";
        assert_eq!(bold_texts(html), vec!["12", "1,204", "3"]);
    }

    struct FakeFetcher(HashMap<u32, String>);

    impl PageFetcher for FakeFetcher {
        fn fetch_ward_page(&self, ward: u32) -> Result<String> {
            self.0
                .get(&ward)
                .cloned()
                .ok_or_else(|| anyhow!("no page for ward {}", ward))
        }
    }

    #[test]
    fn scrape_collects_every_ward() {
        let pages: HashMap<u32, String> = [
            (1, page(&synthetic_tags(&[(1, [10, 0, 0, 10, 0]), (2, [5, 5, 5, 5, 5])]))),
            (2, page(&synthetic_tags(&[(1, [3, 3, 3, 3, 3])]))),
        ]
        .into_iter()
        .collect();
        let candidates = Election::Mayor2015.candidates();
        let source = BoldTagSource::new(FakeFetcher(pages), candidates.to_vec(), layout());

        let table = scrape_precincts(&source, 1..=2, candidates).unwrap();
        assert_eq!(table.len(), 3);
        let f = table.vote_fraction(&RowKey::precinct(1, 1), Candidate::ChuyGarcia).unwrap();
        assert!((f - 0.5).abs() < 1e-12);

        assert!(scrape_precincts(&source, 1..=3, candidates).is_err());
    }

    #[test]
    fn url_template_substitutes_ward() {
        let fetcher = HttpFetcher::new(&ScrapeConfig::default().url_template).unwrap();
        assert!(fetcher.url_for(17).contains("Ward=17&"));
        assert!(HttpFetcher::new("http://example.com/").is_err());
    }
}
