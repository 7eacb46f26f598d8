use crate::checkpoint::StoreSchema;
use crate::models::{ProcessedRecord, Source, WorkItem};
use crate::scrapers::extract::{
    extract_links, extract_price_history, FieldExtractor, FieldRule, ListRule, Strategy,
};
use crate::scrapers::traits::ListingSite;
use crate::scrapers::types::{Document, Extraction};
use anyhow::{Context, Result};
use scraper::{Html, Selector};
use std::path::Path;
use tracing::debug;
use url::Url;

const LISTING_URL: &str = "https://www.hipflat.co.th/en/thailand-projects/condo/bangkok-bm";

/// Numbered list sections and how many entries the store keeps of each
const LIST_SECTIONS: [(&str, &str, usize); 3] = [
    ("Features", "section:nth-of-type(4) > div:nth-of-type(1) > ul > li", 4),
    ("Parking and Lifts", "section:nth-of-type(4) > div:nth-of-type(2) > ul > li", 2),
    ("Management", "section:nth-of-type(4) > div:nth-of-type(3) > ul > li", 2),
];

/// Hipflat condo project pages: facilities, market prices and price history
pub struct HipflatSite {
    links: Selector,
    fields: FieldExtractor,
    canvas: Selector,
}

impl HipflatSite {
    pub fn new() -> Result<Self> {
        let links = Strategy::XPath("/html/body/main/div[3]/div//a".to_string())
            .compile()
            .context("Hipflat link selector")?;

        let rent_xpath = |span: usize| format!("/html/body/main/div[3]/div[3]/div[2]/div[1]/span[{}]", span);
        let characteristic = |class: &str| {
            format!("div.main-header > section.characteristics > div.{} > span.data", class)
        };

        let fields = vec![
            FieldRule::css("condo_name", "div.main-header > section.title > h1"),
            FieldRule::css("building", &characteristic("buildings")),
            FieldRule::css("floor", &characteristic("floor")),
            FieldRule::css("unit", &characteristic("units")),
            FieldRule::css("off_plan", &characteristic("completed")),
            FieldRule::xpaths("for_rent_price", &[rent_xpath(2).as_str()]),
            FieldRule::xpaths("for_rent_price_per_space", &[rent_xpath(3).as_str()]),
            FieldRule::xpaths("for_rent_evolution", &[rent_xpath(4).as_str()]),
            FieldRule::css("for_sale_price", ".market-stats__by-operation__summary__price.median"),
            FieldRule::css(
                "for_sale_price_per_space",
                ".market-stats__by-operation__summary__price.per-area",
            ),
            FieldRule::css("for_sale_evolution", ".market-stats__by-operation__summary__progress"),
            FieldRule::css("location", "div.main-header > section.title > span.location"),
        ];

        let lists = LIST_SECTIONS
            .iter()
            .map(|(prefix, css, count)| ListRule::css(prefix, css).limit(*count))
            .collect();

        Ok(Self {
            links,
            fields: FieldExtractor::new(fields, lists).context("Hipflat detail rules")?,
            canvas: Selector::parse("canvas")
                .map_err(|e| anyhow::anyhow!("canvas selector: {:?}", e))?,
        })
    }
}

impl ListingSite for HipflatSite {
    fn source(&self) -> Source {
        Source::Hipflat
    }

    fn listing_pages(&self, first: u32, last: u32) -> Vec<WorkItem> {
        (first..=last)
            .map(|page| WorkItem {
                url: format!("{}?page={}", LISTING_URL, page),
                page: Some(page),
                position: None,
            })
            .collect()
    }

    fn extract_links(&self, page: &Document) -> Result<Vec<String>> {
        let base = Url::parse(&page.url).with_context(|| format!("Invalid page URL {}", page.url))?;
        let document = Html::parse_document(&page.html);
        Ok(extract_links(&document, &self.links, &base))
    }

    fn detail_schema(&self, dir: &Path) -> StoreSchema {
        let mut columns: Vec<String> = self.fields.field_names().map(str::to_string).collect();
        for (prefix, _, count) in LIST_SECTIONS {
            columns.extend((1..=count).map(|i| format!("{} {}", prefix, i)));
        }
        columns.push("scraped_at".to_string());

        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        StoreSchema::new(dir.join("Facility.csv"), &columns, "link")
            .with_required(self.fields.field_names())
    }

    fn extract_details(&self, page: &Document) -> Extraction {
        let document = Html::parse_document(&page.html);

        let mut record = ProcessedRecord::new(page.url.as_str());
        record.extend(self.fields.extract(&document));

        let history = extract_price_history(&document, &self.canvas);
        debug!("{} price history points on {}", history.len(), page.url);

        Extraction {
            record,
            nearby: Vec::new(),
            history,
        }
    }

    fn collects_history(&self) -> bool {
        true
    }
}
