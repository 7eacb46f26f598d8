use crate::checkpoint::StoreSchema;
use crate::models::{ProcessedRecord, Source, WorkItem};
use crate::scrapers::extract::{extract_links, Cleanup, FieldExtractor, FieldRule, NearbyExtractor, Strategy};
use crate::scrapers::traits::ListingSite;
use crate::scrapers::types::{Document, Extraction};
use anyhow::{Context, Result};
use scraper::Html;
use std::path::Path;
use url::Url;

const LISTING_URL: &str =
    "https://www.livinginsider.com/searchword_en/Condo/Rent/1/property-listing-condo-for-rent.html";

/// Listing cards on a search result page
const CARD_LINKS: &str = "div:nth-of-type(3) div.col-md-3.col-sm-4:nth-of-type(n+2) a[href]";

/// Root of the detail page body. The layout shifts a column or a block
/// depending on the listing, hence the fallbacks below.
const BODY: &str = "/html/body/div[4]/section[2]/div";

/// LivingInsider rental listings: unit details and nearby places
pub struct LivingInsiderSite {
    links: scraper::Selector,
    fields: FieldExtractor,
    nearby: NearbyExtractor,
}

impl LivingInsiderSite {
    pub fn new() -> Result<Self> {
        let links = Strategy::Css(CARD_LINKS.to_string())
            .compile()
            .context("LivingInsider card selector")?;

        let paths = |suffixes: &[&str]| -> Vec<String> {
            suffixes.iter().map(|s| format!("{}{}", BODY, s)).collect()
        };
        let rule = |field: &str, suffixes: &[&str]| {
            let xpaths = paths(suffixes);
            let xpaths: Vec<&str> = xpaths.iter().map(String::as_str).collect();
            FieldRule::xpaths(field, &xpaths)
        };
        let detail_cell = |n: usize| format!("/div/div[1]/div[3]/div[2]/div[5]/div/div[{}]/div/div/div[2]/span", n);

        let fields = vec![
            rule(
                "post_title",
                &["/div/div[1]/div[3]/div[1]/div[3]/h1", "/div/div[1]/div[3]/div[1]/div[2]/h1"],
            ),
            rule(
                "condo_name",
                &[
                    "/div/div[1]/div[3]/div[2]/div[17]/div[1]/div[1]/div[1]/a",
                    "/div/div[1]/div[3]/div[2]/div[16]/div[1]/div[1]/div[1]/a",
                    "/div/div[1]/div[3]/div[2]/div[15]/div[1]/div[1]/div[1]/a",
                ],
            )
            .cleanup(Cleanup::LastSegment),
            rule(
                "location",
                &[
                    "/div/div[1]/div[3]/div[2]/div[17]/div[1]/div[1]/div[2]/a",
                    "/div/div[1]/div[3]/div[2]/div[16]/div[1]/div[1]/div[2]/a",
                    "/div/div[1]/div[3]/div[2]/div[15]/div[1]/div[1]/div[2]/a",
                ],
            )
            .cleanup(Cleanup::LastSegment),
            rule(
                "price",
                &[
                    "/div/div[1]/div[3]/div[1]/div[6]/div[2]/div/span[1]/b",
                    "/div/div[1]/div[3]/div[1]/div[5]/div[2]/div/span[1]/b",
                    "/div[2]/div[1]/div[3]/div[1]/div[5]/div[2]/div/span[1]/b",
                ],
            ),
            rule(
                "price_per_space",
                &[
                    "/div/div[1]/div[3]/div[1]/div[6]/div[3]/div/div/span",
                    "/div/div[1]/div[3]/div[1]/div[7]/div[3]/div/div/span",
                    "/div/div[1]/div[3]/div[1]/div[8]/div[3]/div/div/span",
                    "/div[2]/div[1]/div[3]/div[1]/div[7]/div[3]/div/div/span",
                ],
            )
            .cleanup(Cleanup::StripParens),
            rule("space", &[detail_cell(1).as_str()]).cleanup(Cleanup::RemoveWhitespace),
            rule("floor", &[detail_cell(3).as_str()]),
            rule("bedroom", &[detail_cell(5).as_str()]),
            rule("bathroom", &[detail_cell(7).as_str()]),
        ];

        let nearby_layout = |outer: &str, block: usize| {
            (
                Strategy::XPath(format!("{}{}/div[1]/div[3]/div[2]/div[{}]/div/ul/li/a/span", BODY, outer, block)),
                Strategy::XPath(format!("{}{}/div[1]/div[3]/div[2]/div[{}]/div/ul/li/a/p", BODY, outer, block)),
            )
        };

        Ok(Self {
            links,
            fields: FieldExtractor::new(fields, Vec::new()).context("LivingInsider detail rules")?,
            nearby: NearbyExtractor::new(&[nearby_layout("/div[2]", 16), nearby_layout("/div", 17)])
                .context("LivingInsider nearby rules")?,
        })
    }
}

impl ListingSite for LivingInsiderSite {
    fn source(&self) -> Source {
        Source::LivingInsider
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
        let mut columns: Vec<&str> = self.fields.field_names().collect();
        columns.extend(["link", "page", "index", "scraped_at"]);
        StoreSchema::new(dir.join("property_details.csv"), &columns, "link")
            .with_required(self.fields.field_names())
    }

    fn extract_details(&self, page: &Document) -> Extraction {
        let document = Html::parse_document(&page.html);

        let mut record = ProcessedRecord::new(page.url.as_str());
        record.extend(self.fields.extract(&document));

        Extraction {
            record,
            nearby: self.nearby.extract(&document),
            history: Vec::new(),
        }
    }

    fn collects_nearby(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NearbyPlace, PLACEHOLDER};
    use pretty_assertions::assert_eq;

    /// Detail page trimmed to the blocks the rules look at
    fn detail_page() -> String {
        let detail_cell = |value: &str| {
            format!(
                "<div><div><div><div>label</div><div><span>{}</span></div></div></div></div>",
                value
            )
        };
        let filler = "<div></div>".repeat(10);

        format!(
            r#"<html><body><div></div><div></div><div></div><div>
              <section></section>
              <section><div><div><div>
                <div></div><div></div>
                <div>
                  <div>
                    <div></div><div></div><div><h1>Rhythm Sukhumvit 42</h1></div>
                    <div></div>
                    <div><div></div><div><div><span><b>฿25,000</b></span></div></div></div>
                    <div></div>
                    <div><div></div><div></div><div><div><div><span>(฿520/m²)</span></div></div></div></div>
                  </div>
                  <div>
                    <div></div><div></div><div></div><div></div>
                    <div><div>{}<div></div>{}<div></div>{}<div></div>{}</div></div>
                    {}
                    <div><div><div><div><a>Rhythm Sukhumvit 42</a></div><div><a>Phra Khanong</a></div></div></div></div>
                    <div><div><ul>
                      <li><a><span>BTS Ekkamai</span><p>450 m</p></a></li>
                      <li><a><span>Gateway Ekkamai</span><p>500 m</p></a></li>
                    </ul></div></div>
                  </div>
                </div>
              </div></div></div></section>
            </div></body></html>"#,
            detail_cell("35 m²"),
            detail_cell("12"),
            detail_cell("2"),
            detail_cell("1"),
            filler,
        )
    }

    #[test]
    fn extracts_detail_fields_with_fallbacks() {
        let site = LivingInsiderSite::new().unwrap();
        let page = Document::new("https://www.livinginsider.com/livingdetail/1/x.html", detail_page());

        let extraction = site.extract_details(&page);
        let record = &extraction.record;

        assert_eq!(record.get("post_title"), "Rhythm Sukhumvit 42");
        assert_eq!(record.get("price"), "฿25,000");
        assert_eq!(record.get("price_per_space"), "฿520/m²");
        assert_eq!(record.get("space"), "35m²");
        assert_eq!(record.get("floor"), "12");
        assert_eq!(record.get("bedroom"), "2");
        assert_eq!(record.get("bathroom"), "1");
        assert_eq!(record.get("condo_name"), "Rhythm Sukhumvit 42");
        assert_eq!(record.get("location"), "Phra Khanong");
        assert_eq!(
            extraction.nearby,
            vec![
                NearbyPlace {
                    name: "BTS Ekkamai".to_string(),
                    distance: "450 m".to_string(),
                },
                NearbyPlace {
                    name: "Gateway Ekkamai".to_string(),
                    distance: "500 m".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_page_yields_placeholders() {
        let site = LivingInsiderSite::new().unwrap();
        let page = Document::new("https://www.livinginsider.com/livingdetail/2/y.html", "<html></html>");

        let extraction = site.extract_details(&page);

        assert_eq!(extraction.record.get("price"), PLACEHOLDER);
        assert_eq!(extraction.nearby, vec![NearbyPlace::not_found()]);
    }

    #[test]
    fn schema_keeps_input_metadata_columns() {
        let site = LivingInsiderSite::new().unwrap();
        let schema = site.detail_schema(Path::new("."));

        let columns: Vec<&str> = schema.columns().iter().map(String::as_str).collect();
        assert_eq!(
            columns,
            vec![
                "post_title", "condo_name", "location", "price", "price_per_space", "space",
                "floor", "bedroom", "bathroom", "link", "page", "index", "scraped_at",
            ]
        );
        assert!(!schema.required().iter().any(|c| c == "page" || c == "scraped_at"));
        assert_eq!(schema.required().len(), 9);
    }
}
