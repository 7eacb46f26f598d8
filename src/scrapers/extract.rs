//! Selector-driven field extraction.
//!
//! Each field owns an ordered list of strategies. The first strategy that
//! matches an element wins; when none does the field gets [`PLACEHOLDER`].
//! Rules are compiled once per site and evaluated against parsed pages.

use crate::models::{NearbyPlace, PricePoint, PLACEHOLDER};
use anyhow::{anyhow, bail, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, warn};

/// One way of locating a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Css(String),
    /// Simple location path such as `/html/body/div[4]/section[2]//a`
    XPath(String),
}

impl Strategy {
    pub fn compile(&self) -> Result<Selector> {
        let css = match self {
            Strategy::Css(css) => css.clone(),
            Strategy::XPath(xpath) => xpath_to_css(xpath)?,
        };
        Selector::parse(&css).map_err(|e| anyhow!("invalid selector '{}': {:?}", css, e))
    }
}

/// Post-processing applied to a located value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cleanup {
    #[default]
    None,
    /// `(฿120,000/m²)` -> `฿120,000/m²`
    StripParens,
    /// `35 m²` -> `35m²`
    RemoveWhitespace,
    /// Keep the text after the last `>` of leaked markup
    LastSegment,
}

impl Cleanup {
    fn apply(self, value: String) -> String {
        match self {
            Cleanup::None => value,
            Cleanup::StripParens => value.replace(['(', ')'], ""),
            Cleanup::RemoveWhitespace => value.split_whitespace().collect(),
            Cleanup::LastSegment => value
                .rsplit('>')
                .next()
                .unwrap_or_default()
                .trim_matches('<')
                .trim()
                .to_string(),
        }
    }
}

/// A named field with its fallback strategies
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: String,
    pub strategies: Vec<Strategy>,
    pub cleanup: Cleanup,
}

impl FieldRule {
    pub fn css(field: &str, css: &str) -> Self {
        Self {
            field: field.to_string(),
            strategies: vec![Strategy::Css(css.to_string())],
            cleanup: Cleanup::None,
        }
    }

    pub fn xpaths(field: &str, xpaths: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            strategies: xpaths.iter().map(|x| Strategy::XPath(x.to_string())).collect(),
            cleanup: Cleanup::None,
        }
    }

    pub fn cleanup(mut self, cleanup: Cleanup) -> Self {
        self.cleanup = cleanup;
        self
    }
}

/// Every element matched becomes a numbered field: `Features 1`, `Features 2`, ...
#[derive(Debug, Clone)]
pub struct ListRule {
    pub prefix: String,
    pub strategy: Strategy,
    /// Highest numbered field; anything past it is joined into the last one
    pub limit: Option<usize>,
}

impl ListRule {
    pub fn css(prefix: &str, css: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            strategy: Strategy::Css(css.to_string()),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }
}

struct CompiledList {
    prefix: String,
    selector: Selector,
    limit: Option<usize>,
}

struct CompiledField {
    field: String,
    selectors: Vec<Selector>,
    cleanup: Cleanup,
}

/// Compiled field and list rules of one page layout
pub struct FieldExtractor {
    fields: Vec<CompiledField>,
    lists: Vec<CompiledList>,
}

impl FieldExtractor {
    /// Compile the rules. A selector that does not compile is a configuration
    /// error, not a page error, so it fails here.
    pub fn new(fields: Vec<FieldRule>, lists: Vec<ListRule>) -> Result<Self> {
        let fields = fields
            .into_iter()
            .map(|rule| {
                let selectors = rule
                    .strategies
                    .iter()
                    .map(Strategy::compile)
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledField {
                    field: rule.field,
                    selectors,
                    cleanup: rule.cleanup,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let lists = lists
            .into_iter()
            .map(|rule| {
                Ok(CompiledList {
                    selector: rule.strategy.compile()?,
                    prefix: rule.prefix,
                    limit: rule.limit,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { fields, lists })
    }

    /// Field names this extractor always produces, in rule order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.field.as_str())
    }

    /// Evaluate every rule. Each rule is isolated: a miss only affects its
    /// own field.
    pub fn extract(&self, document: &Html) -> Vec<(String, String)> {
        let mut values = Vec::with_capacity(self.fields.len());

        for rule in &self.fields {
            let found = rule
                .selectors
                .iter()
                .find_map(|selector| {
                    document
                        .select(selector)
                        .next()
                        .map(element_text)
                        .filter(|text| !text.is_empty())
                });

            let value = match found {
                Some(text) => rule.cleanup.apply(text),
                None => {
                    debug!("No element found for field '{}'", rule.field);
                    PLACEHOLDER.to_string()
                }
            };
            values.push((rule.field.clone(), value));
        }

        for list in &self.lists {
            let mut items: Vec<String> = document
                .select(&list.selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();
            if items.is_empty() {
                debug!("No list items found for '{}'", list.prefix);
            }
            if let Some(limit) = list.limit.filter(|limit| items.len() > *limit) {
                debug!(
                    "{} '{}' items, joining the last {} into '{} {}'",
                    items.len(),
                    list.prefix,
                    items.len() - limit + 1,
                    list.prefix,
                    limit
                );
                let overflow = items.split_off(limit - 1).join("; ");
                items.push(overflow);
            }
            for (i, item) in items.into_iter().enumerate() {
                values.push((format!("{} {}", list.prefix, i + 1), item));
            }
        }

        values
    }
}

/// Pairs of name and distance elements, with layout fallbacks
pub struct NearbyExtractor {
    layouts: Vec<(Selector, Selector)>,
}

impl NearbyExtractor {
    pub fn new(layouts: &[(Strategy, Strategy)]) -> Result<Self> {
        let layouts = layouts
            .iter()
            .map(|(name, distance)| Ok((name.compile()?, distance.compile()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layouts })
    }

    /// First layout that yields any pair wins. A page without nearby places
    /// still produces a single placeholder row.
    pub fn extract(&self, document: &Html) -> Vec<NearbyPlace> {
        for (name_selector, distance_selector) in &self.layouts {
            let names = document.select(name_selector).map(element_text);
            let distances = document.select(distance_selector).map(element_text);
            let places: Vec<NearbyPlace> = names
                .zip(distances)
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, distance)| NearbyPlace {
                    name,
                    distance: if distance.is_empty() {
                        PLACEHOLDER.to_string()
                    } else {
                        distance
                    },
                })
                .collect();

            if !places.is_empty() {
                return places;
            }
        }

        vec![NearbyPlace::not_found()]
    }
}

#[derive(Debug, Deserialize)]
struct ChartSeries {
    #[serde(rename = "currencyStringFormat", default)]
    currency_format: String,
    #[serde(default)]
    data: Vec<ChartSample>,
}

#[derive(Debug, Deserialize)]
struct ChartSample {
    #[serde(default)]
    date: serde_json::Value,
    #[serde(default)]
    value: serde_json::Value,
}

/// Read the JSON price series that charts carry in `data-chart-stats`.
/// Canvases are numbered from 1 in document order.
pub fn extract_price_history(document: &Html, canvas: &Selector) -> Vec<PricePoint> {
    let mut points = Vec::new();

    for (i, element) in document.select(canvas).enumerate() {
        let Some(raw) = element.value().attr("data-chart-stats") else {
            continue;
        };

        let series: Vec<ChartSeries> = match serde_json::from_str(raw) {
            Ok(series) => series,
            Err(e) => {
                warn!("Error parsing chart data of canvas {}: {}", i + 1, e);
                continue;
            }
        };

        for entry in series {
            for sample in entry.data {
                points.push(PricePoint {
                    canvas_index: i + 1,
                    currency_format: entry.currency_format.clone(),
                    date: json_text(&sample.date),
                    value: json_text(&sample.value),
                });
            }
        }
    }

    points
}

/// `href` of every matched element, resolved against `base`
pub fn extract_links(document: &Html, selector: &Selector, base: &url::Url) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for element in document.select(selector) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        match base.join(href) {
            Ok(url) => {
                let url = url.to_string();
                if !links.contains(&url) {
                    links.push(url);
                }
            }
            Err(e) => debug!("Ignoring link '{}': {}", href, e),
        }
    }
    links
}

/// Translate a simple XPath location path into a CSS selector.
///
/// Supports element steps, `*`, positional predicates (`div[4]`), `/`, `//`
/// and a trailing `/text()`. Anything else is rejected.
pub fn xpath_to_css(xpath: &str) -> Result<String> {
    let trimmed = xpath.trim();
    let path = trimmed.strip_suffix("/text()").unwrap_or(trimmed);

    let mut css = String::new();
    let mut descendant = false;

    for (i, segment) in path.split('/').enumerate() {
        if segment.is_empty() {
            if i > 0 {
                descendant = true;
            }
            continue;
        }

        let step = css_step(segment).map_err(|e| anyhow!("unsupported XPath '{}': {}", xpath, e))?;
        if !css.is_empty() {
            css.push_str(if descendant { " " } else { " > " });
        }
        css.push_str(&step);
        descendant = false;
    }

    if css.is_empty() {
        bail!("empty XPath '{}'", xpath);
    }
    Ok(css)
}

fn css_step(segment: &str) -> Result<String> {
    let (name, position) = match segment.split_once('[') {
        Some((name, rest)) => {
            let index = rest
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("unclosed predicate in '{}'", segment))?;
            let index: usize = index
                .parse()
                .map_err(|_| anyhow!("only positional predicates are supported, got '{}'", segment))?;
            (name, Some(index))
        }
        None => (segment, None),
    };

    let valid_name = name == "*"
        || (!name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    if !valid_name {
        bail!("unsupported step '{}'", segment);
    }

    Ok(match (name, position) {
        (_, None) => name.to_string(),
        ("*", Some(n)) => format!("*:nth-child({})", n),
        (_, Some(n)) => format!("{}:nth-of-type({})", name, n),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
