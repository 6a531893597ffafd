//! Declarative field extraction
//!
//! A [`FieldMapping`] names each logical field and the XPath that locates it.
//! [`extract_fields`] resolves the mapping against a page and cleans the text.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScraperError;
use crate::record::{ExtractedRecord, FieldValue};
use crate::traits::PageQuery;

/// How many matched nodes a field keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    Single,
    Multiple,
}

/// One named XPath query of the field mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldQuery {
    pub name: String,
    pub xpath: String,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl FieldQuery {
    pub fn single(name: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xpath: xpath.into(),
            cardinality: Cardinality::Single,
        }
    }

    pub fn multiple(name: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xpath: xpath.into(),
            cardinality: Cardinality::Multiple,
        }
    }
}

/// Ordered field queries with unique names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldMapping(Vec<FieldQuery>);

impl FieldMapping {
    /// Rejects empty, duplicate and reserved (`url`) field names.
    pub fn new(queries: Vec<FieldQuery>) -> Result<Self, ScraperError> {
        for (i, query) in queries.iter().enumerate() {
            if query.name.trim().is_empty() {
                return Err(ScraperError::Config(format!(
                    "field #{} has an empty name",
                    i + 1
                )));
            }
            if query.name == "url" {
                return Err(ScraperError::Config(
                    "field name 'url' is reserved for the source URL".into(),
                ));
            }
            if queries[..i].iter().any(|q| q.name == query.name) {
                return Err(ScraperError::Config(format!(
                    "duplicate field name: {}",
                    query.name
                )));
            }
        }
        Ok(Self(queries))
    }

    pub fn queries(&self) -> &[FieldQuery] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&FieldQuery> {
        self.0.iter().find(|q| q.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FieldMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let queries = Vec::<FieldQuery>::deserialize(deserializer)?;
        FieldMapping::new(queries).map_err(serde::de::Error::custom)
    }
}

/// Field table for the usine-digitale start-up directory.
impl Default for FieldMapping {
    fn default() -> Self {
        Self(vec![
            FieldQuery::single("name", "//h1"),
            FieldQuery::single("email", "//p[@itemprop='email']"),
            FieldQuery::single("website", "//li[contains(div, 'Site Web')]//a"),
            FieldQuery::single("phone", "//p[@itemprop='telephone']"),
            FieldQuery::single(
                "creationDate",
                "//meta[@itemprop='foundingDate']/following-sibling::p[1]",
            ),
            FieldQuery::multiple("founders", "//div[@itemprop='founders']/p/text()"),
            FieldQuery::multiple(
                "markets",
                "//h2[@class='txtArtTitre'][.='Marché :']/following-sibling::div[1]/p/text()",
            ),
            FieldQuery::single("employees", "//p[@itemprop='numberOfEmployees']"),
            FieldQuery::multiple("address", "//p[@itemprop='address']/text()"),
        ])
    }
}

/// Whitespace that collapses to a single space; CR is kept as a line break.
fn is_horizontal_space(c: char) -> bool {
    c.is_whitespace() && c != '\r' && c != '\n'
}

fn clean_line(content: &str) -> String {
    let content = content
        .trim_start_matches(|c: char| c.is_whitespace() || c == ',')
        .trim_end();

    let mut out = String::with_capacity(content.len());
    let mut in_space = false;
    for c in content.chars() {
        if is_horizontal_space(c) {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Normalize scraped node text.
///
/// Line breaks (LF, CRLF or a lone CR) between non-blank lines survive; any
/// other run of whitespace collapses to a single space. Blank lines and leading commas
/// are removed, and the result is trimmed.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.split_inclusive('\n') {
        let (content, ending) = match line.strip_suffix("\r\n") {
            Some(content) => (content, "\r\n"),
            None => match line.strip_suffix('\n') {
                Some(content) => (content, "\n"),
                None => (line, ""),
            },
        };

        let cleaned = clean_line(content);
        if cleaned.is_empty() {
            continue;
        }
        out.push_str(&cleaned);
        out.push_str(ending);
    }
    out.trim_end().to_string()
}

/// Resolve one query against the page.
pub async fn extract_field<P>(page: &P, query: &FieldQuery) -> Result<FieldValue, ScraperError>
where
    P: PageQuery + ?Sized,
{
    let texts = page.node_texts(&query.xpath).await?;
    debug!(
        "field '{}': {} node(s) for {}",
        query.name,
        texts.len(),
        query.xpath
    );

    let value = match query.cardinality {
        Cardinality::Single => {
            FieldValue::Single(texts.first().map(|t| clean_text(t)).unwrap_or_default())
        }
        Cardinality::Multiple => FieldValue::Multiple(
            texts
                .iter()
                .map(|t| clean_text(t))
                .filter(|t| !t.is_empty())
                .collect(),
        ),
    };
    Ok(value)
}

/// Resolve every query of the mapping, in mapping order.
pub async fn extract_fields<P>(
    mapping: &FieldMapping,
    page: &P,
) -> Result<Vec<(String, FieldValue)>, ScraperError>
where
    P: PageQuery + ?Sized,
{
    let mut fields = Vec::with_capacity(mapping.len());
    for query in mapping.queries() {
        let value = extract_field(page, query).await?;
        fields.push((query.name.clone(), value));
    }
    Ok(fields)
}

/// Stateless extractor bound to one field mapping.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    mapping: FieldMapping,
}

impl FieldExtractor {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub async fn extract<P>(&self, page: &P, url: &str) -> Result<ExtractedRecord, ScraperError>
    where
        P: PageQuery + ?Sized,
    {
        let fields = extract_fields(&self.mapping, page).await?;
        Ok(ExtractedRecord::new(url, fields))
    }
}
