use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{CityAverageRecord, CommentRecord, Scores};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing element: {0}")]
    MissingElement(String),
    #[error("Expected at least {expected} {element} in {context}, found {found}")]
    MissingSegments {
        context: String,
        element: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Text {text:?} in {context} does not match {pattern}")]
    PatternMismatch {
        context: String,
        pattern: &'static str,
        text: String,
    },
    #[error("Invalid page count: {0:?}")]
    InvalidPageCount(String),
}

impl ParseError {
    /// True when an expected element is absent, false when one was found but its text was off.
    pub fn is_structure(&self) -> bool {
        matches!(
            self,
            ParseError::MissingElement(_) | ParseError::MissingSegments { .. }
        )
    }
}

const DATE_PATTERN: &str = r"[0-9]{2}-[0-9]{2}-[0-9]{4}";

static RE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DATE_PATTERN).expect("invalid regex: comment date"));

static SEL_PAGINATION_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("nav#pages a").expect("invalid selector: pagination"));
static SEL_COMMENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.comm").expect("invalid selector: comment block"));
static SEL_SPAN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span").expect("invalid selector: span"));
static SEL_MOYENNE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".moyenne").expect("invalid selector: moyenne"));
static SEL_P: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("invalid selector: p"));
static SEL_STRONG: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("strong").expect("invalid selector: strong"));
static SEL_TD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("invalid selector: td"));
static SEL_SCORE_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table#tablonotes").expect("invalid selector: tablonotes"));
static SEL_OVERALL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p#ng").expect("invalid selector: ng"));

/// Paragraphs a comment block must carry: author line, pros, cons, highlighted keywords.
const COMMENT_SEGMENTS: usize = 4;
const CT_POS_SEGMENT: usize = 1;
const CT_NEG_SEGMENT: usize = 2;
const FEEDBACK_SEGMENT: usize = 3;
/// Highlighted keywords in the feedback paragraph: liked first, disliked second.
const FEEDBACK_HIGHLIGHTS: usize = 2;

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

/// Reads the listing's last page number from `nav#pages`.
///
/// The last link of the navigation is the "next" control, so the page count
/// is the second-to-last link. A page without pagination is a single page.
pub fn parse_page_count(html: &str) -> Result<u32, ParseError> {
    let document = Html::parse_document(html);
    let links: Vec<ElementRef> = document.select(&SEL_PAGINATION_LINKS).collect();

    if links.len() < 2 {
        return Ok(1);
    }

    let text = elem_text(links[links.len() - 2]);
    text.trim()
        .parse::<u32>()
        .map_err(|_| ParseError::InvalidPageCount(text))
}

pub fn parse_comments(html: &str) -> Result<Vec<CommentRecord>, ParseError> {
    let document = Html::parse_document(html);

    document
        .select(&SEL_COMMENT)
        .enumerate()
        .map(|(i, block)| parse_comment_block(block, i + 1))
        .collect()
}

fn parse_comment_block(block: ElementRef, position: usize) -> Result<CommentRecord, ParseError> {
    let context = format!("comment block {}", position);

    let date_text = block
        .select(&SEL_SPAN)
        .next()
        .map(elem_text)
        .ok_or_else(|| ParseError::MissingElement(format!("date span in {}", context)))?;
    let date = RE_DATE
        .find(&date_text)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ParseError::PatternMismatch {
            context: context.clone(),
            pattern: DATE_PATTERN,
            text: date_text.clone(),
        })?;

    let average = block
        .select(&SEL_MOYENNE)
        .next()
        .map(elem_text)
        .ok_or_else(|| ParseError::MissingElement(format!(".moyenne in {}", context)))?;

    let segments: Vec<ElementRef> = block.select(&SEL_P).collect();
    if segments.len() < COMMENT_SEGMENTS {
        return Err(ParseError::MissingSegments {
            context,
            element: "paragraphs",
            expected: COMMENT_SEGMENTS,
            found: segments.len(),
        });
    }

    let highlights: Vec<String> = segments[FEEDBACK_SEGMENT]
        .select(&SEL_STRONG)
        .take(FEEDBACK_HIGHLIGHTS)
        .map(elem_text)
        .collect();
    let [feedback_pos, feedback_neg]: [String; FEEDBACK_HIGHLIGHTS] =
        highlights
            .try_into()
            .map_err(|found: Vec<String>| ParseError::MissingSegments {
                context: context.clone(),
                element: "highlighted keywords",
                expected: FEEDBACK_HIGHLIGHTS,
                found: found.len(),
            })?;

    let scores = Scores::from_cells(block.select(&SEL_TD).map(elem_text));

    Ok(CommentRecord {
        date,
        average,
        ct_pos: elem_text(segments[CT_POS_SEGMENT]),
        ct_neg: elem_text(segments[CT_NEG_SEGMENT]),
        feedback_pos,
        feedback_neg,
        scores,
    })
}

pub fn parse_city_average(html: &str) -> Result<CityAverageRecord, ParseError> {
    let document = Html::parse_document(html);

    let table = document
        .select(&SEL_SCORE_TABLE)
        .next()
        .ok_or_else(|| ParseError::MissingElement("table#tablonotes".into()))?;
    let scores = Scores::from_cells(table.select(&SEL_TD).map(elem_text));

    let overall = document
        .select(&SEL_OVERALL)
        .next()
        .map(elem_text)
        .ok_or_else(|| ParseError::MissingElement("p#ng".into()))?;
    let average_score = overall
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(CityAverageRecord {
        scores,
        average_score,
    })
}
