use std::{fmt::Display, str::FromStr};

use serde::{Serialize, Serializer, ser::SerializeMap};

pub const CITY_COLUMN: &str = "city";
pub const COMMENT_FIELDS: [&str; 6] = [
    "date",
    "average",
    "ct_pos",
    "ct_neg",
    "feedback_pos",
    "feedback_neg",
];
pub const AVERAGE_SCORE_FIELD: &str = "average_score";

/// URL slug naming a city on the site, e.g. `morangis_91432`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CityId(String);

impl CityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// INSEE code after the last `_`, the key the dashboard joins on: five
    /// digits, or `2a`/`2b` plus three digits for Corsica.
    pub fn insee_code(&self) -> Option<&str> {
        let (_, code) = self.0.rsplit_once('_')?;
        let digits = match code.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("2a") || prefix.eq_ignore_ascii_case("2b") => {
                &code[2..]
            }
            _ => code,
        };
        let well_formed = code.len() == 5 && digits.bytes().all(|b| b.is_ascii_digit());
        well_formed.then_some(code)
    }
}

impl Display for CityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One fetched document. `page_count` is only read from the first page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub content: String,
    pub page_count: Option<u32>,
}

/// The nine rating dimensions, in the order the site lays out its score cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Environment,
    Transport,
    Security,
    Health,
    Leisure,
    Culture,
    Education,
    Shop,
    QualityOfLife,
}

impl Criterion {
    pub const ALL: [Criterion; 9] = [
        Criterion::Environment,
        Criterion::Transport,
        Criterion::Security,
        Criterion::Health,
        Criterion::Leisure,
        Criterion::Culture,
        Criterion::Education,
        Criterion::Shop,
        Criterion::QualityOfLife,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Environment => "environment",
            Criterion::Transport => "transport",
            Criterion::Security => "security",
            Criterion::Health => "health",
            Criterion::Leisure => "leisure",
            Criterion::Culture => "culture",
            Criterion::Education => "education",
            Criterion::Shop => "shop",
            Criterion::QualityOfLife => "quality_of_life",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Criterion scores zipped positionally from a run of score cells.
///
/// A block with fewer than nine cells leaves the trailing criteria unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scores([Option<String>; 9]);

impl Scores {
    pub fn from_cells<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut scores = Scores::default();
        for (criterion, cell) in Criterion::ALL.iter().zip(cells) {
            scores.0[criterion.index()] = Some(cell);
        }
        scores
    }

    pub fn get(&self, criterion: Criterion) -> Option<&str> {
        self.0[criterion.index()].as_deref()
    }

    pub fn populated(&self) -> usize {
        self.0.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Criterion, Option<&str>)> {
        Criterion::ALL.iter().map(|c| (*c, self.get(*c)))
    }

    fn cells(&self) -> impl Iterator<Item = String> + '_ {
        self.0.iter().map(|s| s.clone().unwrap_or_default())
    }
}

impl Serialize for Scores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.populated()))?;
        for (criterion, score) in self.iter() {
            if let Some(score) = score {
                map.serialize_entry(criterion.name(), score)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRecord {
    pub date: String,
    pub average: String,
    pub ct_pos: String,
    pub ct_neg: String,
    pub feedback_pos: String,
    pub feedback_neg: String,
    #[serde(flatten)]
    pub scores: Scores,
}

impl CommentRecord {
    fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.date.clone(),
            self.average.clone(),
            self.ct_pos.clone(),
            self.ct_neg.clone(),
            self.feedback_pos.clone(),
            self.feedback_neg.clone(),
        ];
        row.extend(self.scores.cells());
        row
    }
}

impl Display for CommentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "[{}] {}", self.date, self.average.trim())?;
        writeln!(f, "  + {}", self.ct_pos.trim())?;
        writeln!(f, "  - {}", self.ct_neg.trim())?;
        write!(
            f,
            "  ({} / {})",
            self.feedback_pos.trim(),
            self.feedback_neg.trim()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityAverageRecord {
    #[serde(flatten)]
    pub scores: Scores,
    pub average_score: String,
}

impl CityAverageRecord {
    fn to_row(&self) -> Vec<String> {
        let mut row: Vec<String> = self.scores.cells().collect();
        row.push(self.average_score.clone());
        row
    }
}

impl Display for CityAverageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Average score: {}", self.average_score)?;
        for (criterion, score) in self.scores.iter() {
            writeln!(f, "  {:<16} {}", criterion.name(), score.unwrap_or("-"))?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid mode '{0}'. Accepted values: 'average', 'comments'")]
pub struct ModeParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Average,
    Comments,
}

impl Mode {
    /// Column names of a flattened table in this mode, `city` first.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec![CITY_COLUMN];
        match self {
            Mode::Comments => {
                columns.extend(COMMENT_FIELDS);
                columns.extend(Criterion::ALL.iter().map(|c| c.name()));
            }
            Mode::Average => {
                columns.extend(Criterion::ALL.iter().map(|c| c.name()));
                columns.push(AVERAGE_SCORE_FIELD);
            }
        }
        columns
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" => Ok(Mode::Average),
            "comments" | "comment" => Ok(Mode::Comments),
            _ => Err(ModeParseError(s.to_string())),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Average => write!(f, "average"),
            Mode::Comments => write!(f, "comments"),
        }
    }
}

/// Everything scraped for one city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "data", rename_all = "snake_case")]
pub enum CityTable {
    Comments(Vec<CommentRecord>),
    Average(CityAverageRecord),
}

impl CityTable {
    pub fn len(&self) -> usize {
        match self {
            CityTable::Comments(comments) => comments.len(),
            CityTable::Average(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> Vec<Vec<String>> {
        match self {
            CityTable::Comments(comments) => comments.iter().map(|c| c.to_row()).collect(),
            CityTable::Average(average) => vec![average.to_row()],
        }
    }
}

impl Display for CityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CityTable::Comments(comments) => {
                for (i, comment) in comments.iter().enumerate() {
                    writeln!(f, "{:>3}. {}", i + 1, comment)?;
                }
                write!(f, "{} comment(s)", comments.len())
            }
            CityTable::Average(average) => write!(f, "{}", average),
        }
    }
}

/// Per-city tables of one batch, in download order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    mode: Mode,
    cities: Vec<(CityId, CityTable)>,
}

impl AggregateResult {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            cities: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, city: CityId, table: CityTable) {
        self.cities.push((city, table));
    }

    pub fn get(&self, city: &CityId) -> Option<&CityTable> {
        self.cities
            .iter()
            .find(|(id, _)| id == city)
            .map(|(_, table)| table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CityId, &CityTable)> {
        self.cities.iter().map(|(id, table)| (id, table))
    }

    pub fn cities(&self) -> impl Iterator<Item = &CityId> {
        self.cities.iter().map(|(id, _)| id)
    }

    /// Number of cities in the batch.
    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// One long table tagged by city: city order first, then row order within a city.
    pub fn flatten(&self) -> Table {
        let mut table = Table::new(self.mode);
        for (city, city_table) in &self.cities {
            for row in city_table.rows() {
                let mut tagged = Vec::with_capacity(row.len() + 1);
                tagged.push(city.to_string());
                tagged.extend(row);
                table.rows.push(tagged);
            }
        }
        table
    }
}

/// Header plus text rows, ready to be appended to the results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(mode: Mode) -> Self {
        Self {
            columns: mode.columns().into_iter().map(String::from).collect(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
