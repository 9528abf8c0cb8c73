//! Schema Resolver: finds the column a file should go to, and a date column
//! to stamp, by reading column definitions from the target service.
//!
//! Eligibility is decided by column type only. Title keywords break ties
//! between several columns of the right type and never promote a column of
//! another type.
//!
//! Sources are queried in this order, stopping at the first one that
//! declares a file column:
//! 1. the parent record's board, when a parent id is given
//! 2. the target record's board
//! 3. the board named by `boardId`, when given
//!
//! A source that fails to answer is skipped. Nothing is cached between
//! invocations.

use crate::client::TargetService;
use crate::graphql;
use crate::metrics_defs::SCHEMA_QUERY_FAILURES;
use crate::protocol::{AttachmentJob, ColumnId, ItemId};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use shared::counter;
use std::fmt;

pub const FILE_COLUMN_TYPE: &str = "file";
pub const DATE_COLUMN_TYPE: &str = "date";

const FILE_TITLE_KEYWORDS: &[&str] = &["estimate", "doc"];
const DATE_TITLE_KEYWORDS: &[&str] = &["date"];

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ColumnDescriptor {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnDescriptor {
    pub fn new(id: &str, title: &str, column_type: &str) -> Self {
        ColumnDescriptor {
            id: id.to_string(),
            title: title.to_string(),
            column_type: column_type.to_string(),
        }
    }

    fn title_matches(&self, keywords: &[&str]) -> bool {
        let title = self.title.to_lowercase();
        keywords.iter().any(|k| title.contains(k))
    }
}

/// First column of `column_type` in declared order, overridden by the first
/// such column whose title contains one of `keywords`.
pub fn select_column<'a>(
    columns: &'a [ColumnDescriptor],
    column_type: &str,
    keywords: &[&str],
) -> Option<&'a ColumnDescriptor> {
    let mut eligible = columns.iter().filter(|c| c.column_type == column_type);
    let first = eligible.next()?;
    if first.title_matches(keywords) {
        return Some(first);
    }
    eligible.find(|c| c.title_matches(keywords)).or(Some(first))
}

pub fn select_file_column(columns: &[ColumnDescriptor]) -> Option<&ColumnDescriptor> {
    select_column(columns, FILE_COLUMN_TYPE, FILE_TITLE_KEYWORDS)
}

pub fn select_date_column(columns: &[ColumnDescriptor]) -> Option<&ColumnDescriptor> {
    select_column(columns, DATE_COLUMN_TYPE, DATE_TITLE_KEYWORDS)
}

/// Where a set of column definitions was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaSource {
    Parent(ItemId),
    Target(ItemId),
    Board(ItemId),
}

impl SchemaSource {
    fn query(&self) -> String {
        match self {
            SchemaSource::Parent(id) | SchemaSource::Target(id) => {
                graphql::item_columns_query(*id)
            }
            SchemaSource::Board(id) => graphql::board_columns_query(*id),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SchemaSource::Parent(_) => "parent",
            SchemaSource::Target(_) => "item",
            SchemaSource::Board(_) => "board",
        }
    }
}

impl fmt::Display for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSource::Parent(id) | SchemaSource::Target(id) | SchemaSource::Board(id) => {
                write!(f, "{}:{}", self.kind(), id)
            }
        }
    }
}

/// A column on a specific record, ready to be written to.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnTarget {
    pub item_id: ItemId,
    pub board_id: Option<ItemId>,
    pub column_id: ColumnId,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub file: Option<ColumnTarget>,
    pub date: Option<ColumnTarget>,
    /// Sources queried, in order, as `kind:id`
    pub attempted: Vec<String>,
}

struct Snapshot {
    item_id: ItemId,
    board_id: Option<ItemId>,
    columns: Vec<ColumnDescriptor>,
}

impl Snapshot {
    fn target(&self, column: &ColumnDescriptor) -> Option<ColumnTarget> {
        Some(ColumnTarget {
            item_id: self.item_id,
            board_id: self.board_id,
            column_id: ColumnId::parse("column", &column.id).ok()?,
        })
    }
}

pub struct SchemaResolver<'a> {
    service: &'a dyn TargetService,
    token: &'a str,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(service: &'a dyn TargetService, token: &'a str) -> Self {
        SchemaResolver { service, token }
    }

    pub async fn resolve(&self, job: &AttachmentJob) -> Resolution {
        let explicit_date = job.date_column_id.clone().map(|column_id| ColumnTarget {
            item_id: job.target_id,
            board_id: job.board_id,
            column_id,
        });

        // An explicit column is authoritative; no schema is read at all.
        if let Some(column_id) = &job.column_id {
            return Resolution {
                file: Some(ColumnTarget {
                    item_id: job.target_id,
                    board_id: job.board_id,
                    column_id: column_id.clone(),
                }),
                date: explicit_date,
                attempted: Vec::new(),
            };
        }

        let mut resolution = Resolution {
            date: explicit_date,
            ..Resolution::default()
        };
        let mut target_queried = false;
        let mut target_board = None;

        for source in sources(job) {
            resolution.attempted.push(source.to_string());
            target_queried |= matches!(source, SchemaSource::Target(_));

            let Some(snapshot) = self.fetch(source, job.target_id).await else {
                continue;
            };
            if let SchemaSource::Target(_) = source {
                target_board = snapshot.board_id;
            }

            if resolution.date.is_none() {
                resolution.date = select_date_column(&snapshot.columns)
                    .and_then(|column| snapshot.target(column));
            }

            if let Some(file) =
                select_file_column(&snapshot.columns).and_then(|column| snapshot.target(column))
            {
                tracing::debug!(%source, column = %file.column_id, "resolved file column");
                resolution.file = Some(file);
                break;
            }

            tracing::debug!(%source, "no file column on source");
        }

        // An explicit date column lives on the target record, so it needs the
        // target's board, never the parent's.
        if job.date_column_id.is_some()
            && let Some(date) = resolution.date.as_mut()
            && date.board_id.is_none()
        {
            if !target_queried {
                let source = SchemaSource::Target(job.target_id);
                resolution.attempted.push(source.to_string());
                target_board = self
                    .fetch(source, job.target_id)
                    .await
                    .and_then(|snapshot| snapshot.board_id);
            }
            date.board_id = target_board;
        }

        resolution
    }

    async fn fetch(&self, source: SchemaSource, target_id: ItemId) -> Option<Snapshot> {
        let result = self
            .service
            .query(self.token, &source.query(), JsonValue::Null)
            .await
            .map_err(|e| e.to_string())
            .and_then(|response| parse_snapshot(source, target_id, &response));

        match result {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::warn!(%source, %error, "schema query failed");
                counter!(SCHEMA_QUERY_FAILURES, "source" => source.kind()).increment(1);
                None
            }
        }
    }
}

fn sources(job: &AttachmentJob) -> Vec<SchemaSource> {
    let mut sources = Vec::with_capacity(3);
    if let Some(parent) = job.parent_id.filter(|p| *p != job.target_id) {
        sources.push(SchemaSource::Parent(parent));
    }
    sources.push(SchemaSource::Target(job.target_id));
    if let Some(board) = job.board_id {
        sources.push(SchemaSource::Board(board));
    }
    sources
}

#[derive(Deserialize)]
struct BoardSchema {
    id: Option<JsonValue>,
    columns: Vec<ColumnDescriptor>,
}

#[derive(Deserialize)]
struct ItemSchema {
    board: Option<BoardSchema>,
}

fn parse_snapshot(
    source: SchemaSource,
    target_id: ItemId,
    response: &JsonValue,
) -> Result<Snapshot, String> {
    if let Some(message) = graphql::service_error(response) {
        return Err(message);
    }

    let (item_id, board) = match source {
        SchemaSource::Parent(id) | SchemaSource::Target(id) => {
            let items = response
                .pointer("/data/items")
                .cloned()
                .ok_or("response has no data.items")?;
            let items: Vec<ItemSchema> =
                serde_json::from_value(items).map_err(|e| e.to_string())?;
            let board = items
                .into_iter()
                .next()
                .and_then(|item| item.board)
                .ok_or("record not found or has no board")?;
            (id, board)
        }
        SchemaSource::Board(_) => {
            let boards = response
                .pointer("/data/boards")
                .cloned()
                .ok_or("response has no data.boards")?;
            let boards: Vec<BoardSchema> =
                serde_json::from_value(boards).map_err(|e| e.to_string())?;
            let board = boards.into_iter().next().ok_or("board not found")?;
            (target_id, board)
        }
    };

    let board_id = match &board.id {
        Some(JsonValue::String(id)) => ItemId::parse("board", id).ok(),
        Some(JsonValue::Number(id)) => id.as_u64().map(ItemId::new),
        _ => None,
    }
    .or(match source {
        SchemaSource::Board(id) => Some(id),
        _ => None,
    });

    // Column ids end up inside mutation text; drop anything that is not a
    // plain identifier.
    let columns = board
        .columns
        .into_iter()
        .filter(|column| {
            let usable = ColumnId::parse("column", &column.id).is_ok();
            if !usable {
                tracing::warn!(%source, column = %column.id, "ignoring column with unusable id");
            }
            usable
        })
        .collect();

    Ok(Snapshot {
        item_id,
        board_id,
        columns,
    })
}
