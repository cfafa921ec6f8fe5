//! Destination coordinates and request assembly.

use derive_builder::Builder;
use reqwest::header::{EXPECT, HeaderMap, HeaderValue};
use url::Url;

use crate::batch::LoadBatch;
use crate::config::{
    COLUMNS_HEADER, DELETE_SIGN_COLUMN, EXPECT_CONTINUE, FIELD_DELIMITER_HEADER, FORMAT_HEADER,
    LABEL_HEADER, LINE_DELIMITER_HEADER, STRIP_OUTER_ARRAY_HEADER,
};
use crate::encode::Format;
use crate::error::LoadError;

/// Connection coordinates of the store's coordinator node.
///
/// The credentials are handed to the HTTP layer as basic auth; this module
/// does not touch them beyond that.
#[derive(Debug, Clone, Builder)]
pub struct Destination {
    #[builder(setter(into))]
    pub host: String,
    pub port: u16,
    #[builder(setter(into), default = "\"root\".to_string()")]
    pub user: String,
    #[builder(setter(into), default)]
    pub password: String,
}

impl Destination {
    pub fn builder() -> DestinationBuilder {
        DestinationBuilder::default()
    }
}

/// The assembled request: URL and headers, ready for the transport layer.
///
/// Assembly is pure; everything invalid is rejected here, before any I/O.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub url: Url,
    pub headers: HeaderMap,
}

impl RequestPlan {
    pub fn new(destination: &Destination, batch: &LoadBatch) -> Result<Self, LoadError> {
        if destination.host.is_empty() {
            return Err(LoadError::config("destination host is empty"));
        }
        if destination.port == 0 {
            return Err(LoadError::config("destination port is 0"));
        }

        // The store accepts exactly this path shape.
        let url = Url::parse(&format!(
            "http://{}:{}/api/{}/{}/_stream_load",
            destination.host, destination.port, batch.database, batch.table
        ))
        .map_err(|e| {
            LoadError::config(format!(
                "cannot build stream load URL for {}:{}: {e}",
                destination.host, destination.port
            ))
        })?;

        let mut headers = HeaderMap::new();
        // Ask the store to confirm before the body is streamed, so a doomed
        // request (bad table, duplicate label) fails without pushing the
        // encoded batch over the wire.
        headers.insert(EXPECT, HeaderValue::from_static(EXPECT_CONTINUE));
        insert(&mut headers, LABEL_HEADER, &batch.label)?;
        insert(&mut headers, FORMAT_HEADER, batch.format.format.as_str())?;
        insert(&mut headers, COLUMNS_HEADER, &columns_header(batch))?;
        insert(
            &mut headers,
            FIELD_DELIMITER_HEADER,
            &batch.format.field_delimiter,
        )?;
        // Set for JSON too: the effective value is the array element
        // separator, and setting it keeps the header set consistent.
        insert(
            &mut headers,
            LINE_DELIMITER_HEADER,
            batch.format.effective_line_delimiter(),
        )?;
        if batch.format.format == Format::Json {
            insert(
                &mut headers,
                STRIP_OUTER_ARRAY_HEADER,
                if batch.format.strip_outer_array {
                    "true"
                } else {
                    "false"
                },
            )?;
        }

        Ok(Self { url, headers })
    }
}

/// Comma-joined column list, with the delete sign appended when the table is
/// merge-on-write so the store maps the extra encoded field.
fn columns_header(batch: &LoadBatch) -> String {
    let mut columns = batch.columns.join(",");
    if batch.merge_on_write {
        columns.push(',');
        columns.push_str(DELETE_SIGN_COLUMN);
    }
    columns
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), LoadError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| LoadError::config(format!("header `{name}` value {value:?} is not valid")))?;
    headers.insert(name, value);
    Ok(())
}
