//! Format configuration and delimiter derivation.

use serde::Serialize;

use crate::config::{
    FIELD_DELIMITER_DEFAULT, LINE_DELIMITER_DEFAULT, LINE_DELIMITER_JSON,
    STRIP_OUTER_ARRAY_DEFAULT, unescape_delimiter,
};

/// Wire format of a load body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Csv,
    Json,
}

impl Format {
    /// Value of the `format` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
        }
    }
}

/// Format settings for one destination table.
///
/// Delimiters are held in the escaped text form they travel in as HTTP header
/// values (`"\\n"`, `"\\t"`, `"\\x01"`); [`FormatConfig::field_delimiter_bytes`]
/// and [`FormatConfig::line_delimiter_bytes`] yield the body byte form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatConfig {
    pub format: Format,
    pub field_delimiter: String,
    pub line_delimiter: String,
    pub strip_outer_array: bool,
}

impl FormatConfig {
    pub fn csv() -> Self {
        Self {
            format: Format::Csv,
            field_delimiter: FIELD_DELIMITER_DEFAULT.to_string(),
            line_delimiter: LINE_DELIMITER_DEFAULT.to_string(),
            strip_outer_array: STRIP_OUTER_ARRAY_DEFAULT,
        }
    }

    pub fn json() -> Self {
        Self {
            format: Format::Json,
            ..Self::csv()
        }
    }

    pub fn with_field_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.field_delimiter = delimiter.into();
        self
    }

    pub fn with_line_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.line_delimiter = delimiter.into();
        self
    }

    pub fn with_strip_outer_array(mut self, strip: bool) -> Self {
        self.strip_outer_array = strip;
        self
    }

    /// The line delimiter that actually applies, in escaped header form.
    ///
    /// JSON rows are elements of a JSON array, so the separator is always `,`
    /// regardless of any configured value; CSV uses the configured delimiter.
    /// This cross-field rule lives here and nowhere else.
    pub fn effective_line_delimiter(&self) -> &str {
        match self.format {
            Format::Json => LINE_DELIMITER_JSON,
            Format::Csv => &self.line_delimiter,
        }
    }

    /// Field delimiter as the bytes written between fields in the body.
    pub fn field_delimiter_bytes(&self) -> String {
        unescape_delimiter(&self.field_delimiter)
    }

    /// Effective line delimiter as the bytes written between rows in the body.
    pub fn line_delimiter_bytes(&self) -> String {
        unescape_delimiter(self.effective_line_delimiter())
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self::csv()
    }
}
