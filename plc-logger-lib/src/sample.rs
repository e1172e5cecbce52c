use crate::config::LoggerConfig;
use crate::error::LoggerError;
use crate::reader::TagReader;
use crate::tag::{TagKind, TagSpec, TagValue};
use chrono::Local;
use tracing::trace;

/// Column label used for the timestamp prefix.
pub const TIMESTAMP_HEADER: &str = "Timestamp";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Current local time with millisecond precision, e.g. `2024-05-01 13:37:00.250`.
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One acquisition event: an optional timestamp followed by the tag values
/// in configured column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: Option<String>,
    pub values: Vec<TagValue>,
}

impl Sample {
    /// The row as CSV fields.
    pub fn fields(&self) -> Vec<String> {
        self.timestamp
            .iter()
            .cloned()
            .chain(self.values.iter().map(TagValue::to_string))
            .collect()
    }
}

/// Builds [`Sample`]s from the configured tags.
#[derive(Debug, Clone)]
pub struct SampleAssembler {
    tags: Vec<TagSpec>,
    headers: Vec<String>,
    timestamp: bool,
}

impl SampleAssembler {
    pub fn new(tags: Vec<TagSpec>, headers: Vec<String>, timestamp: bool) -> Self {
        Self {
            tags,
            headers,
            timestamp,
        }
    }

    pub fn from_config(config: &LoggerConfig) -> Self {
        Self::new(config.tags.clone(), config.headers.clone(), config.print_timestamp)
    }

    pub fn tags(&self) -> &[TagSpec] {
        &self.tags
    }

    /// The header row as written to the file.
    pub fn headers(&self) -> Vec<String> {
        let prefix = self.timestamp.then(|| TIMESTAMP_HEADER.to_string());
        prefix.into_iter().chain(self.headers.iter().cloned()).collect()
    }

    /// Reads every configured tag and assembles one row. Any failed read
    /// fails the whole sample.
    pub async fn assemble<R: TagReader + ?Sized>(&self, reader: &mut R) -> Result<Sample, LoggerError> {
        let scalar_names: Vec<String> = self
            .tags
            .iter()
            .filter(|t| t.kind == TagKind::Scalar)
            .map(|t| t.name.clone())
            .collect();

        let mut scalars = if scalar_names.is_empty() {
            Vec::new()
        } else {
            reader.read_many(&scalar_names).await?
        };
        if scalars.len() != scalar_names.len() {
            return Err(LoggerError::Protocol(format!(
                "requested {} tags, got {} responses",
                scalar_names.len(),
                scalars.len()
            )));
        }
        // Values are popped from the back, so keep them in reverse order.
        scalars.reverse();

        let mut values = Vec::with_capacity(self.tags.len());
        for spec in &self.tags {
            let value = match spec.kind {
                TagKind::Scalar => match scalars.pop() {
                    Some(response) => response.into_value_for(&spec.name)?,
                    None => return Err(LoggerError::tag_read(&spec.name, "missing response")),
                },
                TagKind::String => TagValue::Text(read_string(reader, spec).await?),
            };
            values.push(value);
        }

        let timestamp = self.timestamp.then(timestamp_now);
        trace!(columns = values.len(), "Assembled sample");
        Ok(Sample { timestamp, values })
    }
}

/// Reads a Logix STRING: the declared length first, then exactly that many
/// payload bytes. Each byte is one character code point.
pub async fn read_string<R: TagReader + ?Sized>(reader: &mut R, spec: &TagSpec) -> Result<String, LoggerError> {
    let len = reader
        .read(&spec.length_tag())
        .await?
        .into_value_for(&spec.name)?
        .as_i64()
        .ok_or_else(|| LoggerError::tag_read(&spec.name, "string length is not an integer"))?;
    let len = usize::try_from(len)
        .map_err(|_| LoggerError::tag_read(&spec.name, format!("negative string length {}", len)))?;
    if len == 0 {
        return Ok(String::new());
    }

    let data = reader
        .read_bytes(&spec.data_tag(), len)
        .await?
        .into_value_for(&spec.name)?;
    if data.len() < len {
        return Err(LoggerError::tag_read(
            &spec.name,
            format!("expected {} bytes, got {}", len, data.len()),
        ));
    }
    Ok(data[..len].iter().copied().map(char::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_get_timestamp_prefix_only_when_enabled() {
        let tags = vec![TagSpec::scalar("A"), TagSpec::scalar("B")];
        let headers = vec!["a".to_string(), "b".to_string()];

        let with = SampleAssembler::new(tags.clone(), headers.clone(), true);
        assert_eq!(with.headers(), vec!["Timestamp", "a", "b"]);

        let without = SampleAssembler::new(tags, headers, false);
        assert_eq!(without.headers(), vec!["a", "b"]);
    }

    #[test]
    fn sample_fields_follow_column_order() {
        let sample = Sample {
            timestamp: Some("2024-01-01 00:00:00.000".to_string()),
            values: vec![TagValue::Int(3), TagValue::Real(2.5), TagValue::Text("ok".into())],
        };
        assert_eq!(sample.fields(), vec!["2024-01-01 00:00:00.000", "3", "2.5", "ok"]);
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = timestamp_now();
        // "YYYY-MM-DD HH:MM:SS.mmm"
        assert_eq!(ts.len(), 23);
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[19..20], ".");
        assert!(ts[20..].chars().all(|c| c.is_ascii_digit()));
    }
}
