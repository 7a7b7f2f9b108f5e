use std::path::PathBuf;

use crate::model::ProgressEvent;

/// Prefix of the lines produced by our `--progress-template`
pub const PROGRESS_PREFIX: &str = "tubefetch-progress";
/// Prefix of the line produced by our `--print after_move:` template
pub const FILE_PREFIX: &str = "tubefetch-file";

/// A yt-dlp output line we care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Progress(ProgressEvent),
    File(PathBuf),
}

pub fn parse_output_line(line: &str) -> Option<OutputLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix(FILE_PREFIX) {
        let path = rest.trim();
        if path.is_empty() || path == "NA" {
            return None;
        }
        return Some(OutputLine::File(PathBuf::from(path)));
    }
    parse_progress_from_line(line).map(OutputLine::Progress)
}

/// Parses `tubefetch-progress <downloaded> <total> <estimate>`.
///
/// yt-dlp prints `NA` for unknown fields; the estimate stands in for a missing
/// total and zero means unknown.
pub fn parse_progress_from_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split_whitespace();
    let done = parse_bytes(fields.next()?)?;
    let total = fields.next().and_then(parse_bytes);
    let estimate = fields.next().and_then(parse_bytes);
    let total = total.or(estimate).unwrap_or(0);
    Some(ProgressEvent::new(done, total))
}

fn parse_bytes(field: &str) -> Option<u64> {
    let value = field.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}
