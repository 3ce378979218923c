use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::TranscriptSegment;

/// A single SubRip cue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrtCue {
    /// Sequential number as written in the file
    pub index: u32,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl SrtCue {
    pub fn new(index: u32, start: Duration, end: Duration, text: &str) -> Self {
        Self {
            index,
            start,
            end,
            text: SrtParser::clean_text(text),
        }
    }

    pub fn to_segment(&self) -> TranscriptSegment {
        let duration = self.end.saturating_sub(self.start);
        TranscriptSegment::new(
            self.text.clone(),
            self.start.as_secs_f64(),
            duration.as_secs_f64(),
        )
    }
}

impl fmt::Display for SrtCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{} --> {}\n{}\n",
            self.index,
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.text
        )
    }
}

/// Parser for SubRip caption files
pub struct SrtParser;

impl SrtParser {
    /// Parse SRT content into cues, skipping blocks without a timing line.
    ///
    /// Fails only when the content has text but no parseable cue at all.
    pub fn parse(content: &str) -> Result<Vec<SrtCue>> {
        let normalized = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let mut cues = Vec::new();

        for block in normalized.split("\n\n") {
            let lines: Vec<&str> = block.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            let Some(timing_pos) = lines.iter().position(|l| l.contains("-->")) else {
                continue;
            };

            let (start, end) = match parse_timing_line(lines[timing_pos]) {
                Ok(range) => range,
                Err(e) => {
                    tracing::debug!("Skipping malformed cue timing {:?}: {}", lines[timing_pos], e);
                    continue;
                }
            };

            let index = if timing_pos > 0 {
                lines[timing_pos - 1].parse().unwrap_or(cues.len() as u32 + 1)
            } else {
                cues.len() as u32 + 1
            };
            let text = lines[timing_pos + 1..].join(" ");

            cues.push(SrtCue::new(index, start, end.max(start), &text));
        }

        if cues.is_empty() && !normalized.trim().is_empty() {
            return Err(anyhow!("No valid SRT cues found"));
        }

        Ok(cues)
    }

    /// Parse SRT content straight into transcript segments, dropping
    /// cues whose text is empty.
    pub fn parse_segments(content: &str) -> Result<Vec<TranscriptSegment>> {
        Ok(Self::parse(content)?
            .iter()
            .filter(|cue| !cue.text.is_empty())
            .map(SrtCue::to_segment)
            .collect())
    }

    /// Collapse whitespace and strip inline formatting tags
    pub fn clean_text(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_tag = false;
        for c in text.chars() {
            match c {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                _ if !in_tag => out.push(c),
                _ => {}
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Format duration as SRT timestamp (HH:MM:SS,mmm)
pub fn format_timestamp(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let milliseconds = duration.subsec_millis();

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, milliseconds)
}

fn parse_timing_line(line: &str) -> Result<(Duration, Duration)> {
    let parts: Vec<&str> = line.split("-->").collect();
    if parts.len() != 2 {
        return Err(anyhow!("Invalid timing line"));
    }

    // trailing position settings may follow the end timestamp
    let end = parts[1]
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("Missing end timestamp"))?;

    Ok((parse_timestamp(parts[0].trim())?, parse_timestamp(end)?))
}

/// Parse a single timestamp (HH:MM:SS,mmm); a '.' millisecond separator is accepted
pub fn parse_timestamp(timestamp: &str) -> Result<Duration> {
    let (hms, millis) = timestamp
        .split_once(',')
        .or_else(|| timestamp.split_once('.'))
        .ok_or_else(|| anyhow!("Invalid timestamp format: {}", timestamp))?;

    let hms_parts: Vec<&str> = hms.split(':').collect();
    if hms_parts.len() != 3 {
        return Err(anyhow!("Invalid time format: {}", timestamp));
    }

    let hours: u64 = hms_parts[0].parse()?;
    let minutes: u64 = hms_parts[1].parse()?;
    let seconds: u64 = hms_parts[2].parse()?;
    let milliseconds: u64 = millis.parse()?;

    let total_seconds = hours * 3600 + minutes * 60 + seconds;
    Ok(Duration::from_millis(total_seconds * 1000 + milliseconds))
}
