//! Progress display for image transfers
//!
//! The registry client streams one status line per progress update. A [`TransferDisplay`]
//! is chosen once from configuration and handed to each syncer; rendering is best effort
//! and can never fail a sync.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Display selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Log lines through tracing
    #[default]
    Plain,
    /// Animated terminal spinner
    Spinner,
}

impl DisplayMode {
    pub fn build(self) -> Arc<dyn TransferDisplay> {
        match self {
            DisplayMode::Plain => Arc::new(PlainDisplay),
            DisplayMode::Spinner => Arc::new(SpinnerDisplay),
        }
    }
}

/// Operation a progress stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Pull,
    Push,
    Retag,
    Remove,
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferOp::Pull => "Pulling",
            TransferOp::Push => "Pushing",
            TransferOp::Retag => "Retagging",
            TransferOp::Remove => "Removing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetail {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
}

/// One line of pull/push progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub progress_detail: ProgressDetail,
    #[serde(default)]
    pub id: String,
}

impl TransferStatus {
    /// Parse engine JSON (`{"status":..,"id":..}`), a CLI `"<id>: <status>"` line, or
    /// fall back to the raw line as the status.
    pub fn parse_line(line: &str) -> Self {
        let line = line.trim();
        if line.starts_with('{') {
            if let Ok(status) = serde_json::from_str::<TransferStatus>(line) {
                return status;
            }
        }

        match line.split_once(": ") {
            Some((id, status)) if !id.is_empty() && !id.contains(char::is_whitespace) => Self {
                status: status.to_string(),
                id: id.to_string(),
                ..Default::default()
            },
            _ => Self {
                status: line.to_string(),
                ..Default::default()
            },
        }
    }
}

/// Factory for progress renderers, one per operation
pub trait TransferDisplay: Send + Sync {
    fn begin(&self, op: TransferOp, image: &str) -> Box<dyn TransferProgress>;
}

/// Renderer for a single running operation
pub trait TransferProgress: Send {
    fn update(&mut self, status: &TransferStatus);
    fn finish(&mut self);
}

/// Writes progress as log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainDisplay;

impl TransferDisplay for PlainDisplay {
    fn begin(&self, op: TransferOp, image: &str) -> Box<dyn TransferProgress> {
        info!("{} {}", op, image);
        Box::new(PlainProgress {
            image: image.to_string(),
        })
    }
}

struct PlainProgress {
    image: String,
}

impl TransferProgress for PlainProgress {
    fn update(&mut self, status: &TransferStatus) {
        if status.progress.is_empty() {
            info!("{}: {}", self.image, status.status);
        } else {
            debug!("{}: {} {}", self.image, status.status, status.progress);
        }
    }

    fn finish(&mut self) {}
}

/// Renders a terminal spinner per operation
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinnerDisplay;

impl TransferDisplay for SpinnerDisplay {
    fn begin(&self, op: TransferOp, image: &str) -> Box<dyn TransferProgress> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {prefix} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(format!("{op} {image}"));
        bar.enable_steady_tick(Duration::from_millis(100));

        Box::new(SpinnerProgress {
            bar,
            op,
            image: image.to_string(),
        })
    }
}

struct SpinnerProgress {
    bar: ProgressBar,
    op: TransferOp,
    image: String,
}

impl TransferProgress for SpinnerProgress {
    fn update(&mut self, status: &TransferStatus) {
        self.bar
            .set_message(format!("{} {}", status.status, status.progress));
    }

    fn finish(&mut self) {
        self.bar
            .finish_with_message(format!("✓ done {} {}", self.op.to_string().to_lowercase(), self.image));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_engine_json() {
        let line = r#"{"status":"Downloading","progressDetail":{"current":512,"total":1024},"progress":"[=====>     ]","id":"a1b2c3d4e5f6"}"#;
        let status = TransferStatus::parse_line(line);

        assert_eq!(status.status, "Downloading");
        assert_eq!(status.id, "a1b2c3d4e5f6");
        assert_eq!(status.progress_detail.current, 512);
        assert_eq!(status.progress_detail.total, 1024);
        assert_eq!(status.progress, "[=====>     ]");
    }

    #[test]
    fn test_parse_cli_layer_line() {
        let status = TransferStatus::parse_line("a1b2c3d4e5f6: Pull complete");
        assert_eq!(status.id, "a1b2c3d4e5f6");
        assert_eq!(status.status, "Pull complete");
    }

    #[test]
    fn test_parse_free_text() {
        let status = TransferStatus::parse_line("Status: Downloaded newer image for busybox:1.36");
        assert_eq!(status.id, "Status");

        let status = TransferStatus::parse_line("The push refers to repository [r.io/app]");
        assert_eq!(status.id, "");
        assert_eq!(status.status, "The push refers to repository [r.io/app]");
    }

    #[test]
    fn test_parse_malformed_json_falls_back() {
        let status = TransferStatus::parse_line("{not json");
        assert_eq!(status.status, "{not json");
    }

    #[test]
    fn test_display_mode_parsing() {
        let mode: DisplayMode = serde_yaml::from_str("spinner").unwrap();
        assert_eq!(mode, DisplayMode::Spinner);
        assert_eq!(DisplayMode::default(), DisplayMode::Plain);
    }

    #[test]
    fn test_plain_display_accepts_updates() {
        let display = DisplayMode::Plain.build();
        let mut progress = display.begin(TransferOp::Pull, "busybox:1.36");
        progress.update(&TransferStatus::parse_line("abc: Waiting"));
        progress.finish();
    }

    #[test]
    fn test_op_labels() {
        assert_eq!(TransferOp::Pull.to_string(), "Pulling");
        assert_eq!(TransferOp::Remove.to_string(), "Removing");
    }
}
