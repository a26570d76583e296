//! Opportunity journal
//!
//! Appends every reported opportunity to a JSON-lines file.

use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::brain::ProfitReport;

/// One line in the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityLog {
    pub timestamp: DateTime<Utc>,
    pub path: Vec<String>,
    /// Rate per leg; `null` where the rate was missing
    pub rates: Vec<Option<f64>>,
    pub start_amount: f64,
    pub final_amount: f64,
    pub profit_pct: f64,
    pub missing_legs: usize,
}

impl From<&ProfitReport> for OpportunityLog {
    fn from(report: &ProfitReport) -> Self {
        Self {
            timestamp: report.detected_at,
            path: report.path.vertices().iter().map(|c| c.to_string()).collect(),
            rates: report.legs.iter().map(|l| l.rate).collect(),
            start_amount: report.start_amount,
            final_amount: report.final_amount,
            profit_pct: report.profit_percentage(),
            missing_legs: report.missing_legs(),
        }
    }
}

impl OpportunityLog {
    /// Append this log to a file
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

/// Where reports get written
#[derive(Debug, Clone)]
pub struct OpportunityJournal {
    path: PathBuf,
}

impl OpportunityJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, report: &ProfitReport) -> Result<()> {
        OpportunityLog::from(report).append_to_file(&self.path)
    }
}
