//! Run reporting.

pub mod json;
pub mod slack;

pub use json::JsonReporter;
pub use slack::{SlackMessage, SlackReporter};

use async_trait::async_trait;
use tracing::warn;

use crate::error::{KeoError, Result};
use crate::orchestrator::{ReportInput, Reporter};

/// Fans every call out to each reporter in order.
///
/// All reporters are called even when one fails. The first error is returned.
pub struct CompositeReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl CompositeReporter {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

fn keep_first(first: &mut Option<KeoError>, result: Result<()>, stage: &str) {
    if let Err(e) = result {
        warn!(error = %e, "Reporter {} failed", stage);
        first.get_or_insert(e);
    }
}

#[async_trait]
impl Reporter for CompositeReporter {
    async fn initialize(&self) -> Result<()> {
        let mut first = None;
        for reporter in &self.reporters {
            keep_first(&mut first, reporter.initialize().await, "initialize");
        }
        first.map_or(Ok(()), Err)
    }

    async fn report(&self, input: &ReportInput) -> Result<()> {
        let mut first = None;
        for reporter in &self.reporters {
            keep_first(&mut first, reporter.report(input).await, "report");
        }
        first.map_or(Ok(()), Err)
    }

    async fn finalize(&self) -> Result<()> {
        let mut first = None;
        for reporter in &self.reporters {
            keep_first(&mut first, reporter.finalize().await, "finalize");
        }
        first.map_or(Ok(()), Err)
    }
}
