//! Progress reporting for pipeline runs.

use geist_analyzer::AnalysisProgress;
use geist_shared::ReportDocument;

use crate::pipeline::RunState;

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called on every run-state transition.
    fn state(&self, state: &RunState);
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each file is analyzed (codebase runs only).
    fn file_analyzed(&self, current: usize, total: usize, rel_path: &str);
    /// Called once the report has been synthesized.
    fn done(&self, document: &ReportDocument);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn state(&self, _state: &RunState) {}
    fn phase(&self, _name: &str) {}
    fn file_analyzed(&self, _current: usize, _total: usize, _rel_path: &str) {}
    fn done(&self, _document: &ReportDocument) {}
}

/// Forwards analyzer progress to a run's reporter.
pub(crate) struct AnalysisBridge<'a>(pub &'a dyn ProgressReporter);

impl AnalysisProgress for AnalysisBridge<'_> {
    fn phase(&self, name: &str) {
        self.0.phase(name);
    }

    fn file_analyzed(&self, current: usize, total: usize, rel_path: &str) {
        self.0.file_analyzed(current, total, rel_path);
    }
}
