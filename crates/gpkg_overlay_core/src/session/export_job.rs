use crate::exclusive::{CancelToken, ExclusiveGuard};
use crate::export::{ExportFormat, ExportSnapshot, ExportSummary};
use crate::session::SessionResult;
use std::io::Write;
use std::path::Path;

/// Export in progress. Holds the session's exclusive lock until dropped,
/// so edits and persists are rejected with `Busy` meanwhile.
#[derive(Debug)]
pub struct ExportJob {
    _guard: ExclusiveGuard,
    snapshot: ExportSnapshot,
}

impl ExportJob {
    pub(crate) fn new(guard: ExclusiveGuard, snapshot: ExportSnapshot) -> Self {
        Self {
            _guard: guard,
            snapshot,
        }
    }

    pub fn snapshot(&self) -> &ExportSnapshot {
        &self.snapshot
    }

    pub fn write_to<W: Write>(
        &self,
        format: ExportFormat,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> SessionResult<ExportSummary> {
        Ok(self.snapshot.write_to(format, sink, cancel)?)
    }

    pub fn write_to_path(
        &self,
        format: ExportFormat,
        path: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> SessionResult<ExportSummary> {
        Ok(self.snapshot.write_to_path(format, path, cancel)?)
    }
}
