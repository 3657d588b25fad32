//! CSV export of the per-tick log.

use std::path::Path;

use crate::error::MbeError;

use super::Snapshot;

pub(super) fn write_csv(path: &Path, columns: &[&str], log: &[Snapshot]) -> Result<(), MbeError> {
    if log.is_empty() {
        return Err(MbeError::Export(
            "tick log is empty, run the simulation first".into(),
        ));
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|err| MbeError::Export(format!("{}: {err}", path.display()).into()))?;
    let header = std::iter::once("time").chain(columns.iter().copied());
    writer
        .write_record(header)
        .map_err(|err| MbeError::Export(format!("header: {err}").into()))?;
    for snapshot in log {
        let row = std::iter::once(snapshot.time.to_string())
            .chain(snapshot.values.iter().map(|param| param.value().to_string()));
        writer
            .write_record(row)
            .map_err(|err| MbeError::Export(format!("tick {}: {err}", snapshot.time).into()))?;
    }
    writer
        .flush()
        .map_err(|err| MbeError::Export(format!("{}: {err}", path.display()).into()))
}
