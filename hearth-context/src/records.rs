//! Typed record helpers.

use crate::{DataStoreResult, ImportParameters, ImportReport, Session};
use hearth_model::{ModelRecord, Predicate, Record};
use hearth_store::FetchRequest;

impl Session {
    /// Fetches the objects of `R::ENTITY` matching `predicate` as typed
    /// records.
    pub fn model_records<R: ModelRecord>(&self, predicate: Predicate) -> DataStoreResult<Vec<R>> {
        let objects = self.fetch(&FetchRequest::new(R::ENTITY).with_predicate(predicate))?;
        Ok(objects
            .iter()
            .map(R::from_object)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Imports typed records with the type's own identity settings.
    pub fn import_model_records<R: ModelRecord>(
        &self,
        records: &[R],
        params: ImportParameters,
    ) -> DataStoreResult<ImportReport> {
        let records = to_records(records)?;
        self.import_records(records, &R::identity_parameters(), params)
    }
}

pub(crate) fn to_records<R: ModelRecord>(records: &[R]) -> DataStoreResult<Vec<Record>> {
    Ok(records
        .iter()
        .map(ModelRecord::to_record)
        .collect::<Result<Vec<_>, _>>()?)
}
