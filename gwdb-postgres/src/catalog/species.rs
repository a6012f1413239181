use std::collections::HashMap;

use gwdb::{named_params, shape, sync::Driver, Error, Record};

use super::GeneWeaver;

impl<D: Driver> GeneWeaver<D> {
    /// Species name → species ID. Names keep their case unless `lower` is set.
    pub fn species(&self, lower: bool) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT CASE WHEN :lower THEN LOWER(sp_name) ELSE sp_name END AS sp_name, sp_id
             FROM   odestatic.species",
            named_params! { lower: lower },
        )?;
        shape::biject(records)
    }

    /// Species name → `{sp_name, sp_id, sp_taxid}`.
    pub fn species_with_taxid(&self, lower: bool) -> Result<HashMap<String, Record>, Error> {
        let records = self.fetch_all(
            "SELECT CASE WHEN :lower THEN LOWER(sp_name) ELSE sp_name END AS sp_name,
                    sp_id, sp_taxid
             FROM   odestatic.species",
            named_params! { lower: lower },
        )?;
        shape::map_by_first(records)
    }

    /// NCBI taxon ID → species ID.
    pub fn species_by_taxid(&self) -> Result<HashMap<i64, i64>, Error> {
        let records = self.fetch_all("SELECT sp_taxid, sp_id FROM odestatic.species", ())?;
        shape::biject(records)
    }
}
