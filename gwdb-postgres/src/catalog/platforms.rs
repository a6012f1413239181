use std::collections::HashMap;

use gwdb::{named_params, params, shape, sync::Driver, Error, Record};

use super::{text_array, GeneWeaver};

/// An expression platform to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlatform {
    /// GEO platform accession, e.g. `GPL1261`.
    pub gpl_id: String,
    pub shortname: String,
    pub name: String,
    pub sp_id: i64,
}

impl<D: Driver> GeneWeaver<D> {
    /// `{pf_id, pf_name, pf_shortname, pf_gpl_id}` for every supported platform.
    pub fn platforms(&self) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT pf_id, pf_name, pf_shortname, pf_gpl_id FROM odestatic.platform",
            (),
        )
    }

    /// Probe reference → probe ID. Platforms reuse probe references, so the platform is
    /// required.
    pub fn platform_probes<S: AsRef<str>>(
        &self,
        pf_id: i64,
        refs: &[S],
    ) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT prb_ref_id, prb_id
             FROM   odestatic.probe
             WHERE  pf_id = ? AND prb_ref_id = ANY(?)",
            params![pf_id, text_array(refs)],
        )?;
        shape::biject(records)
    }

    pub fn all_platform_probes(&self, pf_id: i64) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT prb_ref_id, prb_id FROM odestatic.probe WHERE pf_id = ?",
            params![pf_id],
        )?;
        shape::biject(records)
    }

    /// Probe ID → the genes it maps to.
    pub fn probe_genes(&self, prb_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error> {
        let records = self.fetch_all(
            "SELECT prb_id, ode_gene_id FROM extsrc.probe2gene WHERE prb_id = ANY(?)",
            params![prb_ids],
        )?;
        shape::associate(records)
    }

    /// Inserts a platform and returns its `pf_id`.
    pub fn insert_platform(&self, platform: &NewPlatform) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO odestatic.platform (pf_gpl_id, pf_shortname, pf_name, sp_id, pf_date)
             VALUES (:gpl_id, :shortname, :name, :sp_id, NOW())
             RETURNING pf_id",
            named_params! {
                gpl_id: &platform.gpl_id,
                shortname: &platform.shortname,
                name: &platform.name,
                sp_id: platform.sp_id,
            },
        )
    }

    /// Inserts a probe reference for a platform and returns its `prb_id`.
    pub fn insert_probe(&self, prb_ref: &str, pf_id: i64) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO odestatic.probe (prb_ref_id, pf_id) VALUES (?, ?) RETURNING prb_id",
            params![prb_ref, pf_id],
        )
    }

    /// Maps a probe to a gene and returns the `prb_id`.
    pub fn insert_probe2gene(&self, prb_id: i64, gene_id: i64) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO extsrc.probe2gene (prb_id, ode_gene_id) VALUES (?, ?) RETURNING prb_id",
            params![prb_id, gene_id],
        )
    }
}
