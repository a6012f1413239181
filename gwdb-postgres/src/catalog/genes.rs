use std::collections::HashMap;

use gwdb::{named_params, params, shape, sync::Driver, Error};

use super::{text_array, GeneWeaver};

impl<D: Driver> GeneWeaver<D> {
    /// Gene reference (symbol, Ensembl, MGI, ...) → GeneWeaver gene ID, optionally limited to
    /// one species and one gene type.
    ///
    /// Symbols only match preferred entries: some species carry stale duplicate symbols
    /// (mouse Ccr4 is one) that would otherwise map to the wrong gene. Genomic variants are
    /// never matched. When a reference occurs more than once the last row wins.
    pub fn gene_ids<S: AsRef<str>>(
        &self,
        refs: &[S],
        sp_id: Option<i64>,
        gdb_id: Option<i64>,
    ) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "WITH symbol_type AS (
                SELECT gdb_id FROM odestatic.genedb WHERE gdb_name = 'Gene Symbol' LIMIT 1
             ), variant_type AS (
                SELECT COALESCE(
                    (SELECT gdb_id FROM odestatic.genedb WHERE gdb_name = 'Variant'), 0
                ) AS gdb_id
             )
             SELECT ode_ref_id, ode_gene_id
             FROM   extsrc.gene
             WHERE  ode_ref_id = ANY(:refs) AND
                    (:sp_id::int IS NULL OR sp_id = :sp_id) AND
                    (:gdb_id::int IS NULL OR gdb_id = :gdb_id) AND
                    (:gdb_id IS DISTINCT FROM (SELECT gdb_id FROM symbol_type) OR ode_pref) AND
                    gdb_id <> (SELECT gdb_id FROM variant_type)",
            named_params! {
                refs: text_array(refs),
                sp_id: sp_id,
                gdb_id: gdb_id,
            },
        )?;
        shape::biject(records)
    }

    /// Every gene reference of a species → gene ID, variants excluded.
    ///
    /// `gdb_id` limits the references to one gene type. Without it, `symbol` limits them to
    /// preferred gene symbols; with neither, every reference is returned.
    pub fn species_genes(
        &self,
        sp_id: i64,
        gdb_id: Option<i64>,
        symbol: bool,
    ) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT ode_ref_id, ode_gene_id
             FROM   extsrc.gene
             WHERE  sp_id = :sp_id AND
                    gdb_id NOT IN (
                        SELECT gdb_id FROM odestatic.genedb WHERE gdb_name = 'Variant'
                    ) AND
                    CASE
                        WHEN :gdb_id::int IS NOT NULL THEN gdb_id = :gdb_id
                        WHEN :symbol THEN ode_pref AND gdb_id = (
                            SELECT gdb_id FROM odestatic.genedb WHERE gdb_name = 'Gene Symbol'
                        )
                        ELSE TRUE
                    END",
            named_params! {
                sp_id: sp_id,
                gdb_id: gdb_id,
                symbol: symbol,
            },
        )?;
        shape::biject(records)
    }

    /// Gene ID → all of its references (1:N), optionally of one gene type.
    pub fn gene_refs(
        &self,
        genes: &[i64],
        gdb_id: Option<i64>,
    ) -> Result<HashMap<i64, Vec<String>>, Error> {
        let records = self.fetch_all(
            "SELECT DISTINCT ON (ode_gene_id, ode_ref_id) ode_gene_id, ode_ref_id
             FROM   extsrc.gene
             WHERE  ode_gene_id = ANY(:genes) AND
                    (:gdb_id::int IS NULL OR gdb_id = :gdb_id)",
            named_params! { genes: genes, gdb_id: gdb_id },
        )?;
        shape::associate(records)
    }

    /// Gene ID → homology cluster ID from one homology source, e.g. `"Homologene"`.
    pub fn gene_homologs(&self, genes: &[i64], source: &str) -> Result<HashMap<i64, i64>, Error> {
        let records = self.fetch_all(
            "SELECT ode_gene_id, hom_id
             FROM   extsrc.homology
             WHERE  ode_gene_id = ANY(?) AND hom_source_name = ?",
            params![genes, source],
        )?;
        shape::biject(records)
    }

    /// Gene type name → gene type ID (`gdb_id`). `short` uses the abbreviated names.
    pub fn gene_types(&self, short: bool) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT CASE WHEN ? THEN gdb_shortname ELSE gdb_name END, gdb_id
             FROM   odestatic.genedb",
            params![short],
        )?;
        shape::biject(records)
    }

    /// Gene type ID used for genomic variants, if the database has one.
    pub fn variant_gene_type(&self) -> Result<Option<i64>, Error> {
        self.fetch_scalar(
            "SELECT gdb_id FROM odestatic.genedb WHERE gdb_name = 'Variant'",
            (),
        )
    }

    /// Adds a reference to an existing gene and returns the `(ode_gene_id, ode_ref_id)` key.
    pub fn insert_gene(
        &self,
        gene_id: i64,
        ref_id: &str,
        gdb_id: i64,
        sp_id: i64,
        preferred: bool,
    ) -> Result<(i64, String), Error> {
        let record = self.with_cursor(|cursor| {
            cursor.fetch_optional(
                "INSERT INTO extsrc.gene (ode_gene_id, ode_ref_id, gdb_id, sp_id, ode_pref, ode_date)
                 VALUES (?, ?, ?, ?, ?, NOW())
                 RETURNING ode_gene_id, ode_ref_id",
                params![gene_id, ref_id, gdb_id, sp_id, preferred],
            )
        })?;
        let record = record.ok_or_else(|| Error::query("insert did not return the new row"))?;
        Ok((record.get("ode_gene_id")?, record.get("ode_ref_id")?))
    }
}
