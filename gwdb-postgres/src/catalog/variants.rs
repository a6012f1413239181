use std::collections::HashMap;

use gwdb::{named_params, params, shape, sync::Driver, Error, Record};

use super::{text_array, GeneWeaver};

/// Reference SNP IDs (`rs12345` or `12345`) as the integers `extsrc.variant` stores.
fn snp_ids<S: AsRef<str>>(refs: &[S]) -> Result<Vec<i64>, Error> {
    refs.iter()
        .map(|r| {
            let r = r.as_ref().trim();
            r.strip_prefix("rs")
                .unwrap_or(r)
                .parse()
                .map_err(|_| Error::query(format!("`{}` is not a reference SNP identifier", r)))
        })
        .collect()
}

impl<D: Driver> GeneWeaver<D> {
    /// Every genome build the database knows, as whole `odestatic.genome_build` rows.
    pub fn genome_builds(&self) -> Result<Vec<Record>, Error> {
        self.fetch_all("SELECT * FROM odestatic.genome_build", ())
    }

    /// Genome build ID (`gb_id`) of a build reference such as `"hg38"`.
    pub fn genome_build_by_ref(&self, build: &str) -> Result<Option<i64>, Error> {
        self.fetch_scalar(
            "SELECT gb_id FROM odestatic.genome_build WHERE gb_ref_id = ?",
            params![build],
        )
    }

    /// Variant types with the given effect, as whole `odestatic.variant_type` rows.
    pub fn variant_types_by_effect(&self, effect: &str) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT * FROM odestatic.variant_type WHERE vt_effect = ?",
            params![effect],
        )
    }

    /// Reference SNP ID → variant ID (`var_id`) within one genome build.
    ///
    /// References may carry the `rs` prefix; the keys never do. A reference that is not a
    /// number is an error.
    pub fn variants_by_refs<S: AsRef<str>>(
        &self,
        refs: &[S],
        build: &str,
    ) -> Result<HashMap<i64, i64>, Error> {
        let records = self.fetch_all(
            "SELECT     v.var_ref_id, v.var_id
             FROM       extsrc.variant v
             INNER JOIN extsrc.variant_info vi USING (vri_id)
             WHERE      vi.gb_id = (
                            SELECT gb_id FROM odestatic.genome_build WHERE gb_ref_id = :build
                        ) AND
                        v.var_ref_id = ANY(:refs)",
            named_params! { build: build, refs: snp_ids(refs)? },
        )?;
        shape::biject(records)
    }

    /// Reference SNP ID → variant gene ID (`ode_gene_id`), the gene-table entry that ties a
    /// variant to the gene features around it. Variants without one are left out.
    pub fn variant_odes_by_refs<S: AsRef<str>>(
        &self,
        refs: &[S],
        build: &str,
    ) -> Result<HashMap<i64, i64>, Error> {
        let records = self.fetch_all(
            "SELECT     v.var_ref_id, g.ode_gene_id
             FROM       extsrc.variant v
             INNER JOIN extsrc.variant_info vi USING (vri_id)
             INNER JOIN odestatic.genome_build gb USING (gb_id)
             INNER JOIN extsrc.gene g ON v.var_id::varchar = g.ode_ref_id
             WHERE      gb.gb_ref_id = :build AND
                        g.sp_id = gb.sp_id AND
                        v.var_ref_id = ANY(:refs)",
            named_params! { build: build, refs: snp_ids(refs)? },
        )?;
        shape::biject(records)
    }

    /// Variant gene ID → reference SNP ID within one genome build.
    pub fn variant_refs_by_odes(
        &self,
        odes: &[i64],
        build: &str,
    ) -> Result<HashMap<i64, i64>, Error> {
        let records = self.fetch_all(
            "SELECT     g.ode_gene_id, v.var_ref_id
             FROM       extsrc.gene g
             INNER JOIN extsrc.variant v ON v.var_id = g.ode_ref_id::bigint
             INNER JOIN extsrc.variant_info vi USING (vri_id)
             INNER JOIN odestatic.genome_build gb USING (gb_id)
             WHERE      gb.gb_ref_id = :build AND
                        g.sp_id = gb.sp_id AND
                        g.ode_gene_id = ANY(:odes)",
            named_params! { build: build, odes: odes },
        )?;
        shape::biject(records)
    }

    /// Variant gene ID → the gene IDs it rolls up to (1:N), through the homology sources
    /// named in `mapping`. Callers usually pass `&["Variant"]`.
    pub fn roll_up_variants<S: AsRef<str>>(
        &self,
        odes: &[i64],
        mapping: &[S],
    ) -> Result<HashMap<i64, Vec<i64>>, Error> {
        let records = self.fetch_all(
            "SELECT DISTINCT ON (hom_source_id, ode_gene_id) hom_source_id, ode_gene_id
             FROM   extsrc.homology
             WHERE  hom_source_id = ANY(?) AND hom_source_name = ANY(?)",
            params![odes, text_array(mapping)],
        )?;
        shape::associate(records)
    }

    /// Gene set ID → whether the set holds genomic variants.
    ///
    /// Variant sets store the negated variant gene type; a negative ID that is not a gene
    /// type belongs to an expression platform.
    pub fn is_variant_set(&self, gs_ids: &[i64]) -> Result<HashMap<i64, bool>, Error> {
        let records = self.fetch_all(
            "WITH variant_ids AS (
                SELECT gdb_id FROM odestatic.genedb WHERE gdb_name ILIKE 'variant'
             )
             SELECT    g.gs_id,
                       COALESCE(
                           g.gs_gene_id_type < 0 AND
                           gdb.gdb_id IN (SELECT gdb_id FROM variant_ids),
                           FALSE
                       )
             FROM      production.geneset g
             LEFT JOIN odestatic.genedb gdb ON gdb.gdb_id = abs(g.gs_gene_id_type)
             WHERE     g.gs_id = ANY(?)",
            params![gs_ids],
        )?;
        shape::biject(records)
    }
}
