//! Named queries over the GeneWeaver schema.
//!
//! Every method checks out one connection, runs exactly one statement and reshapes its rows
//! into the mapping, list or scalar it documents. "Nothing found" is an empty mapping or
//! `None`, never an error.

use gwdb::{sync::Driver, DatabaseConfig, Error, FromValue, Params, Record, Value};

use crate::{ConnectionPool, PooledCursor, PostgresDriver};

mod genes;
mod genesets;
mod ontologies;
mod platforms;
mod publications;
mod species;
mod variants;

pub use genesets::{GenesetFilter, GenesetValue, NewGeneset};
pub use ontologies::{NewOntologyTerm, OntologyTermUpdate};
pub use platforms::NewPlatform;
pub use publications::NewPublication;

/// Data access layer for one GeneWeaver database. Owns its pool; independent instances
/// share nothing.
pub struct GeneWeaver<D: Driver = PostgresDriver> {
    pool: ConnectionPool<D>,
}

impl GeneWeaver<PostgresDriver> {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        ConnectionPool::connect(config).map(Self::new)
    }
}

impl<D: Driver> GeneWeaver<D> {
    pub fn new(pool: ConnectionPool<D>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.pool
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn with_cursor<T>(
        &self,
        f: impl FnOnce(&mut PooledCursor<D>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut cursor = PooledCursor::open(&self.pool)?;
        let result = f(&mut cursor);
        cursor.close();
        result
    }

    fn fetch_all(&self, sql: &str, params: impl Into<Params>) -> Result<Vec<Record>, Error> {
        self.with_cursor(|cursor| cursor.fetch_all(sql, params))
    }

    fn fetch_scalar<T: FromValue>(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<T>, Error> {
        self.with_cursor(|cursor| cursor.fetch_scalar(sql, params))
    }

    fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<u64, Error> {
        self.with_cursor(|cursor| cursor.execute(sql, params))
    }

    /// Runs an `INSERT ... RETURNING key` and returns the key.
    fn insert_returning<T: FromValue>(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<T, Error> {
        self.fetch_scalar(sql, params)?
            .ok_or_else(|| Error::query("insert did not return the new row"))
    }
}

fn text_array<S: AsRef<str>>(items: &[S]) -> Value {
    Value::TextArray(items.iter().map(|s| s.as_ref().to_string()).collect())
}

#[cfg(test)]
pub(crate) fn fake() -> (crate::testing::FakeDriver, GeneWeaver<crate::testing::FakeDriver>) {
    let driver = crate::testing::FakeDriver::new();
    let config = gwdb::PoolConfig {
        max_size: 1,
        acquire_timeout_ms: 1_000,
        ..gwdb::PoolConfig::default()
    };
    let pool = ConnectionPool::new(driver.clone(), &config).unwrap();
    (driver, GeneWeaver::new(pool))
}

#[cfg(test)]
mod tests {
    use sqlparser::{dialect::PostgreSqlDialect, parser::Parser};

    use super::*;

    #[test]
    fn every_catalog_statement_binds_to_valid_sql() {
        let (driver, gw) = fake();
        let publication = NewPublication {
            pubmed: "12345".into(),
            ..NewPublication::default()
        };
        let platform = NewPlatform {
            gpl_id: "GPL1261".into(),
            shortname: "Mouse430_2".into(),
            name: "Affymetrix Mouse Genome 430 2.0 Array".into(),
            sp_id: 1,
        };
        let term = NewOntologyTerm {
            ref_id: "GO:0006955".into(),
            name: "immune response".into(),
            description: String::new(),
            children: 0,
            parents: 1,
            ontdb_id: 1,
        };
        let value = GenesetValue {
            gs_id: 1,
            gene_id: 10,
            value: 0.01,
            name: "Ccr4".into(),
            in_threshold: true,
        };

        // Results are irrelevant: inserts fail on the fake's empty replies, but every
        // statement still reaches the driver.
        let _ = gw.species(false);
        let _ = gw.species_with_taxid(true);
        let _ = gw.species_by_taxid();
        let _ = gw.gene_ids(&["Ccr4"], Some(1), None);
        let _ = gw.species_genes(1, None, true);
        let _ = gw.gene_refs(&[10], Some(2));
        let _ = gw.gene_homologs(&[10], "Homologene");
        let _ = gw.gene_types(true);
        let _ = gw.variant_gene_type();
        let _ = gw.insert_gene(10, "Ccr4", 7, 1, true);
        let _ = gw.attributions();
        let _ = gw.genesets(&[1]);
        let _ = gw.geneset_ids(&GenesetFilter::default());
        let _ = gw.geneset_values(&[1]);
        let _ = gw.geneset_text(&[1]);
        let _ = gw.geneset_pmids(&[1]);
        let _ = gw.genesets_by_project(&[1]);
        let _ = gw.geneset_annotations(&[1]);
        let _ = gw.group_by_name("GeneWeaver");
        let _ = gw.insert_geneset(&NewGeneset::new(1, 5, 1, "name", "abbr", "description", 7));
        let _ = gw.insert_geneset_values(&[value]);
        let _ = gw.insert_geneset_value(1, 10, 0.01, "Ccr4", 0.05);
        let _ = gw.insert_file("Ccr4\t0.01\n", "upload");
        let _ = gw.update_geneset_status(1, "normal");
        let _ = gw.update_geneset_dates(&[1]);
        let _ = gw.update_geneset_size(1, 10);
        let _ = gw.insert_jaccard(1, 2, 0.5);
        let _ = gw.delete_jaccard(1, 2);
        let _ = gw.ontologies();
        let _ = gw.ontology_ids_by_refs(&["GO:0006955"]);
        let _ = gw.ontology_terms(1);
        let _ = gw.insert_ontologydb_entry("Gene Ontology", "GO");
        let _ = gw.insert_ontology(&term);
        let _ = gw.insert_ontology_relation(1, 2, "is_a");
        let _ = gw.insert_geneset_ontology(1, 1, "GeneWeaver Primary Manual");
        let _ = gw.update_ontology_term_by_ref("GO:0006955", &OntologyTermUpdate::default());
        let _ = gw.delete_ontology_relations(&[1, 2]);
        let _ = gw.platforms();
        let _ = gw.platform_probes(1, &["1415670_at"]);
        let _ = gw.all_platform_probes(1);
        let _ = gw.probe_genes(&[1]);
        let _ = gw.insert_platform(&platform);
        let _ = gw.insert_probe("1415670_at", 1);
        let _ = gw.insert_probe2gene(1, 10);
        let _ = gw.publication("12345");
        let _ = gw.publications(&["12345"]);
        let _ = gw.publication_pmid(1);
        let _ = gw.insert_publication(&publication);
        let _ = gw.genome_builds();
        let _ = gw.genome_build_by_ref("hg38");
        let _ = gw.variant_types_by_effect("intron_variant");
        let _ = gw.variants_by_refs(&["rs123"], "hg38");
        let _ = gw.variant_odes_by_refs(&["rs123"], "hg38");
        let _ = gw.variant_refs_by_odes(&[77], "hg38");
        let _ = gw.roll_up_variants(&[77], &["Variant"]);
        let _ = gw.is_variant_set(&[1]);

        let statements = driver.statements();
        assert_eq!(statements.len(), 56);
        for statement in statements {
            let sql = statement.sql();
            if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, sql) {
                panic!("{}\n{}", e, sql);
            }
            let bound = (1..=statement.params().len()).all(|i| sql.contains(&format!("${}", i)));
            assert!(bound, "unbound parameter in\n{}", sql);
            assert!(!sql.contains('?') && !sql.contains(" :"), "placeholder left in\n{}", sql);
        }
    }
}
