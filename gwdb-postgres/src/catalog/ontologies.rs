use std::collections::HashMap;

use gwdb::{named_params, params, shape, sync::Driver, Error, Record};

use super::{text_array, GeneWeaver};

/// An ontology term to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOntologyTerm {
    /// External reference, e.g. `GO:0006955`.
    pub ref_id: String,
    pub name: String,
    pub description: String,
    pub children: i64,
    pub parents: i64,
    pub ontdb_id: i64,
}

/// Fields to change on an existing term. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OntologyTermUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub children: Option<i64>,
    pub parents: Option<i64>,
}

impl<D: Driver> GeneWeaver<D> {
    /// `{ontdb_id, ontdb_name, ontdb_prefix, ontdb_linkout_url, ontdb_date}` for every
    /// ontology gene sets can be annotated with.
    pub fn ontologies(&self) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT ontdb_id, ontdb_name, ontdb_prefix, ontdb_linkout_url, ontdb_date
             FROM   odestatic.ontologydb",
            (),
        )
    }

    /// External term reference → `ont_id`.
    pub fn ontology_ids_by_refs<S: AsRef<str>>(
        &self,
        refs: &[S],
    ) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT ont_ref_id, ont_id FROM extsrc.ontology WHERE ont_ref_id = ANY(?)",
            params![text_array(refs)],
        )?;
        shape::biject(records)
    }

    /// Every term of one ontology, as full `extsrc.ontology` rows.
    pub fn ontology_terms(&self, ontdb_id: i64) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT * FROM extsrc.ontology WHERE ontdb_id = ?",
            params![ontdb_id],
        )
    }

    /// Registers an ontology, e.g. `("Gene Ontology", "GO")`, and returns its `ontdb_id`.
    pub fn insert_ontologydb_entry(&self, name: &str, prefix: &str) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO odestatic.ontologydb (ontdb_name, ontdb_prefix, ontdb_date)
             VALUES (?, ?, NOW())
             RETURNING ontdb_id",
            params![name, prefix],
        )
    }

    /// Inserts a term and returns its `ont_id`.
    pub fn insert_ontology(&self, term: &NewOntologyTerm) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO extsrc.ontology (
                 ont_ref_id, ont_name, ont_description, ont_children, ont_parents, ontdb_id
             ) VALUES (?, ?, ?, ?, ?, ?)
             RETURNING ont_id",
            params![
                &term.ref_id,
                &term.name,
                &term.description,
                term.children,
                term.parents,
                term.ontdb_id
            ],
        )
    }

    /// Relates a child term (`left`) to its parent (`right`), e.g. with `is_a` or
    /// `part_of`.
    pub fn insert_ontology_relation(
        &self,
        left: i64,
        right: i64,
        relation: &str,
    ) -> Result<u64, Error> {
        self.execute(
            "INSERT INTO extsrc.ontology_relation (left_ont_id, right_ont_id, or_type)
             VALUES (?, ?, ?)",
            params![left, right, relation],
        )
    }

    /// Annotates a gene set with a term. `ref_type` records how the annotation was made,
    /// e.g. `GeneWeaver Primary Manual`.
    pub fn insert_geneset_ontology(
        &self,
        gs_id: i64,
        ont_id: i64,
        ref_type: &str,
    ) -> Result<u64, Error> {
        self.execute(
            "INSERT INTO extsrc.geneset_ontology (gs_id, ont_id, gso_ref_type) VALUES (?, ?, ?)",
            params![gs_id, ont_id, ref_type],
        )
    }

    /// Updates the term with the given external reference and returns its `ont_id`, or
    /// `None` when no term has that reference.
    pub fn update_ontology_term_by_ref(
        &self,
        ref_id: &str,
        update: &OntologyTermUpdate,
    ) -> Result<Option<i64>, Error> {
        self.fetch_scalar(
            "UPDATE    extsrc.ontology
             SET       ont_name = COALESCE(:name::text, ont_name),
                       ont_description = COALESCE(:description::text, ont_description),
                       ont_children = COALESCE(:children::int, ont_children),
                       ont_parents = COALESCE(:parents::int, ont_parents)
             WHERE     ont_ref_id = :ref_id
             RETURNING ont_id",
            named_params! {
                name: update.name.as_deref(),
                description: update.description.as_deref(),
                children: update.children,
                parents: update.parents,
                ref_id: ref_id,
            },
        )
    }

    /// Deletes every relation either side of which is one of `ont_ids`.
    pub fn delete_ontology_relations(&self, ont_ids: &[i64]) -> Result<u64, Error> {
        self.execute(
            "DELETE FROM extsrc.ontology_relation
             WHERE  left_ont_id = ANY(:ids) OR right_ont_id = ANY(:ids)",
            named_params! { ids: ont_ids },
        )
    }
}
