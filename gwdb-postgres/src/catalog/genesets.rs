use std::collections::HashMap;

use chrono::NaiveDate;
use gwdb::{named_params, params, shape, sync::Driver, Error, Record};

use super::GeneWeaver;

/// Threshold type names and their `gs_threshold_type` IDs. They are not stored in the
/// database.
const THRESHOLD_TYPES: [(&str, i64); 5] = [
    ("P-value", 1),
    ("Q-value", 2),
    ("Binary", 3),
    ("Correlation", 4),
    ("Effect", 5),
];

const BINARY_THRESHOLD: i64 = 3;

/// Which gene sets [`GeneWeaver::geneset_ids`] returns. Deleted and deprecated sets are
/// always left out.
#[derive(Debug, Clone, PartialEq)]
pub struct GenesetFilter {
    /// Curation tiers (`cur_id`).
    pub tiers: Vec<i64>,
    pub attribution: Option<i64>,
    /// Only sets with fewer genes than this.
    pub max_size: Option<i64>,
    pub species: Option<i64>,
}

impl Default for GenesetFilter {
    fn default() -> Self {
        Self {
            tiers: vec![1, 2, 3, 4, 5],
            attribution: None,
            max_size: None,
            species: None,
        }
    }
}

/// A gene set to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGeneset {
    pub usr_id: i64,
    pub cur_id: i64,
    pub sp_id: i64,
    pub name: String,
    pub abbreviation: String,
    pub description: String,
    pub count: i64,
    pub gene_id_type: i64,
    pub file_id: i64,
    pub pub_id: Option<i64>,
    pub threshold_type: i64,
    pub threshold: String,
    pub groups: String,
    /// Defaults to the current date.
    pub created: Option<NaiveDate>,
    pub attribution: Option<i64>,
    pub uri: Option<String>,
}

impl NewGeneset {
    /// A private, binary-threshold set with no file or publication.
    pub fn new(
        usr_id: i64,
        cur_id: i64,
        sp_id: i64,
        name: impl Into<String>,
        abbreviation: impl Into<String>,
        description: impl Into<String>,
        gene_id_type: i64,
    ) -> Self {
        Self {
            usr_id,
            cur_id,
            sp_id,
            name: name.into(),
            abbreviation: abbreviation.into(),
            description: description.into(),
            count: 0,
            gene_id_type,
            file_id: 0,
            pub_id: None,
            threshold_type: BINARY_THRESHOLD,
            threshold: "1".to_string(),
            groups: "0".to_string(),
            created: None,
            attribution: None,
            uri: None,
        }
    }
}

/// One gene and its score within a gene set.
#[derive(Debug, Clone, PartialEq)]
pub struct GenesetValue {
    pub gs_id: i64,
    pub gene_id: i64,
    pub value: f64,
    /// The reference the gene was identified by in the uploaded file.
    pub name: String,
    pub in_threshold: bool,
}

impl<D: Driver> GeneWeaver<D> {
    /// Attribution abbreviation → attribution ID.
    pub fn attributions(&self) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all("SELECT at_abbrev, at_id FROM odestatic.attribution", ())?;
        shape::biject(records)
    }

    /// Threshold type name → threshold type ID.
    pub fn threshold_types(&self, lower: bool) -> HashMap<String, i64> {
        THRESHOLD_TYPES
            .iter()
            .map(|(name, id)| {
                let name = if lower {
                    name.to_lowercase()
                } else {
                    (*name).to_string()
                };
                (name, *id)
            })
            .collect()
    }

    /// Full `production.geneset` rows.
    pub fn genesets(&self, gs_ids: &[i64]) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT * FROM production.geneset WHERE gs_id = ANY(?)",
            params![gs_ids],
        )
    }

    pub fn geneset_ids(&self, filter: &GenesetFilter) -> Result<Vec<i64>, Error> {
        let records = self.fetch_all(
            "SELECT gs_id
             FROM   production.geneset
             WHERE  gs_status NOT LIKE 'de%' AND
                    cur_id = ANY(:tiers) AND
                    (:at_id::int IS NULL OR gs_attribution = :at_id) AND
                    (:size::int IS NULL OR gs_count < :size) AND
                    (:sp_id::int IS NULL OR sp_id = :sp_id)",
            named_params! {
                tiers: filter.tiers.as_slice(),
                at_id: filter.attribution,
                size: filter.max_size,
                sp_id: filter.species,
            },
        )?;
        shape::column(records, 0)
    }

    /// `{gs_id, ode_gene_id, gsv_value}` rows.
    pub fn geneset_values(&self, gs_ids: &[i64]) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT gs_id, ode_gene_id, gsv_value
             FROM   extsrc.geneset_value
             WHERE  gs_id = ANY(?)",
            params![gs_ids],
        )
    }

    /// `{gs_id, gs_name, gs_description, gs_abbreviation}` rows.
    pub fn geneset_text(&self, gs_ids: &[i64]) -> Result<Vec<Record>, Error> {
        self.fetch_all(
            "SELECT gs_id, gs_name, gs_description, gs_abbreviation
             FROM   production.geneset
             WHERE  gs_id = ANY(?)",
            params![gs_ids],
        )
    }

    /// Gene set ID → PubMed ID of its publication. Sets without one are left out.
    pub fn geneset_pmids(&self, gs_ids: &[i64]) -> Result<HashMap<i64, String>, Error> {
        let records = self.fetch_all(
            "SELECT     g.gs_id, p.pub_pubmed
             FROM       production.publication p
             INNER JOIN production.geneset g USING (pub_id)
             WHERE      g.gs_id = ANY(?) AND p.pub_pubmed IS NOT NULL",
            params![gs_ids],
        )?;
        shape::biject(records)
    }

    /// Project ID → gene set IDs (1:N).
    pub fn genesets_by_project(&self, pj_ids: &[i64]) -> Result<HashMap<i64, Vec<i64>>, Error> {
        let records = self.fetch_all(
            "SELECT pj_id, gs_id FROM production.project2geneset WHERE pj_id = ANY(?)",
            params![pj_ids],
        )?;
        shape::associate(records)
    }

    /// Gene set ID → `(ont_id, ont_ref_id)` of every annotation.
    pub fn geneset_annotations(
        &self,
        gs_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<(i64, String)>>, Error> {
        let records = self.fetch_all(
            "SELECT     go.gs_id, go.ont_id, o.ont_ref_id
             FROM       extsrc.geneset_ontology AS go
             INNER JOIN extsrc.ontology AS o USING (ont_id)
             WHERE      go.gs_id = ANY(?)",
            params![gs_ids],
        )?;

        let mut annotations: HashMap<i64, Vec<(i64, String)>> = HashMap::new();
        for record in records {
            annotations
                .entry(record.get(0)?)
                .or_default()
                .push((record.get(1)?, record.get(2)?));
        }
        Ok(annotations)
    }

    pub fn group_by_name(&self, name: &str) -> Result<Option<i64>, Error> {
        self.fetch_scalar(
            "SELECT grp_id FROM production.grp WHERE grp_name = ?",
            params![name],
        )
    }

    /// Inserts a gene set and returns its `gs_id`.
    pub fn insert_geneset(&self, gs: &NewGeneset) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO production.geneset (
                 usr_id, file_id, gs_name, gs_abbreviation, pub_id, cur_id, gs_description,
                 sp_id, gs_count, gs_threshold_type, gs_threshold, gs_groups,
                 gs_gene_id_type, gs_created, gs_attribution, gs_uri
             ) VALUES (
                 :usr_id, :file_id, :gs_name, :gs_abbreviation, :pub_id, :cur_id,
                 :gs_description, :sp_id, :gs_count, :gs_threshold_type, :gs_threshold,
                 :gs_groups, :gs_gene_id_type, COALESCE(:gs_created::date, CURRENT_DATE),
                 :gs_attribution, :gs_uri
             )
             RETURNING gs_id",
            named_params! {
                usr_id: gs.usr_id,
                file_id: gs.file_id,
                gs_name: &gs.name,
                gs_abbreviation: &gs.abbreviation,
                pub_id: gs.pub_id,
                cur_id: gs.cur_id,
                gs_description: &gs.description,
                sp_id: gs.sp_id,
                gs_count: gs.count,
                gs_threshold_type: gs.threshold_type,
                gs_threshold: &gs.threshold,
                gs_groups: &gs.groups,
                gs_gene_id_type: gs.gene_id_type,
                gs_created: gs.created,
                gs_attribution: gs.attribution,
                gs_uri: gs.uri.as_deref(),
            },
        )
    }

    /// Inserts every value with one statement and returns the number of rows written.
    ///
    /// The values travel as five parallel arrays, so the statement binds five parameters
    /// however many rows there are.
    pub fn insert_geneset_values(&self, values: &[GenesetValue]) -> Result<u64, Error> {
        if values.is_empty() {
            return Ok(0);
        }
        self.execute(
            "INSERT INTO extsrc.geneset_value (
                 gs_id, ode_gene_id, gsv_value, gsv_source_list, gsv_value_list,
                 gsv_in_threshold, gsv_hits, gsv_date
             )
             SELECT v.gs_id, v.ode_gene_id, v.gsv_value, ARRAY[v.src], ARRAY[v.gsv_value],
                    v.in_threshold, 0, NOW()
             FROM   UNNEST(?::bigint[], ?::bigint[], ?::float8[], ?::text[], ?::bool[])
                    AS v (gs_id, ode_gene_id, gsv_value, src, in_threshold)",
            params![
                values.iter().map(|v| v.gs_id).collect::<Vec<_>>(),
                values.iter().map(|v| v.gene_id).collect::<Vec<_>>(),
                values.iter().map(|v| v.value).collect::<Vec<_>>(),
                values.iter().map(|v| v.name.clone()).collect::<Vec<_>>(),
                values.iter().map(|v| v.in_threshold).collect::<Vec<_>>(),
            ],
        )
    }

    /// Inserts a single gene value and returns its `gs_id`. The gene is within the threshold
    /// when `value <= threshold`.
    pub fn insert_geneset_value(
        &self,
        gs_id: i64,
        gene_id: i64,
        value: f64,
        name: &str,
        threshold: f64,
    ) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO extsrc.geneset_value (
                 gs_id, ode_gene_id, gsv_value, gsv_source_list, gsv_value_list,
                 gsv_in_threshold, gsv_hits, gsv_date
             )
             VALUES (?, ?, ?, ?, ?, ?, 0, NOW())
             RETURNING gs_id",
            params![
                gs_id,
                gene_id,
                value,
                vec![name.to_string()],
                vec![value],
                value <= threshold,
            ],
        )
    }

    /// Stores a gene file and returns its `file_id`. The size is the byte length of
    /// `contents`.
    pub fn insert_file(&self, contents: &str, comments: &str) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO production.file (file_size, file_contents, file_comments, file_created)
             VALUES (?, ?, ?, NOW())
             RETURNING file_id",
            params![contents.len() as i64, contents, comments],
        )
    }

    /// Sets `gs_status`, usually to `normal`, `deleted` or `deprecated`.
    pub fn update_geneset_status(&self, gs_id: i64, status: &str) -> Result<u64, Error> {
        self.execute(
            "UPDATE production.geneset SET gs_status = ? WHERE gs_id = ?",
            params![status, gs_id],
        )
    }

    /// Marks the gene sets as updated now.
    pub fn update_geneset_dates(&self, gs_ids: &[i64]) -> Result<u64, Error> {
        self.execute(
            "UPDATE production.geneset SET gs_updated = NOW() WHERE gs_id = ANY(?)",
            params![gs_ids],
        )
    }

    pub fn update_geneset_size(&self, gs_id: i64, size: i64) -> Result<u64, Error> {
        self.execute(
            "UPDATE production.geneset SET gs_count = ? WHERE gs_id = ?",
            params![size, gs_id],
        )
    }

    /// Caches the Jaccard similarity of two gene sets. The smaller ID is always stored on
    /// the left.
    pub fn insert_jaccard(&self, left: i64, right: i64, jaccard: f64) -> Result<u64, Error> {
        let (left, right) = ordered(left, right);
        self.execute(
            "INSERT INTO extsrc.geneset_jaccard (gs_id_left, gs_id_right, jac_value)
             VALUES (?, ?, ?)",
            params![left, right, jaccard],
        )
    }

    pub fn delete_jaccard(&self, left: i64, right: i64) -> Result<u64, Error> {
        let (left, right) = ordered(left, right);
        self.execute(
            "DELETE FROM extsrc.geneset_jaccard WHERE gs_id_left = ? AND gs_id_right = ?",
            params![left, right],
        )
    }
}

fn ordered(left: i64, right: i64) -> (i64, i64) {
    if left <= right {
        (left, right)
    } else {
        (right, left)
    }
}
