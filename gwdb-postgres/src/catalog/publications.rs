use std::collections::HashMap;

use gwdb::{named_params, params, shape, sync::Driver, Error};

use super::{text_array, GeneWeaver};

/// A PubMed article to insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPublication {
    pub authors: String,
    pub title: String,
    pub abstract_text: String,
    pub journal: String,
    pub volume: String,
    pub pages: String,
    pub month: String,
    pub year: String,
    pub pubmed: String,
}

impl<D: Driver> GeneWeaver<D> {
    /// The publication ID for a PubMed ID. When the article was stored more than once the
    /// oldest entry is returned.
    pub fn publication(&self, pmid: &str) -> Result<Option<i64>, Error> {
        self.fetch_scalar(
            "SELECT   pub_id
             FROM     production.publication
             WHERE    pub_pubmed = ?
             ORDER BY pub_id
             LIMIT    1",
            params![pmid],
        )
    }

    /// PubMed ID → oldest publication ID. Unknown PubMed IDs are left out.
    pub fn publications<S: AsRef<str>>(&self, pmids: &[S]) -> Result<HashMap<String, i64>, Error> {
        let records = self.fetch_all(
            "SELECT   pub_pubmed, MIN(pub_id)
             FROM     production.publication
             WHERE    pub_pubmed = ANY(?)
             GROUP BY pub_pubmed",
            params![text_array(pmids)],
        )?;
        shape::biject(records)
    }

    pub fn publication_pmid(&self, pub_id: i64) -> Result<Option<String>, Error> {
        self.fetch_scalar(
            "SELECT pub_pubmed FROM production.publication WHERE pub_id = ?",
            params![pub_id],
        )
    }

    /// Inserts a publication and returns its `pub_id`.
    pub fn insert_publication(&self, publication: &NewPublication) -> Result<i64, Error> {
        self.insert_returning(
            "INSERT INTO production.publication (
                 pub_authors, pub_title, pub_abstract, pub_journal, pub_volume,
                 pub_pages, pub_month, pub_year, pub_pubmed
             ) VALUES (
                 :authors, :title, :abstract_text, :journal, :volume,
                 :pages, :month, :year, :pubmed
             )
             RETURNING pub_id",
            named_params! {
                authors: &publication.authors,
                title: &publication.title,
                abstract_text: &publication.abstract_text,
                journal: &publication.journal,
                volume: &publication.volume,
                pages: &publication.pages,
                month: &publication.month,
                year: &publication.year,
                pubmed: &publication.pubmed,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use gwdb::Value;

    use super::*;
    use crate::catalog::fake;
    use crate::testing::Reply;

    #[test]
    fn unknown_pubmed_id_is_none() {
        let (driver, gw) = fake();
        assert_eq!(gw.publication("00000000").unwrap(), None);
        assert_eq!(driver.statements()[0].params(), &[Value::from("00000000")]);
    }

    #[test]
    fn publications_map_pubmed_ids() {
        let (driver, gw) = fake();
        driver.on("GROUP BY pub_pubmed", |_| {
            Reply::rows(
                &["pub_pubmed", "min"],
                vec![vec!["21187435".into(), 4.into()]],
            )
        });

        let pubs = gw.publications(&["21187435", "00000000"]).unwrap();
        assert_eq!(pubs.len(), 1);
        assert_eq!(pubs["21187435"], 4);
    }

    #[test]
    fn insert_publication_binds_every_column() {
        let (driver, gw) = fake();
        driver.on("INSERT INTO production.publication", |_| {
            Reply::rows(&["pub_id"], vec![vec![12.into()]])
        });

        let publication = NewPublication {
            title: "GeneWeaver: data driven alignment of cross-species genomics".into(),
            year: "2016".into(),
            pubmed: "26656951".into(),
            ..NewPublication::default()
        };
        assert_eq!(gw.insert_publication(&publication).unwrap(), 12);

        let statement = &driver.statements()[0];
        assert_eq!(statement.params().len(), 9);
        assert_eq!(statement.params()[8], Value::from("26656951"));
    }
}
