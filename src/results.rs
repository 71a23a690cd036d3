use crate::types::{Candidate, Election, ResultRow, RowKey, WardTextField};
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

const WARD: &str = "Ward";
const PRECINCT: &str = "Precinct";
const VOTES_CAST: &str = "Votes Cast";

/// Election results keyed by ward or (ward, precinct).
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    candidates: Vec<Candidate>,
    rows: BTreeMap<RowKey, ResultRow>,
}

impl ResultTable {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        ResultTable { candidates, rows: BTreeMap::new() }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &RowKey) -> Option<&ResultRow> {
        self.rows.get(key)
    }

    /// Rows are unique per key; a later row replaces an earlier one.
    pub fn insert(&mut self, row: ResultRow) -> Result<()> {
        if row.votes.len() != self.candidates.len() {
            bail!(
                "Row for {} has {} counts, table has {} candidates",
                row.key,
                row.votes.len(),
                self.candidates.len()
            );
        }
        if let Some(old) = self.rows.insert(row.key, row) {
            warn!("Duplicate result row for {}", old.key);
        }
        Ok(())
    }

    pub fn votes(&self, key: &RowKey, candidate: Candidate) -> Option<u32> {
        let column = self.candidates.iter().position(|&c| c == candidate)?;
        self.rows.get(key).map(|row| row.votes[column])
    }

    /// Share of the votes cast that went to `candidate`. `None` when the row
    /// is absent, the candidate did not run, or no votes were cast.
    pub fn vote_fraction(&self, key: &RowKey, candidate: Candidate) -> Option<f64> {
        let votes = self.votes(key, candidate)?;
        let cast = self.rows.get(key)?.votes_cast;
        if cast == 0 {
            return None;
        }
        Some(votes as f64 / cast as f64)
    }

    pub fn read_csv_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
        Self::read_csv(file).with_context(|| format!("Failed to read results from {:?}", path))
    }

    /// Columns are found by header: `Ward`, optional `Precinct`,
    /// `Votes Cast` and canonical candidate names. Anything else is ignored.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().from_reader(reader);
        let headers = rdr.headers()?.clone();

        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let ward_idx = find(WARD).ok_or_else(|| anyhow!("Column '{}' not found in CSV", WARD))?;
        let cast_idx = find(VOTES_CAST)
            .ok_or_else(|| anyhow!("Column '{}' not found in CSV", VOTES_CAST))?;
        let precinct_idx = find(PRECINCT);

        let columns: Vec<(Candidate, usize)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| Some((Candidate::from_canonical(h.trim())?, i)))
            .collect();
        if columns.is_empty() {
            bail!("No candidate columns in CSV header");
        }

        let mut table = ResultTable::new(columns.iter().map(|&(c, _)| c).collect());

        for (line, result) in rdr.records().enumerate() {
            let record = result?;
            let cell = |idx: usize| -> Result<u32> {
                let raw = record.get(idx).unwrap_or("");
                parse_count(raw).with_context(|| {
                    format!("Bad value {:?} in column {} of data row {}", raw, idx, line + 1)
                })
            };

            let ward = cell(ward_idx)?;
            let key = match precinct_idx {
                Some(idx) => RowKey::precinct(ward, cell(idx)?),
                None => RowKey::ward(ward),
            };
            let votes = columns
                .iter()
                .map(|&(_, idx)| cell(idx))
                .collect::<Result<Vec<_>>>()?;
            table.insert(ResultRow { key, votes, votes_cast: cell(cast_idx)? })?;
        }

        Ok(table)
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create CSV file: {:?}", path))?;
        self.write_csv(file)
    }

    /// `Ward[,Precinct],<candidates...>,Votes Cast`
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let with_precinct = self.rows.keys().any(|k| k.precinct.is_some());
        let mut wtr = WriterBuilder::new().from_writer(writer);

        let mut header = vec![WARD.to_string()];
        if with_precinct {
            header.push(PRECINCT.to_string());
        }
        header.extend(self.candidates.iter().map(|c| c.canonical_name().to_string()));
        header.push(VOTES_CAST.to_string());
        wtr.write_record(&header)?;

        for row in self.rows.values() {
            let mut record = vec![row.key.ward.to_string()];
            if with_precinct {
                record.push(row.key.precinct.map(|p| p.to_string()).unwrap_or_default());
            }
            record.extend(row.votes.iter().map(|v| v.to_string()));
            record.push(row.votes_cast.to_string());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Counts may have been written as floats ("123.0") by earlier tooling.
fn parse_count(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return Ok(n);
    }
    let f: f64 = raw.parse().map_err(|_| anyhow!("not a number"))?;
    if f < 0.0 || f.fract() != 0.0 || f > u32::MAX as f64 {
        bail!("not a vote count");
    }
    Ok(f as u32)
}

pub fn load_ward_text_file(path: &Path, election: Election) -> Result<ResultTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open ward results: {:?}", path))?;
    load_ward_text(BufReader::new(file), election)
        .with_context(|| format!("Failed to read ward results from {:?}", path))
}

/// Read the Board of Elections ward report, where every table cell sits on
/// its own line and the columns repeat in a fixed cycle per ward. Blank
/// lines are skipped; a `Total` line ends the table.
pub fn load_ward_text<R: BufRead>(reader: R, election: Election) -> Result<ResultTable> {
    let fields = election.ward_text_fields();
    let candidates = election.candidates();
    let mut table = ResultTable::new(candidates.to_vec());

    let mut position = 0usize;
    let mut ward = 0u32;
    let mut votes_cast = 0u32;
    let mut votes = vec![0u32; candidates.len()];

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let value = line.trim();
        if value.is_empty() {
            continue;
        }
        if value == "Total" {
            break;
        }

        let field = fields[position % fields.len()];
        let number = || -> Result<u32> {
            value
                .replace(',', "")
                .parse()
                .with_context(|| format!("Line {}: expected a number, found {:?}", lineno + 1, value))
        };
        match field {
            WardTextField::Ward => ward = number()?,
            WardTextField::VotesCast => votes_cast = number()?,
            WardTextField::Votes(candidate) => {
                let column = candidates
                    .iter()
                    .position(|&c| c == candidate)
                    .ok_or_else(|| anyhow!("{} is not on the {} ballot", candidate, election.year()))?;
                votes[column] = number()?;
            }
            WardTextField::Percent => {}
        }

        position += 1;
        if position % fields.len() == 0 {
            table.insert(ResultRow {
                key: RowKey::ward(ward),
                votes: std::mem::replace(&mut votes, vec![0; candidates.len()]),
                votes_cast,
            })?;
        }
    }

    if position % fields.len() != 0 {
        warn!(
            "Ward report ended mid-row ({} of {} fields); partial row dropped",
            position % fields.len(),
            fields.len()
        );
    }
    debug!("Read {} ward rows for {}", table.len(), election.year());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ward_report(wards: &[(u32, u32, [u32; 5])]) -> String {
        let mut out = String::from("\n");
        for (ward, cast, counts) in wards {
            out.push_str(&format!("{}\n{}\n\n", ward, cast));
            for c in counts {
                out.push_str(&format!("{}\n{:.2}%\n", c, *c as f64 / *cast as f64 * 100.0));
            }
        }
        out.push_str("Total\n99999\n");
        out
    }

    #[test]
    fn ward_text_reads_three_wards() {
        let text = ward_report(&[
            (1, 100, [40, 10, 5, 40, 5]),
            (2, 200, [120, 20, 10, 45, 5]),
            (3, 50, [10, 10, 10, 10, 10]),
        ]);
        let table = load_ward_text(Cursor::new(text), Election::Mayor2015).unwrap();
        assert_eq!(table.len(), 3);
        let w2 = RowKey::ward(2);
        assert_eq!(table.votes(&w2, Candidate::RahmEmanuel), Some(120));
        assert_eq!(table.votes(&w2, Candidate::ChuyGarcia), Some(45));
        assert_eq!(table.get(&w2).unwrap().votes_cast, 200);
        assert_eq!(table.votes(&RowKey::ward(3), Candidate::WilliamWalls), Some(10));
    }

    #[test]
    fn ward_text_stops_at_total() {
        let text = "1\n10\n5\n50%\n1\n10%\n1\n10%\n2\n20%\n1\n10%\nTotal\nnot a number\n";
        let table = load_ward_text(Cursor::new(text), Election::Mayor2015).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn ward_text_rejects_garbage_counts() {
        let text = "1\nten\n";
        assert!(load_ward_text(Cursor::new(text), Election::Mayor2015).is_err());
    }

    #[test]
    fn fraction_of_votes_cast() {
        let mut table = ResultTable::new(vec![Candidate::RahmEmanuel, Candidate::ChuyGarcia]);
        table
            .insert(ResultRow { key: RowKey::precinct(4, 12), votes: vec![40, 60], votes_cast: 100 })
            .unwrap();
        table
            .insert(ResultRow { key: RowKey::precinct(4, 13), votes: vec![0, 0], votes_cast: 0 })
            .unwrap();

        let f = table.vote_fraction(&RowKey::precinct(4, 12), Candidate::RahmEmanuel).unwrap();
        assert!((f - 0.4).abs() < 1e-12);
        assert_eq!(table.vote_fraction(&RowKey::precinct(9, 1), Candidate::RahmEmanuel), None);
        assert_eq!(table.vote_fraction(&RowKey::precinct(4, 12), Candidate::WillieWilson), None);
        assert_eq!(table.vote_fraction(&RowKey::precinct(4, 13), Candidate::ChuyGarcia), None);
    }

    #[test]
    fn insert_checks_column_count() {
        let mut table = ResultTable::new(vec![Candidate::RahmEmanuel]);
        let row = ResultRow { key: RowKey::ward(1), votes: vec![1, 2], votes_cast: 3 };
        assert!(table.insert(row).is_err());
    }

    #[test]
    fn csv_reads_pandas_style_export() {
        let csv = "\
,Ward,Precinct,RAHM EMANUEL,WILLIE WILSON,ROBERT W. FIORETTI,\"JESUS \"\"CHUY\"\" GARCIA\",WILLIAM WALLS III,Votes Cast
0,1.0,1.0,150.0,20.0,10.0,200.0,5.0,235.0
1,1,2,100,10,10,75,5,200
";
        let table = ResultTable::read_csv(Cursor::new(csv)).unwrap();
        assert_eq!(table.candidates().len(), 5);
        assert_eq!(table.len(), 2);
        assert_eq!(table.votes(&RowKey::precinct(1, 1), Candidate::ChuyGarcia), Some(200));
        assert_eq!(table.get(&RowKey::precinct(1, 2)).unwrap().votes_cast, 200);
    }

    #[test]
    fn csv_written_table_reads_back() {
        let mut table = ResultTable::new(Election::Mayor2015.candidates().to_vec());
        table
            .insert(ResultRow { key: RowKey::precinct(7, 3), votes: vec![1, 2, 3, 4, 5], votes_cast: 15 })
            .unwrap();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Ward,Precinct,RAHM EMANUEL"));
        assert_eq!(ResultTable::read_csv(Cursor::new(buf)).unwrap(), table);
    }

    #[test]
    fn csv_without_candidates_is_an_error() {
        let csv = "Ward,Votes Cast\n1,10\n";
        assert!(ResultTable::read_csv(Cursor::new(csv)).is_err());
    }
}
