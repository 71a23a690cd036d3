use clap::ValueEnum;
use std::collections::BTreeMap;
use std::fmt;

/// Mayoral candidates appearing in the 2011 and 2015 Board of Elections results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Candidate {
    RahmEmanuel,
    WillieWilson,
    RobertFioretti,
    ChuyGarcia,
    WilliamWalls,
    MiguelDelValle,
    CarolMoseleyBraun,
    GeryChico,
    PatriciaVanPeltWatkins,
}

impl Candidate {
    pub const ALL: [Candidate; 9] = [
        Candidate::RahmEmanuel,
        Candidate::WillieWilson,
        Candidate::RobertFioretti,
        Candidate::ChuyGarcia,
        Candidate::WilliamWalls,
        Candidate::MiguelDelValle,
        Candidate::CarolMoseleyBraun,
        Candidate::GeryChico,
        Candidate::PatriciaVanPeltWatkins,
    ];

    /// Name as printed in the result tables. Column lookups match it exactly.
    pub fn canonical_name(self) -> &'static str {
        match self {
            Candidate::RahmEmanuel => "RAHM EMANUEL",
            Candidate::WillieWilson => "WILLIE WILSON",
            Candidate::RobertFioretti => "ROBERT W. FIORETTI",
            Candidate::ChuyGarcia => "JESUS \"CHUY\" GARCIA",
            Candidate::WilliamWalls => "WILLIAM WALLS III",
            Candidate::MiguelDelValle => "MIGUEL DEL VALLE",
            Candidate::CarolMoseleyBraun => "CAROL MOSELEY BRAUN",
            Candidate::GeryChico => "GERY J. CHICO",
            Candidate::PatriciaVanPeltWatkins => "PATRICIA VAN PELT WATKINS",
        }
    }

    pub fn from_canonical(name: &str) -> Option<Candidate> {
        Candidate::ALL
            .into_iter()
            .find(|c| c.canonical_name() == name)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Election {
    #[value(name = "2011")]
    Mayor2011,
    #[value(name = "2015")]
    Mayor2015,
}

/// One field of the line-per-value Board of Elections ward report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WardTextField {
    Ward,
    VotesCast,
    Votes(Candidate),
    Percent,
}

impl Election {
    pub fn candidates(self) -> &'static [Candidate] {
        match self {
            Election::Mayor2011 => &[
                Candidate::RahmEmanuel,
                Candidate::MiguelDelValle,
                Candidate::CarolMoseleyBraun,
                Candidate::GeryChico,
                Candidate::PatriciaVanPeltWatkins,
                Candidate::WilliamWalls,
            ],
            Election::Mayor2015 => &[
                Candidate::RahmEmanuel,
                Candidate::WillieWilson,
                Candidate::RobertFioretti,
                Candidate::ChuyGarcia,
                Candidate::WilliamWalls,
            ],
        }
    }

    /// Field cycle of the ward report: ward, votes cast, then a
    /// (votes, percent) pair per candidate.
    pub fn ward_text_fields(self) -> Vec<WardTextField> {
        let mut fields = vec![WardTextField::Ward, WardTextField::VotesCast];
        for &candidate in self.candidates() {
            fields.push(WardTextField::Votes(candidate));
            fields.push(WardTextField::Percent);
        }
        fields
    }

    pub fn year(self) -> u16 {
        match self {
            Election::Mayor2011 => 2011,
            Election::Mayor2015 => 2015,
        }
    }
}

/// Geography a result row (and a shape) is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geography {
    Ward,
    Precinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub ward: u32,
    pub precinct: Option<u32>,
}

impl RowKey {
    pub fn ward(ward: u32) -> Self {
        RowKey { ward, precinct: None }
    }

    pub fn precinct(ward: u32, precinct: u32) -> Self {
        RowKey { ward, precinct: Some(precinct) }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precinct {
            Some(p) => write!(f, "ward {}, precinct {}", self.ward, p),
            None => write!(f, "ward {}", self.ward),
        }
    }
}

/// Vote counts for one ward or precinct. `votes` is aligned with the
/// candidate list of the table holding the row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub key: RowKey,
    pub votes: Vec<u32>,
    pub votes_cast: u32,
}

/// One attribute cell of a shapefile record or GeoJSON feature.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Null,
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Number(n) => write!(f, "{}", n),
            AttrValue::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn insert(&mut self, name: impl Into<String>, value: AttrValue) {
        self.0.insert(name.into(), value);
    }

    /// Exact field name first, then a case-insensitive match (`ward` vs `WARD`).
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    /// Whole, non-negative numbers only; "OUT" and the like give `None`.
    pub fn get_u32(&self, name: &str) -> Option<u32> {
        let n = match self.get(name)? {
            AttrValue::Number(n) => *n,
            AttrValue::Text(s) => s.trim().parse::<f64>().ok()?,
            AttrValue::Null => return None,
        };
        if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
            Some(n as u32)
        } else {
            None
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(s) => s.trim().parse().ok(),
            AttrValue::Null => None,
        }
    }

    pub fn get_text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            AttrValue::Null => None,
            v => Some(v.to_string()),
        }
    }
}

impl FromIterator<(String, AttrValue)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Attributes(iter.into_iter().collect())
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_resolve_back() {
        for c in Candidate::ALL {
            assert_eq!(Candidate::from_canonical(c.canonical_name()), Some(c));
        }
        assert_eq!(Candidate::from_canonical("rahm emanuel"), None);
    }

    #[test]
    fn attribute_numbers_from_text_and_numeric_fields() {
        let attrs: Attributes = [
            ("WARD".to_string(), AttrValue::Text(" 12 ".into())),
            ("precinct".to_string(), AttrValue::Number(7.0)),
            ("ALDERMAN".to_string(), AttrValue::Text("OUT".into())),
            ("share".to_string(), AttrValue::Number(0.5)),
        ]
        .into_iter()
        .collect();
        assert_eq!(attrs.get_u32("ward"), Some(12));
        assert_eq!(attrs.get_u32("PRECINCT"), Some(7));
        assert_eq!(attrs.get_u32("alderman"), None);
        assert_eq!(attrs.get_u32("share"), None);
        assert_eq!(attrs.get_f64("share"), Some(0.5));
        assert_eq!(attrs.get_u32("missing"), None);
    }

    #[test]
    fn ward_text_cycle_lengths() {
        assert_eq!(Election::Mayor2015.ward_text_fields().len(), 12);
        assert_eq!(Election::Mayor2011.ward_text_fields().len(), 14);
        let fields = Election::Mayor2015.ward_text_fields();
        assert_eq!(fields[2], WardTextField::Votes(Candidate::RahmEmanuel));
        assert_eq!(fields[8], WardTextField::Votes(Candidate::ChuyGarcia));
    }
}
