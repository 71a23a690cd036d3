use crate::types::Candidate;
use tracing::warn;

/// Candidate picked when nothing in the input matches.
pub const FALLBACK: Candidate = Candidate::RahmEmanuel;

// Checked in order, first containment wins.
const ALIASES: &[(&str, Candidate)] = &[
    ("rahm", Candidate::RahmEmanuel),
    ("emanuel", Candidate::RahmEmanuel),
    ("fioretti", Candidate::RobertFioretti),
    ("chuy", Candidate::ChuyGarcia),
    ("garcia", Candidate::ChuyGarcia),
    ("walls", Candidate::WilliamWalls),
    ("wilson", Candidate::WillieWilson),
    ("del valle", Candidate::MiguelDelValle),
    ("braun", Candidate::CarolMoseleyBraun),
    ("moseley", Candidate::CarolMoseleyBraun),
    ("chico", Candidate::GeryChico),
    ("watkins", Candidate::PatriciaVanPeltWatkins),
    ("van pelt", Candidate::PatriciaVanPeltWatkins),
];

/// Resolve a free-text candidate reference ("chuy", " Fioretti ", ...) to a
/// canonical candidate. Unknown input falls back to [`FALLBACK`].
pub fn normalize(input: &str) -> Candidate {
    match lookup(input) {
        Some(candidate) => candidate,
        None => {
            warn!("No valid candidate name in {:?}. Defaulting to {}.", input, FALLBACK);
            FALLBACK
        }
    }
}

pub fn lookup(input: &str) -> Option<Candidate> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    ALIASES
        .iter()
        .find(|(alias, _)| needle.contains(alias))
        .map(|&(_, candidate)| candidate)
}
