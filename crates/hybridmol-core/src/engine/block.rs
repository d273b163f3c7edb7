use super::error::EngineError;
use super::mapping::{AtomMapping, AtomPair};
use crate::core::forcefield::term_table::TermTable;
use crate::core::models::ids::TermId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Puts a 2-, 3- or 4-atom tuple in canonical orientation.
///
/// The two key atoms are the pair itself, the ends of an angle, or the middle
/// bond of a dihedral. The tuple is reversed when the first key atom is
/// greater than the second, so both orientations of one interaction produce
/// the same key.
pub fn canonicalize(atoms: &[usize]) -> Result<Vec<usize>, EngineError> {
    let (first, second) = match atoms {
        [a, b] => (a, b),
        [a, _, c] => (a, c),
        [_, b, c, _] => (b, c),
        _ => return Err(EngineError::UnsupportedArity(atoms.len())),
    };
    let mut key = atoms.to_vec();
    if first > second {
        key.reverse();
    }
    Ok(key)
}

/// What one end state has for an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The interaction cannot exist: every atom is absent from this state.
    Absent,
    /// The atoms exist in this state but carry no such term.
    Missing,
    /// The term carrying the interaction in this state.
    Term(TermId),
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Absent => write!(f, "absent"),
            Marker::Missing => write!(f, "missing"),
            Marker::Term(id) => write!(f, "term {:?}", id),
        }
    }
}

/// One interaction of the merged table: what each end state has for it, and
/// its atoms as hybrid positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub a: Marker,
    pub b: Marker,
    pub atoms: Vec<usize>,
}

/// How an interaction changes between the end states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Only A has it, and its atoms do not exist in B: left as is.
    OnlyA(TermId),
    /// A has it and B's atoms do not interact this way: it vanishes in B.
    VanishB(TermId),
    /// Only B has it, and its atoms do not exist in A: it appears from dummies.
    AppearFromDummy(TermId),
    /// Only B has it, across atoms that exist in A.
    OnlyB(TermId),
    /// Both states have it: the A term morphs into the B term.
    Morph { a: TermId, b: TermId },
}

impl Transition {
    pub fn classify(table: &str, a: Marker, b: Marker) -> Result<Self, EngineError> {
        match (a, b) {
            (Marker::Term(ta), Marker::Absent) => Ok(Transition::OnlyA(ta)),
            (Marker::Term(ta), Marker::Missing) => Ok(Transition::VanishB(ta)),
            (Marker::Absent, Marker::Term(tb)) => Ok(Transition::AppearFromDummy(tb)),
            (Marker::Missing, Marker::Term(tb)) => Ok(Transition::OnlyB(tb)),
            (Marker::Term(ta), Marker::Term(tb)) => Ok(Transition::Morph { a: ta, b: tb }),
            _ => Err(EngineError::UnsupportedTransition {
                table: table.to_string(),
                a,
                b,
            }),
        }
    }
}

/// Matches the terms of a bonded hybrid table against the same table of B by
/// canonical key.
///
/// `a_table` lives in `mapping.system` and `b_table` in `mapping.b_system`.
/// Repeated B keys are consumed first in, first out. B terms left unmatched
/// follow the A entries in B's order. A side with no matching term is marked
/// [`Marker::Absent`] when every atom of the entry is absent from that state.
pub fn build_term_block(
    a_table: Option<&TermTable>,
    b_table: Option<&TermTable>,
    mapping: &AtomMapping,
) -> Result<Vec<BlockEntry>, EngineError> {
    let mut block = match_terms(a_table, b_table, mapping, canonicalize, Marker::Missing)?;
    for entry in &mut block {
        downgrade(entry, &mapping.pairs);
    }
    Ok(block)
}

/// Matches explicit pair terms by sorted atom pair. Unmatched sides stay
/// [`Marker::Missing`].
pub fn build_pair_block(
    a_table: Option<&TermTable>,
    b_table: Option<&TermTable>,
    mapping: &AtomMapping,
) -> Result<Vec<BlockEntry>, EngineError> {
    match_terms(a_table, b_table, mapping, sorted_key, Marker::Missing)
}

/// Matches exclusions by sorted atom pair. Unmatched sides are
/// [`Marker::Absent`]: the state does not exclude that pair.
pub fn build_exclusion_block(
    a_table: Option<&TermTable>,
    b_table: Option<&TermTable>,
    mapping: &AtomMapping,
) -> Result<Vec<BlockEntry>, EngineError> {
    match_terms(a_table, b_table, mapping, sorted_key, Marker::Absent)
}

fn sorted_key(atoms: &[usize]) -> Result<Vec<usize>, EngineError> {
    let mut key = atoms.to_vec();
    key.sort_unstable();
    Ok(key)
}

fn match_terms(
    a_table: Option<&TermTable>,
    b_table: Option<&TermTable>,
    mapping: &AtomMapping,
    key_of: fn(&[usize]) -> Result<Vec<usize>, EngineError>,
    unmatched: Marker,
) -> Result<Vec<BlockEntry>, EngineError> {
    let mut lookup: HashMap<Vec<usize>, VecDeque<TermId>> = HashMap::new();
    let mut b_keys = Vec::new();
    if let Some(b_table) = b_table {
        for (id, term) in b_table.terms_iter() {
            let key = key_of(&mapping.b_positions_of(term.atoms())?)?;
            lookup.entry(key.clone()).or_default().push_back(id);
            b_keys.push((id, key));
        }
    }

    let mut consumed = HashSet::new();
    let mut block = Vec::new();
    if let Some(a_table) = a_table {
        for (id, term) in a_table.terms_iter() {
            let key = key_of(&mapping.positions_of(term.atoms())?)?;
            let b = match lookup.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(b_id) => {
                    consumed.insert(b_id);
                    Marker::Term(b_id)
                }
                None => unmatched,
            };
            block.push(BlockEntry {
                a: Marker::Term(id),
                b,
                atoms: key,
            });
        }
    }

    let mut leftover: Vec<_> = b_keys
        .into_iter()
        .filter(|(id, _)| !consumed.contains(id))
        .collect();
    leftover.sort_by(|x, y| x.1.cmp(&y.1));
    block.extend(
        leftover
            .into_iter()
            .map(|(id, key)| BlockEntry {
                a: unmatched,
                b: Marker::Term(id),
                atoms: key,
            }),
    );
    Ok(block)
}

fn downgrade(entry: &mut BlockEntry, pairs: &[AtomPair]) {
    let all = |absent: fn(&AtomPair) -> bool| entry.atoms.iter().all(|&p| absent(&pairs[p]));
    if entry.b == Marker::Missing && all(AtomPair::is_dummy_in_b) {
        entry.b = Marker::Absent;
    } else if entry.a == Marker::Missing && all(AtomPair::is_dummy_in_a) {
        entry.a = Marker::Absent;
    }
}
