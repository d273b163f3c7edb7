use super::ids::ResidueId;
use super::properties::Value;
use nalgebra::{Point3, Vector3};

/// Represents an atom in a molecular model together with its dual-state data.
///
/// Fixed attributes live in plain fields. Extra properties declared on the
/// owning [`MolecularSystem`](super::system::MolecularSystem) are stored in
/// `props`, in the column order of the system's atom property schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// The name of the atom (e.g., "C1", "OW").
    pub name: String,
    /// The ID of the parent residue this atom belongs to.
    pub residue_id: ResidueId,
    /// The 3D coordinates of the atom in Angstroms.
    pub position: Point3<f64>,
    /// The velocity of the atom.
    pub velocity: Vector3<f64>,
    /// The atomic mass in amu.
    pub mass: f64,
    /// The atomic number (0 for virtual sites and pseudo atoms).
    pub atomic_number: u32,
    /// The integer formal charge.
    pub formal_charge: i32,
    /// The partial charge of the primary state, in elementary charge units.
    pub charge: f64,
    /// The partial charge of the second state; meaningful only when `alchemical`.
    pub charge_b: f64,
    /// Whether the atom takes part in an alchemical transformation.
    pub alchemical: bool,
    /// Global index assigned when a model is finalized.
    pub gid: usize,
    pub(crate) props: Vec<Value>,
}

impl Atom {
    /// Creates a new `Atom` with zeroed physical attributes.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the atom.
    /// * `residue_id` - The ID of the residue this atom belongs to.
    /// * `position` - The 3D coordinates of the atom.
    pub fn new(name: &str, residue_id: ResidueId, position: Point3<f64>) -> Self {
        Self {
            name: name.to_string(),
            residue_id,
            position,
            velocity: Vector3::zeros(),
            mass: 0.0,
            atomic_number: 0,
            formal_charge: 0,
            charge: 0.0,
            charge_b: 0.0,
            alchemical: false,
            gid: 0,
            props: Vec::new(),
        }
    }

    /// Extra property values in schema column order.
    pub fn props(&self) -> &[Value] {
        &self.props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::ResidueId;
    use nalgebra::Point3;

    #[test]
    fn new_atom_has_expected_default_fields() {
        let residue_id = ResidueId::default();
        let atom = Atom::new("C1", residue_id, Point3::new(1.0, 2.0, 3.0));

        assert_eq!(atom.name, "C1");
        assert_eq!(atom.residue_id, residue_id);
        assert_eq!(atom.position, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(atom.velocity, Vector3::zeros());
        assert_eq!(atom.mass, 0.0);
        assert_eq!(atom.atomic_number, 0);
        assert_eq!(atom.charge, 0.0);
        assert_eq!(atom.charge_b, 0.0);
        assert!(!atom.alchemical);
        assert!(atom.props().is_empty());
    }

    #[test]
    fn atom_equality_and_clone_works() {
        let residue_id = ResidueId::default();
        let mut atom1 = Atom::new("O", residue_id, Point3::new(0.0, 0.0, 0.0));
        atom1.alchemical = true;
        atom1.charge_b = -0.8;
        let atom2 = atom1.clone();
        assert_eq!(atom1, atom2);
    }
}
