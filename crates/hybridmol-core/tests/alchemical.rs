mod common;

use common::{LigandBuilder, assert_model_refcounts_exact, assert_refcounts_exact};
use hybridmol::core::forcefield::params::{ParamTable, ParamTableRef};
use hybridmol::core::forcefield::term_table::TermState;
use hybridmol::core::models::properties::ValueType;
use hybridmol::engine::config::MergeConfig;
use hybridmol::engine::error::EngineError;
use hybridmol::engine::mapping::AtomCorrespondence;
use hybridmol::engine::progress::ProgressReporter;
use hybridmol::workflows::alchemical::{make_alchemical, run};
use std::fs;
use tempfile::tempdir;

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() <= 1e-12 * b.abs().max(1.0), "{} != {}", a, b);
}

#[test]
fn self_merge_carries_identical_states_and_synthesizes_nothing() {
    let a = LigandBuilder::new()
        .atoms(4)
        .stretch(0, 1, 1.5, 300.0)
        .stretch(1, 2, 1.4, 320.0)
        .stretch(2, 3, 1.1, 340.0)
        .exclusion(0, 1)
        .exclusion(1, 2)
        .constraint(&[2, 3], &[1.1])
        .build();
    let outcome = make_alchemical(&a, &a, &AtomCorrespondence::identity(4)).unwrap();

    let summary = &outcome.summary;
    assert_eq!(summary.exclusions.synthesized_pairs, 0);
    assert_eq!(summary.exclusions.added_exclusions, 0);
    assert_eq!(summary.exclusions.cutoff_exclusions, 0);
    assert_eq!(summary.tables["stretch_harm"].morph, 3);
    assert_eq!(summary.constraints.merged, 1);

    for name in ["stretch_harm", "nonbonded"] {
        let table = outcome.system.table(name).unwrap();
        for (id, _) in table.terms_iter() {
            for column in ["r0", "fc", "sigma", "epsilon"] {
                if let Ok(primary) = table.prop_f64(id, column, TermState::A) {
                    assert_eq!(table.prop_f64(id, column, TermState::B).unwrap(), primary);
                }
            }
        }
    }
    assert_eq!(outcome.system.table("exclusion").unwrap().term_count(), 2);
    assert_eq!(outcome.system.table("constraint_ah1").unwrap().term_count(), 1);
    assert_model_refcounts_exact(&outcome.system);
}

#[test]
fn stretch_absent_in_b_keeps_r0_and_zeroes_fc() {
    let a = LigandBuilder::new().atoms(2).stretch(0, 1, 1.5, 300.0).build();
    let b = LigandBuilder::new().atoms(2).build();
    let outcome = make_alchemical(&a, &b, &AtomCorrespondence::identity(2)).unwrap();

    let ids = outcome.system.atom_ids();
    let table = outcome.system.table("stretch_harm").unwrap();
    let term = table.find_exact(&[ids[0], ids[1]])[0];
    assert_eq!(table.prop_f64(term, "r0", TermState::A).unwrap(), 1.5);
    assert_eq!(table.prop_f64(term, "fc", TermState::A).unwrap(), 300.0);
    assert_eq!(table.prop_f64(term, "r0", TermState::B).unwrap(), 1.5);
    assert_eq!(table.prop_f64(term, "fc", TermState::B).unwrap(), 0.0);
}

#[test]
fn atom_only_in_b_appears_with_zero_charge_in_a() {
    let a = LigandBuilder::new().atoms(2).stretch(0, 1, 1.5, 300.0).build();
    let b = LigandBuilder::new()
        .atoms(5)
        .atom(5.0, -0.65, 0.32, 0.2)
        .stretch(0, 1, 1.5, 300.0)
        .stretch(1, 5, 1.2, 410.0)
        .build();
    let corr = AtomCorrespondence::from_raw(&[(0, 0), (1, 1), (-1, 5)]).unwrap();
    let outcome = make_alchemical(&a, &b, &corr).unwrap();

    assert_eq!(outcome.system.atom_count(), 3);
    assert_eq!(outcome.summary.dummy_atoms, 1);
    let ids = outcome.system.atom_ids();
    let dummy = outcome.system.atom(ids[2]).unwrap();
    assert!(dummy.alchemical);
    assert_eq!(dummy.charge, 0.0);
    assert_eq!(dummy.charge_b, -0.65);

    let nb = outcome.system.table("nonbonded").unwrap();
    let term = nb.find_exact(&[ids[2]])[0];
    assert_eq!(nb.prop_f64(term, "sigma", TermState::A).unwrap(), 0.0);
    assert_eq!(nb.prop_f64(term, "sigma", TermState::B).unwrap(), 0.32);

    let stretch = outcome.system.table("stretch_harm").unwrap();
    let appeared = stretch.find_exact(&[ids[1], ids[2]])[0];
    assert_eq!(stretch.prop_f64(appeared, "fc", TermState::A).unwrap(), 0.0);
    assert_eq!(stretch.prop_f64(appeared, "fc", TermState::B).unwrap(), 410.0);
    assert_eq!(outcome.summary.b_bonds, 1);
    assert_model_refcounts_exact(&outcome.system);
}

#[test]
fn exclusion_lost_in_b_becomes_a_geometric_pair() {
    let a = LigandBuilder::new()
        .atoms(2)
        .atom(2.0, 0.2, 0.3, 0.1)
        .atom(3.0, -0.2, 0.35, 0.12)
        .exclusion(2, 3)
        .build();
    let b = LigandBuilder::new()
        .atoms(2)
        .atom(2.0, 0.3, 0.3, 0.1)
        .atom(3.0, -0.1, 0.35, 0.12)
        .build();
    let outcome = make_alchemical(&a, &b, &AtomCorrespondence::identity(4)).unwrap();

    assert_eq!(outcome.summary.exclusions.synthesized_pairs, 1);
    let ids = outcome.system.atom_ids();
    let pairs = outcome.system.table("pair_12_6_es").unwrap();
    let term = pairs.find_exact(&[ids[2], ids[3]])[0];
    let sij = (0.3f64 * 0.35).sqrt();
    let eij = (0.1f64 * 0.12).sqrt();
    assert_close(pairs.prop_f64(term, "aij", TermState::B).unwrap(), 4.0 * eij * sij.powi(12));
    assert_close(pairs.prop_f64(term, "bij", TermState::B).unwrap(), 4.0 * eij * sij.powi(6));
    assert_close(pairs.prop_f64(term, "qij", TermState::B).unwrap(), 0.3 * -0.1);
    assert_eq!(outcome.system.table("exclusion").unwrap().term_count(), 1);
}

#[test]
fn exclusion_lost_in_b_becomes_an_exp6_pair() {
    let exp6 = |alpha: f64, epsilon: f64, rmin: f64| [("alpha", alpha), ("epsilon", epsilon), ("rmin", rmin)];
    let model = |exclude: bool| {
        let builder = LigandBuilder::with_vdw("vdw_exp_6", "lb/geometric")
            .atom_with(0.0, 0.2, &exp6(12.0, 0.2, 3.6))
            .atom_with(1.0, -0.3, &exp6(13.0, 0.15, 3.9));
        let builder = if exclude { builder.exclusion(0, 1) } else { builder };
        builder.build()
    };
    let outcome = make_alchemical(&model(true), &model(false), &AtomCorrespondence::identity(2)).unwrap();

    assert_eq!(outcome.summary.exclusions.synthesized_pairs, 1);
    assert!(outcome.system.table("pair_12_6_es").is_none());
    let ids = outcome.system.atom_ids();
    let pairs = outcome.system.table("pair_exp_6_es").unwrap();
    let term = pairs.find_exact(&[ids[0], ids[1]])[0];

    let (ai, aj) = (0.2 * 12.0f64.exp(), 6.0 * 0.15 * 13.0f64.exp() / 7.0);
    let (ci, cj) = (12.0f64.powi(7) * 0.2 / 6.0, 13.0f64.powi(7) * 0.15 / 7.0);
    assert_close(pairs.prop_f64(term, "aij", TermState::B).unwrap(), (ai * aj).sqrt());
    assert_close(pairs.prop_f64(term, "bij", TermState::B).unwrap(), 0.3);
    assert_close(pairs.prop_f64(term, "cij", TermState::B).unwrap(), (ci * cj).sqrt());
    assert_close(pairs.prop_f64(term, "qij", TermState::B).unwrap(), 0.2 * -0.3);
    assert_eq!(pairs.prop_f64(term, "cij", TermState::A).unwrap(), 0.0);
    assert_model_refcounts_exact(&outcome.system);
}

#[test]
fn unsupported_combining_rule_fails_the_merge() {
    let a = LigandBuilder::with_vdw("vdw_12_6", "harmonic")
        .atoms(3)
        .exclusion(0, 2)
        .build();
    let b = LigandBuilder::with_vdw("vdw_12_6", "harmonic").atoms(3).build();

    let err = make_alchemical(&a, &b, &AtomCorrespondence::identity(3)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnsupportedCombiningRule { ref rule, .. } if rule == "harmonic"
    ));
}

#[test]
fn constraint_groups_on_atom_seven_merge_into_their_union() {
    let a = LigandBuilder::new().atoms(10).constraint(&[7, 8], &[1.09]).build();
    let b = LigandBuilder::new().atoms(10).constraint(&[7, 9], &[1.1]).build();
    let outcome = make_alchemical(&a, &b, &AtomCorrespondence::identity(10)).unwrap();

    assert_eq!(outcome.summary.constraints.merged, 1);
    let ids = outcome.system.atom_ids();
    let merged = outcome.system.table("constraint_ah2").unwrap();
    let term = merged.find_exact(&[ids[7], ids[8], ids[9]])[0];
    assert_eq!(merged.prop_f64(term, "r1", TermState::A).unwrap(), 1.09);
    assert_eq!(merged.prop_f64(term, "r2", TermState::A).unwrap(), 1.1);
    assert_eq!(outcome.system.table("constraint_ah1").unwrap().term_count(), 0);
}

#[test]
fn colliding_b_constraint_groups_fail_the_merge() {
    let a = LigandBuilder::new().atoms(10).constraint(&[7, 8], &[1.09]).build();
    let b = LigandBuilder::new()
        .atoms(10)
        .constraint(&[7, 9], &[1.1])
        .constraint(&[7, 6, 5], &[1.0, 1.0])
        .build();
    let err = make_alchemical(&a, &b, &AtomCorrespondence::identity(10)).unwrap_err();
    assert!(matches!(err, EngineError::OverlappingConstraint { atom: 7, .. }));
}

#[test]
fn parameter_tables_shared_across_models_keep_exact_refcounts() {
    let mut stretch = ParamTable::new();
    stretch.add_prop("r0", ValueType::Float).unwrap();
    stretch.add_prop("fc", ValueType::Float).unwrap();
    let shared = ParamTableRef::from_table(stretch);

    let a = LigandBuilder::new()
        .atoms(4)
        .shared_stretch(&shared, 0, 1, 1.5, 300.0)
        .shared_stretch(&shared, 1, 2, 1.5, 300.0)
        .shared_stretch(&shared, 2, 3, 1.5, 300.0)
        .build();
    let b = LigandBuilder::new()
        .atoms(3)
        .shared_stretch(&shared, 0, 1, 1.4, 280.0)
        .build();
    let corr = AtomCorrespondence::from_raw(&[(0, 0), (1, 1), (2, 2)]).unwrap();
    let outcome = make_alchemical(&a, &b, &corr).unwrap();

    assert!(outcome.system.table("stretch_harm").unwrap().params().ptr_eq(&shared));
    assert_eq!(outcome.summary.restored_terms, 1);
    assert_refcounts_exact(
        &shared,
        [&a, &b, &outcome.system]
            .into_iter()
            .filter_map(|system| system.table("stretch_harm")),
    );

    drop(outcome);
    assert_refcounts_exact(
        &shared,
        [&a, &b]
            .into_iter()
            .filter_map(|system| system.table("stretch_harm")),
    );
}

#[test]
fn inputs_are_left_untouched() {
    let a = LigandBuilder::new()
        .atoms(3)
        .stretch(0, 1, 1.5, 300.0)
        .stretch(1, 2, 1.5, 300.0)
        .exclusion(0, 2)
        .build();
    let b = LigandBuilder::new().atoms(2).stretch(0, 1, 1.3, 250.0).build();
    let corr = AtomCorrespondence::from_raw(&[(0, 0), (1, 1), (2, -1)]).unwrap();
    make_alchemical(&a, &b, &corr).unwrap();

    assert_eq!(a.atom_count(), 3);
    assert_eq!(b.atom_count(), 2);
    let stretch = a.table("stretch_harm").unwrap();
    assert_eq!(stretch.term_count(), 2);
    assert!(stretch.terms_iter().all(|(id, _)| stretch.param_b(id).unwrap().is_none()));
    assert!(a.atoms_iter().all(|(_, atom)| !atom.alchemical));
    assert_model_refcounts_exact(&a);
    assert_model_refcounts_exact(&b);
}

#[test]
fn merge_runs_from_toml_config_and_csv_correspondence() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("merge.toml");
    fs::write(
        &config_path,
        r#"
        exclusion-cutoff = 4.0

        [[bonded]]
        table = "stretch_harm"

        [pairs]
        enabled = false
        "#,
    )
    .unwrap();
    let csv_path = dir.path().join("atoms.csv");
    fs::write(&csv_path, "a,b\n0,0\n1,1\n2,-1\n-1,2\n").unwrap();

    let config = MergeConfig::load(&config_path).unwrap();
    let corr = AtomCorrespondence::load_csv(&csv_path).unwrap();
    let a = LigandBuilder::new()
        .atoms(3)
        .stretch(0, 1, 1.5, 300.0)
        .stretch(1, 2, 1.5, 300.0)
        .build();
    let b = LigandBuilder::new()
        .atoms(3)
        .stretch(0, 1, 1.5, 300.0)
        .stretch(1, 2, 1.0, 500.0)
        .build();
    let outcome = run(&a, &b, &corr, &config, &ProgressReporter::new()).unwrap();

    let summary = &outcome.summary;
    assert_eq!(summary.tables.len(), 1);
    let counts = summary.tables["stretch_harm"];
    assert_eq!((counts.morph, counts.vanish_b, counts.only_b), (1, 1, 1));
    assert_eq!(summary.exclusions.cutoff_exclusions, 1);

    let ids = outcome.system.atom_ids();
    let table = outcome.system.table("stretch_harm").unwrap();
    let vanished = table.find_exact(&[ids[1], ids[2]])[0];
    assert_eq!(table.prop_f64(vanished, "r0", TermState::B).unwrap(), 0.0);
    assert_eq!(table.prop_f64(vanished, "fc", TermState::B).unwrap(), 0.0);
    let appeared = table.find_exact(&[ids[1], ids[3]])[0];
    assert_eq!(table.prop_f64(appeared, "r0", TermState::A).unwrap(), 0.0);
    assert_eq!(table.prop_f64(appeared, "r0", TermState::B).unwrap(), 1.0);
    let excl = outcome.system.table("exclusion").unwrap();
    assert_eq!(excl.find_exact(&[ids[2], ids[3]]).len(), 1);
}
